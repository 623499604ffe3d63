//! Wire framing for message envelopes.
//!
//! Envelopes travel as JSON with fields in declaration order and byte
//! strings base64-encoded, matching what the relay expects. The header's
//! authenticated encoding is the fixed binary layout in
//! [`crate::double_ratchet::Header::to_bytes`]; the JSON here is transport
//! framing only and never feeds the envelope MAC.

use crate::double_ratchet::Header;
use crate::error::{Error, Result};
use crate::x3dh::{HandshakeBundle, AD_LEN};

/// A complete protocol message as relayed between two users
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct MessageEnvelope {
    /// Sender user id
    pub from: String,

    /// Recipient user id
    pub to: String,

    /// Ratchet header, authenticated alongside the ciphertext
    pub header: Header,

    /// Ciphertext with the appended authentication tag
    #[serde(with = "base64_bytes")]
    pub ciphertext: Vec<u8>,

    /// Sender identity key ‖ recipient identity key
    #[serde(with = "base64_fixed")]
    pub ad: [u8; AD_LEN],

    /// Handshake data, present until the sender has seen a reply
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub handshake: Option<HandshakeBundle>,
}

impl MessageEnvelope {
    /// Serialize for transport
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|_| Error::SerializationFailure)
    }

    /// Parse a received envelope
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|_| Error::DecodeFailure)
    }
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(
        bytes: &[u8],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64.decode(&encoded).map_err(serde::de::Error::custom)
    }
}

mod base64_fixed {
    use super::AD_LEN;
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(
        bytes: &[u8; AD_LEN],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<[u8; AD_LEN], D::Error> {
        let encoded = String::deserialize(deserializer)?;
        let bytes = BASE64.decode(&encoded).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("associated data must be 64 bytes"))
    }
}
