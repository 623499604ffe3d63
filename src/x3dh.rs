//! X3DH (Extended Triple Diffie-Hellman) key agreement.
//!
//! The responder publishes a prekey bundle (identity key, signed prekey,
//! optional one-time prekeys); the initiator fetches it and computes
//!
//! - DH1 = DH(IK_A, SPK_B)
//! - DH2 = DH(EK_A, IK_B)
//! - DH3 = DH(EK_A, SPK_B)
//! - DH4 = DH(EK_A, OPK_B)  (only when a one-time prekey is available)
//!
//! and `SK = HKDF(0xFF×32 ‖ DH1 ‖ DH2 ‖ DH3 [‖ DH4])`. The responder mirrors
//! the computation from its secret halves once the initiator's first message
//! arrives. Both sides must derive the same `SK` bit for bit.

use crate::crypto::SymmetricKey;
use crate::error::{Error, Result};
use crate::keys::{IdentityKeyPair, KeyPair, PublicKey};
use crate::schnorr::{self, Signature};
use hkdf::Hkdf;
use rand_core::{CryptoRng, RngCore};
use sha2::Sha256;
use zeroize::Zeroize;

/// HKDF info for the shared-secret derivation; wire-visible constant
const X3DH_INFO: &[u8] = b"minimal-signal";

/// Domain separator prepended to the concatenated DH outputs
const DOMAIN_PREFIX: [u8; 32] = [0xFF; 32];

/// Associated-data length: two serialized identity keys
pub const AD_LEN: usize = 64;

/// Prekey bundle published by the responder
///
/// Contains everything the initiator needs to run its half of the handshake.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PrekeyBundle {
    /// Responder's long-term identity key
    pub identity_key: PublicKey,

    /// Responder's medium-term signed prekey
    pub signed_prekey: PublicKey,

    /// Schnorr signature over `signed_prekey` by the identity key
    pub signed_prekey_signature: Signature,

    /// Optional single-use prekey, consumed by one handshake
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub one_time_prekey: Option<PublicKey>,
}

impl PrekeyBundle {
    /// Verify the signed-prekey signature
    ///
    /// Must pass before any DH output is derived from the bundle.
    pub fn verify(&self) -> Result<()> {
        schnorr::verify(
            &self.identity_key,
            self.signed_prekey.as_bytes(),
            &self.signed_prekey_signature,
        )
        .map_err(|_| Error::HandshakeVerificationFailure)
    }

    /// Serialize for publication to a key directory
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|_| Error::SerializationFailure)
    }

    /// Parse a bundle fetched from a key directory
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|_| Error::DecodeFailure)
    }
}

/// Responder-side prekey secrets
///
/// Holds the signed prekey pair and the one-time prekey pool. One-time
/// prekeys are consumed atomically by public key and never reused.
pub struct PrekeyState {
    identity_public: PublicKey,
    signed_prekey: KeyPair,
    signed_prekey_signature: Signature,
    one_time_prekeys: Vec<KeyPair>,
}

impl PrekeyState {
    /// Generate a signed prekey and `opk_count` one-time prekeys
    pub fn generate<R: RngCore + CryptoRng>(
        rng: &mut R,
        identity: &IdentityKeyPair,
        opk_count: usize,
    ) -> Result<Self> {
        let signed_prekey = KeyPair::generate(rng)?;
        let signed_prekey_signature =
            schnorr::sign(identity.secret(), signed_prekey.public.as_bytes(), rng)?;

        let one_time_prekeys = (0..opk_count)
            .map(|_| KeyPair::generate(rng))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            identity_public: identity.public_key(),
            signed_prekey,
            signed_prekey_signature,
            one_time_prekeys,
        })
    }

    /// Build the public bundle for publication
    ///
    /// Offers the first one-time prekey still in the pool, if any.
    #[must_use]
    pub fn public_bundle(&self) -> PrekeyBundle {
        PrekeyBundle {
            identity_key: self.identity_public,
            signed_prekey: self.signed_prekey.public,
            signed_prekey_signature: self.signed_prekey_signature,
            one_time_prekey: self.one_time_prekeys.first().map(|pair| pair.public),
        }
    }

    /// The signed prekey pair; seeds the receiving side of the ratchet
    #[must_use]
    pub fn signed_prekey(&self) -> &KeyPair {
        &self.signed_prekey
    }

    /// Number of one-time prekeys left in the pool
    #[must_use]
    pub fn one_time_prekey_count(&self) -> usize {
        self.one_time_prekeys.len()
    }

    /// Remove and return the one-time prekey with the given public half
    fn consume_one_time_prekey(&mut self, public: &PublicKey) -> Result<KeyPair> {
        let index = self
            .one_time_prekeys
            .iter()
            .position(|pair| pair.public == *public)
            .ok_or(Error::MissingOneTimePrekey)?;
        Ok(self.one_time_prekeys.swap_remove(index))
    }
}

impl std::fmt::Debug for PrekeyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrekeyState")
            .field("identity_public", &self.identity_public)
            .field("signed_prekey", &self.signed_prekey.public)
            .field("one_time_prekeys", &self.one_time_prekeys.len())
            .finish()
    }
}

/// Handshake data sent alongside the initiator's first ciphertext
///
/// Lets the responder complete its half of the agreement. `one_time_prekey`
/// names the bundle entry the initiator used, so both sides agree on
/// whether DH4 enters the derivation.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, bincode::Encode, bincode::Decode)]
pub struct HandshakeBundle {
    /// Initiator's fresh ephemeral key
    pub ephemeral_key: PublicKey,

    /// The one-time prekey consumed from the bundle, if any
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub one_time_prekey: Option<PublicKey>,
}

/// Initiator's handshake outcome
pub struct InitiatorOutcome {
    /// Shared secret; seeds the sending ratchet
    pub shared_secret: SymmetricKey,

    /// Handshake bundle to attach to the first envelope
    pub handshake: HandshakeBundle,

    /// Initiator identity ‖ responder identity
    pub associated_data: [u8; AD_LEN],
}

impl std::fmt::Debug for InitiatorOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitiatorOutcome")
            .field("handshake", &self.handshake)
            .finish()
    }
}

/// Responder's handshake outcome
pub struct ResponderOutcome {
    /// Shared secret; seeds the receiving ratchet
    pub shared_secret: SymmetricKey,

    /// Initiator identity ‖ responder identity
    pub associated_data: [u8; AD_LEN],
}

impl std::fmt::Debug for ResponderOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponderOutcome").finish()
    }
}

/// Initiator half of the handshake
///
/// Verifies the bundle signature, generates a fresh ephemeral key, and
/// derives the shared secret. The fourth DH leg is computed exactly when
/// the bundle offers a one-time prekey.
pub fn initiate<R: RngCore + CryptoRng>(
    rng: &mut R,
    own_identity: &IdentityKeyPair,
    bundle: &PrekeyBundle,
) -> Result<InitiatorOutcome> {
    bundle.verify()?;

    let ephemeral = KeyPair::generate(rng)?;

    let dh1 = own_identity.secret().diffie_hellman(&bundle.signed_prekey)?;
    let dh2 = ephemeral.secret.diffie_hellman(&bundle.identity_key)?;
    let dh3 = ephemeral.secret.diffie_hellman(&bundle.signed_prekey)?;
    let dh4 = bundle
        .one_time_prekey
        .as_ref()
        .map(|opk| ephemeral.secret.diffie_hellman(opk))
        .transpose()?;

    let shared_secret = derive_shared_secret(
        dh1.as_bytes(),
        dh2.as_bytes(),
        dh3.as_bytes(),
        dh4.as_ref().map(|dh| dh.as_bytes()),
    );

    Ok(InitiatorOutcome {
        shared_secret,
        handshake: HandshakeBundle {
            ephemeral_key: ephemeral.public,
            one_time_prekey: bundle.one_time_prekey,
        },
        associated_data: associated_data(&own_identity.public_key(), &bundle.identity_key),
    })
}

/// Responder half of the handshake
///
/// Mirrors the initiator's DH legs from the secret halves. Consumes the
/// named one-time prekey from the pool; an unknown name fails with
/// [`Error::MissingOneTimePrekey`] rather than silently diverging.
pub fn respond(
    prekeys: &mut PrekeyState,
    own_identity: &IdentityKeyPair,
    initiator_identity: &PublicKey,
    handshake: &HandshakeBundle,
) -> Result<ResponderOutcome> {
    let dh1 = prekeys
        .signed_prekey
        .secret
        .diffie_hellman(initiator_identity)?;
    let dh2 = own_identity
        .secret()
        .diffie_hellman(&handshake.ephemeral_key)?;
    let dh3 = prekeys
        .signed_prekey
        .secret
        .diffie_hellman(&handshake.ephemeral_key)?;

    let dh4 = match &handshake.one_time_prekey {
        Some(used) => {
            let pair = prekeys.consume_one_time_prekey(used)?;
            Some(pair.secret.diffie_hellman(&handshake.ephemeral_key)?)
        }
        None => None,
    };

    let shared_secret = derive_shared_secret(
        dh1.as_bytes(),
        dh2.as_bytes(),
        dh3.as_bytes(),
        dh4.as_ref().map(|dh| dh.as_bytes()),
    );

    Ok(ResponderOutcome {
        shared_secret,
        associated_data: associated_data(initiator_identity, &own_identity.public_key()),
    })
}

/// `SK = HKDF-SHA256(0xFF×32 ‖ DH1 ‖ DH2 ‖ DH3 [‖ DH4], info = "minimal-signal")`
fn derive_shared_secret(
    dh1: &[u8; 32],
    dh2: &[u8; 32],
    dh3: &[u8; 32],
    dh4: Option<&[u8; 32]>,
) -> SymmetricKey {
    let mut ikm = Vec::with_capacity(160);
    ikm.extend_from_slice(&DOMAIN_PREFIX);
    ikm.extend_from_slice(dh1);
    ikm.extend_from_slice(dh2);
    ikm.extend_from_slice(dh3);
    if let Some(dh4) = dh4 {
        ikm.extend_from_slice(dh4);
    }

    let hk = Hkdf::<Sha256>::new(None, &ikm);
    let mut okm = [0u8; 32];
    hk.expand(X3DH_INFO, &mut okm)
        .expect("32 bytes is a valid HKDF-SHA256 output length");

    ikm.zeroize();
    SymmetricKey::from_bytes(okm)
}

fn associated_data(initiator: &PublicKey, responder: &PublicKey) -> [u8; AD_LEN] {
    let mut ad = [0u8; AD_LEN];
    ad[..32].copy_from_slice(initiator.as_bytes());
    ad[32..].copy_from_slice(responder.as_bytes());
    ad
}
