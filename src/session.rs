//! Per-peer session coordination.
//!
//! A [`Session`] glues the handshake and the ratchet together for one
//! conversation: the first outbound message runs the initiator half of the
//! key agreement and seeds the sending ratchet; the first inbound message
//! runs the responder half and seeds the receiving ratchet; everything
//! after that delegates straight to the ratchet. State is persisted through
//! a [`SessionStore`] after every successful encrypt or decrypt, so a
//! session survives application restarts.

use crate::double_ratchet::RatchetState;
use crate::error::{Error, Result};
use crate::fingerprint;
use crate::keys::IdentityKeyPair;
use crate::storage::{session_key, Directory, SessionStore};
use crate::wire::MessageEnvelope;
use crate::x3dh::{self, HandshakeBundle, PrekeyBundle, PrekeyState, AD_LEN};
use rand_core::{CryptoRng, RngCore};

/// Established conversation state, persisted as one opaque blob
#[derive(Clone, bincode::Encode, bincode::Decode)]
struct SessionRecord {
    ratchet: RatchetState,
    associated_data: [u8; AD_LEN],
    /// Retransmitted with every outbound envelope until the peer's first
    /// reply proves the handshake arrived
    pending_handshake: Option<HandshakeBundle>,
}

/// Coordinator for one local identity talking to one peer
pub struct Session<D: Directory, S: SessionStore> {
    user_id: String,
    peer_id: String,
    identity: IdentityKeyPair,
    prekeys: PrekeyState,
    directory: D,
    store: S,
    remote_bundle: Option<PrekeyBundle>,
    record: Option<SessionRecord>,
}

impl<D: Directory, S: SessionStore> Session<D, S> {
    /// Open a session, restoring persisted ratchet state when present
    pub fn open(
        user_id: impl Into<String>,
        peer_id: impl Into<String>,
        identity: IdentityKeyPair,
        prekeys: PrekeyState,
        directory: D,
        store: S,
    ) -> Result<Self> {
        let user_id = user_id.into();
        let peer_id = peer_id.into();

        let record = match store.get(&session_key(&user_id, &peer_id))? {
            Some(blob) => Some(
                bincode::decode_from_slice(&blob, bincode::config::standard())
                    .map(|(record, _)| record)
                    .map_err(|_| Error::DecodeFailure)?,
            ),
            None => None,
        };

        Ok(Self {
            user_id,
            peer_id,
            identity,
            prekeys,
            directory,
            store,
            remote_bundle: None,
            record,
        })
    }

    /// Publish this identity's current prekey bundle to the directory
    pub fn publish_bundle(&self) -> Result<()> {
        self.directory
            .publish(&self.user_id, &self.prekeys.public_bundle())
    }

    /// Encrypt a message to the peer
    ///
    /// The first call fetches the peer's bundle, runs the initiator
    /// handshake, and seeds the ratchet; its envelope (and every one after
    /// it, until the peer replies) carries the handshake bundle. The very
    /// first send never forces a DH ratchet step; afterwards
    /// `force_dh_ratchet` is the caller's policy.
    pub fn encrypt<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
        plaintext: &[u8],
        force_dh_ratchet: bool,
    ) -> Result<MessageEnvelope> {
        let first = self.record.is_none();
        if first {
            self.establish_outbound(rng)?;
        }

        let record = self.record.as_mut().ok_or(Error::NotInitialized)?;
        let (header, ciphertext) = record.ratchet.encrypt(
            rng,
            plaintext,
            &record.associated_data,
            force_dh_ratchet && !first,
        )?;

        let envelope = MessageEnvelope {
            from: self.user_id.clone(),
            to: self.peer_id.clone(),
            header,
            ciphertext,
            ad: record.associated_data,
            handshake: record.pending_handshake.clone(),
        };

        self.persist()?;
        Ok(envelope)
    }

    /// Decrypt a message from the peer
    ///
    /// The first call requires the envelope to carry the initiator's
    /// handshake bundle and seeds the receiving ratchet from it. A
    /// successful decrypt also clears any pending handshake of our own:
    /// the peer demonstrably holds a session.
    pub fn decrypt(&mut self, envelope: &MessageEnvelope) -> Result<Vec<u8>> {
        if self.record.is_none() {
            self.establish_inbound(envelope)?;
        }

        let record = self.record.as_mut().ok_or(Error::NotInitialized)?;
        let plaintext =
            record
                .ratchet
                .decrypt(&envelope.header, &envelope.ciphertext, &envelope.ad)?;

        record.pending_handshake = None;
        self.persist()?;
        Ok(plaintext)
    }

    /// The safety number for this conversation
    ///
    /// Fetches the peer's bundle if their identity key is not yet known.
    pub fn safety_number(&mut self) -> Result<String> {
        let own_key = self.identity.public_key();
        let peer_key = self.remote_bundle()?.identity_key;
        Ok(fingerprint::safety_number(
            (&own_key, &self.user_id),
            (&peer_key, &self.peer_id),
        ))
    }

    /// Discard the conversation state, locally and in the store
    pub fn reset(&mut self) -> Result<()> {
        self.record = None;
        self.store
            .remove(&session_key(&self.user_id, &self.peer_id))
    }

    /// Whether a ratchet has been established with the peer
    #[must_use]
    pub fn is_established(&self) -> bool {
        self.record.is_some()
    }

    fn establish_outbound<R: RngCore + CryptoRng>(&mut self, rng: &mut R) -> Result<()> {
        let bundle = self.remote_bundle()?.clone();
        let outcome = x3dh::initiate(rng, &self.identity, &bundle)?;
        let ratchet =
            RatchetState::init_sender(rng, outcome.shared_secret, bundle.signed_prekey)?;

        self.record = Some(SessionRecord {
            ratchet,
            associated_data: outcome.associated_data,
            pending_handshake: Some(outcome.handshake),
        });
        Ok(())
    }

    fn establish_inbound(&mut self, envelope: &MessageEnvelope) -> Result<()> {
        let handshake = envelope.handshake.as_ref().ok_or(Error::DecodeFailure)?;
        let peer_identity = self.remote_bundle()?.identity_key;

        let outcome = x3dh::respond(
            &mut self.prekeys,
            &self.identity,
            &peer_identity,
            handshake,
        )?;
        let ratchet = RatchetState::init_receiver(
            outcome.shared_secret,
            self.prekeys.signed_prekey().clone(),
        );

        self.record = Some(SessionRecord {
            ratchet,
            associated_data: outcome.associated_data,
            pending_handshake: None,
        });
        Ok(())
    }

    fn remote_bundle(&mut self) -> Result<&PrekeyBundle> {
        if self.remote_bundle.is_none() {
            self.remote_bundle = Some(self.directory.fetch(&self.peer_id)?);
        }
        self.remote_bundle.as_ref().ok_or(Error::DirectoryMiss)
    }

    fn persist(&self) -> Result<()> {
        let record = self.record.as_ref().ok_or(Error::NotInitialized)?;
        let blob = bincode::encode_to_vec(record, bincode::config::standard())
            .map_err(|_| Error::SerializationFailure)?;
        self.store
            .put(&session_key(&self.user_id, &self.peer_id), blob)
    }
}

impl<D: Directory, S: SessionStore> std::fmt::Debug for Session<D, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("user_id", &self.user_id)
            .field("peer_id", &self.peer_id)
            .field("established", &self.record.is_some())
            .finish()
    }
}
