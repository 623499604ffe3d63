//! Double Ratchet state machine for forward-secure messaging.
//!
//! Combines a per-message symmetric chain ratchet with a Diffie-Hellman
//! ratchet that rotates root and chain keys whenever a fresh ratchet key is
//! exchanged. Skipped message keys are cached, keyed by the originating
//! ratchet public key and message number, so out-of-order delivery within
//! [`MAX_SKIP`] decrypts correctly even across chain rotations.
//!
//! Decrypt is transactional: all work happens on a shadow copy of the state
//! that is committed only when the plaintext authenticates. A failed call
//! leaves the live state bit-for-bit unchanged.

use crate::crypto::{self, kdf_ck, kdf_rk, SymmetricKey};
use crate::error::{Error, Result};
use crate::keys::{KeyPair, PublicKey};
use rand_core::{CryptoRng, RngCore};
use std::collections::HashMap;
use zeroize::Zeroize;

/// Maximum number of message keys skipped per chain advance
///
/// Bounds memory against headers that claim arbitrary skip counts.
pub const MAX_SKIP: u32 = 1000;

/// Serialized header length: ratchet key ‖ pn ‖ n
pub const HEADER_LEN: usize = 40;

/// Message header, sent in the clear but bound into the envelope tag
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct Header {
    /// Sender's current DH ratchet public key
    pub ratchet_pub: PublicKey,

    /// Number of messages in the sender's previous sending chain
    pub pn: u32,

    /// This message's number in the current sending chain
    pub n: u32,
}

impl Header {
    /// Fixed binary layout: 32-byte key, then `pn` and `n` little-endian
    ///
    /// This encoding feeds the envelope's associated data, so it must stay
    /// byte-stable regardless of how envelopes are framed in transit.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut bytes = [0u8; HEADER_LEN];
        bytes[..32].copy_from_slice(self.ratchet_pub.as_bytes());
        bytes[32..36].copy_from_slice(&self.pn.to_le_bytes());
        bytes[36..].copy_from_slice(&self.n.to_le_bytes());
        bytes
    }

    /// Parse the fixed binary layout
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != HEADER_LEN {
            return Err(Error::DecodeFailure);
        }
        let ratchet_pub = PublicKey::from_slice(&bytes[..32])?;
        let pn = u32::from_le_bytes(bytes[32..36].try_into().map_err(|_| Error::DecodeFailure)?);
        let n = u32::from_le_bytes(bytes[36..].try_into().map_err(|_| Error::DecodeFailure)?);
        Ok(Self { ratchet_pub, pn, n })
    }
}

/// Per-peer Double Ratchet state
#[derive(Clone, bincode::Encode, bincode::Decode)]
pub struct RatchetState {
    /// Local ratchet key pair
    dhs: KeyPair,

    /// Remote ratchet public key; unset on the responder side until the
    /// first inbound message triggers the initial DH step
    dhr: Option<PublicKey>,

    /// Root key
    rk: SymmetricKey,

    /// Sending chain key
    cks: Option<SymmetricKey>,

    /// Receiving chain key
    ckr: Option<SymmetricKey>,

    /// Messages sent in the current sending chain
    ns: u32,

    /// Messages received in the current receiving chain
    nr: u32,

    /// Length of the previous sending chain
    pn: u32,

    /// Message keys retained for out-of-order delivery
    skipped: HashMap<(PublicKey, u32), SymmetricKey>,
}

impl RatchetState {
    /// Initialize the sending side after an initiator handshake
    ///
    /// `peer_ratchet_pub` is the responder's signed prekey: the first DH
    /// ratchet step runs immediately, so the sending chain is ready and the
    /// first `encrypt` must not force another step.
    pub fn init_sender<R: RngCore + CryptoRng>(
        rng: &mut R,
        shared_secret: SymmetricKey,
        peer_ratchet_pub: PublicKey,
    ) -> Result<Self> {
        let dhs = KeyPair::generate(rng)?;
        let dh_out = dhs.secret.diffie_hellman(&peer_ratchet_pub)?;
        let (rk, cks) = kdf_rk(&shared_secret, &dh_out);

        Ok(Self {
            dhs,
            dhr: Some(peer_ratchet_pub),
            rk,
            cks: Some(cks),
            ckr: None,
            ns: 0,
            nr: 0,
            pn: 0,
            skipped: HashMap::new(),
        })
    }

    /// Initialize the receiving side after a responder handshake
    ///
    /// `own_signed_prekey` is the pair the initiator ratcheted against. The
    /// first `decrypt` performs the initial DH step when it sees the
    /// initiator's ratchet key.
    #[must_use]
    pub fn init_receiver(shared_secret: SymmetricKey, own_signed_prekey: KeyPair) -> Self {
        Self {
            dhs: own_signed_prekey,
            dhr: None,
            rk: shared_secret,
            cks: None,
            ckr: None,
            ns: 0,
            nr: 0,
            pn: 0,
            skipped: HashMap::new(),
        }
    }

    /// Encrypt a message
    ///
    /// A DH ratchet step runs first when the sending chain is unseeded or
    /// `force_dh_ratchet` is set. Forcing before any remote ratchet key is
    /// known fails with [`Error::NotInitialized`].
    pub fn encrypt<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
        plaintext: &[u8],
        associated_data: &[u8],
        force_dh_ratchet: bool,
    ) -> Result<(Header, Vec<u8>)> {
        if self.cks.is_none() || force_dh_ratchet {
            self.dh_ratchet_send(rng)?;
        }

        let cks = self.cks.as_ref().ok_or(Error::NotInitialized)?;
        let (next_cks, mk) = kdf_ck(cks);
        self.cks = Some(next_cks);

        let header = Header {
            ratchet_pub: self.dhs.public,
            pn: self.pn,
            n: self.ns,
        };
        self.ns += 1;

        let ciphertext = crypto::encrypt(&mk, plaintext, &concat_ad(associated_data, &header));
        Ok((header, ciphertext))
    }

    /// Decrypt a message
    ///
    /// Commits state only on success; any failure (authentication, decode,
    /// skip limit) leaves the live state unchanged.
    pub fn decrypt(
        &mut self,
        header: &Header,
        ciphertext: &[u8],
        associated_data: &[u8],
    ) -> Result<Vec<u8>> {
        let mut shadow = self.clone();
        let plaintext = shadow.decrypt_inner(header, ciphertext, associated_data)?;
        *self = shadow;
        Ok(plaintext)
    }

    fn decrypt_inner(
        &mut self,
        header: &Header,
        ciphertext: &[u8],
        associated_data: &[u8],
    ) -> Result<Vec<u8>> {
        let ad = concat_ad(associated_data, header);

        // A message from a chain we already advanced past
        if let Some(mk) = self.skipped.remove(&(header.ratchet_pub, header.n)) {
            return crypto::decrypt(&mk, ciphertext, &ad);
        }

        match self.dhr {
            None => self.dh_ratchet_receive(header.ratchet_pub)?,
            Some(current) if current != header.ratchet_pub => {
                // Close out the old receiving chain before rotating
                self.skip_message_keys(header.pn)?;
                self.dh_ratchet_receive(header.ratchet_pub)?;
            }
            Some(_) => {}
        }

        self.skip_message_keys(header.n)?;

        let ckr = self.ckr.as_ref().ok_or(Error::NotInitialized)?;
        let (next_ckr, mk) = kdf_ck(ckr);
        self.ckr = Some(next_ckr);
        self.nr += 1;

        crypto::decrypt(&mk, ciphertext, &ad)
    }

    /// Rotate the sending side: new ratchet pair, new root and sending chain
    fn dh_ratchet_send<R: RngCore + CryptoRng>(&mut self, rng: &mut R) -> Result<()> {
        let dhr = self.dhr.ok_or(Error::NotInitialized)?;

        let fresh = KeyPair::generate(rng)?;
        let dh_out = fresh.secret.diffie_hellman(&dhr)?;
        let (rk, cks) = kdf_rk(&self.rk, &dh_out);

        self.pn = self.ns;
        self.ns = 0;
        self.dhs = fresh;
        self.rk = rk;
        self.cks = Some(cks);
        Ok(())
    }

    /// Rotate the receiving side onto the peer's new ratchet key
    fn dh_ratchet_receive(&mut self, header_pub: PublicKey) -> Result<()> {
        let dh_out = self.dhs.secret.diffie_hellman(&header_pub)?;
        let (rk, ckr) = kdf_rk(&self.rk, &dh_out);

        self.nr = 0;
        self.dhr = Some(header_pub);
        self.rk = rk;
        self.ckr = Some(ckr);
        Ok(())
    }

    /// Advance the receiving chain to `until`, caching each key passed over
    fn skip_message_keys(&mut self, until: u32) -> Result<()> {
        if until > self.nr.saturating_add(MAX_SKIP) {
            return Err(Error::SkipLimitExceeded);
        }

        if let Some(dhr) = self.dhr {
            while let Some(ckr) = self.ckr.as_ref() {
                if self.nr >= until {
                    break;
                }
                let (next_ckr, mk) = kdf_ck(ckr);
                self.skipped.insert((dhr, self.nr), mk);
                self.ckr = Some(next_ckr);
                self.nr += 1;
            }
        }
        Ok(())
    }

    /// The remote ratchet key currently in use, if any
    #[must_use]
    pub fn remote_ratchet_key(&self) -> Option<PublicKey> {
        self.dhr
    }

    /// Number of cached skipped message keys
    #[must_use]
    pub fn skipped_key_count(&self) -> usize {
        self.skipped.len()
    }

    /// Serialize for persistence between runs
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::encode_to_vec(self, bincode::config::standard())
            .map_err(|_| Error::SerializationFailure)
    }

    /// Restore persisted state
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        bincode::decode_from_slice(bytes, bincode::config::standard())
            .map(|(state, _)| state)
            .map_err(|_| Error::DecodeFailure)
    }
}

impl std::fmt::Debug for RatchetState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RatchetState")
            .field("ns", &self.ns)
            .field("nr", &self.nr)
            .field("pn", &self.pn)
            .field("skipped", &self.skipped.len())
            .finish()
    }
}

impl Zeroize for RatchetState {
    fn zeroize(&mut self) {
        self.rk.zeroize();
        self.cks.zeroize();
        self.ckr.zeroize();
        self.skipped.clear();
    }
}

impl Drop for RatchetState {
    fn drop(&mut self) {
        self.zeroize();
    }
}

fn concat_ad(associated_data: &[u8], header: &Header) -> Vec<u8> {
    let mut ad = Vec::with_capacity(associated_data.len() + HEADER_LEN);
    ad.extend_from_slice(associated_data);
    ad.extend_from_slice(&header.to_bytes());
    ad
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_core::OsRng;

    const AD: &[u8] = b"test associated data";

    fn paired_ratchets() -> (RatchetState, RatchetState) {
        // Both sides seeded with the same secret, as X3DH would leave them
        let shared = SymmetricKey::from_bytes([0x5A; 32]);
        let bob_prekey = KeyPair::generate(&mut OsRng).unwrap();

        let alice =
            RatchetState::init_sender(&mut OsRng, shared.clone(), bob_prekey.public).unwrap();
        let bob = RatchetState::init_receiver(shared, bob_prekey);
        (alice, bob)
    }

    #[test]
    fn test_hello_exchange() {
        let (mut alice, mut bob) = paired_ratchets();

        let (header, ct) = alice.encrypt(&mut OsRng, b"Hello, Bob!", AD, false).unwrap();
        assert_eq!(bob.decrypt(&header, &ct, AD).unwrap(), b"Hello, Bob!");

        let (header, ct) = bob.encrypt(&mut OsRng, b"Hi, Alice!", AD, false).unwrap();
        assert_eq!(alice.decrypt(&header, &ct, AD).unwrap(), b"Hi, Alice!");
    }

    #[test]
    fn test_out_of_order_within_chain() {
        let (mut alice, mut bob) = paired_ratchets();

        let m1 = alice.encrypt(&mut OsRng, b"M1", AD, false).unwrap();
        let m2 = alice.encrypt(&mut OsRng, b"M2", AD, false).unwrap();
        let m3 = alice.encrypt(&mut OsRng, b"M3", AD, false).unwrap();

        assert_eq!(bob.decrypt(&m1.0, &m1.1, AD).unwrap(), b"M1");
        assert_eq!(bob.decrypt(&m3.0, &m3.1, AD).unwrap(), b"M3");
        assert_eq!(bob.decrypt(&m2.0, &m2.1, AD).unwrap(), b"M2");
        assert_eq!(bob.skipped_key_count(), 0);
    }

    #[test]
    fn test_forced_dh_ratchet_rotates_key() {
        let (mut alice, mut bob) = paired_ratchets();

        let (h1, ct1) = alice.encrypt(&mut OsRng, b"first", AD, false).unwrap();
        bob.decrypt(&h1, &ct1, AD).unwrap();
        assert_eq!(bob.remote_ratchet_key(), Some(h1.ratchet_pub));

        let (h2, ct2) = alice.encrypt(&mut OsRng, b"rotated", AD, true).unwrap();
        assert_ne!(h2.ratchet_pub, h1.ratchet_pub);
        assert_eq!(h2.pn, 1);
        assert_eq!(h2.n, 0);

        assert_eq!(bob.decrypt(&h2, &ct2, AD).unwrap(), b"rotated");
        assert_eq!(bob.remote_ratchet_key(), Some(h2.ratchet_pub));
    }

    #[test]
    fn test_reply_after_forced_ratchet() {
        let (mut alice, mut bob) = paired_ratchets();

        let (h1, ct1) = alice.encrypt(&mut OsRng, b"first", AD, false).unwrap();
        bob.decrypt(&h1, &ct1, AD).unwrap();

        let (h2, ct2) = alice.encrypt(&mut OsRng, b"rotated", AD, true).unwrap();
        bob.decrypt(&h2, &ct2, AD).unwrap();

        let (h3, ct3) = bob.encrypt(&mut OsRng, b"reply", AD, true).unwrap();
        assert_eq!(alice.decrypt(&h3, &ct3, AD).unwrap(), b"reply");

        let (h4, ct4) = alice.encrypt(&mut OsRng, b"again", AD, false).unwrap();
        assert_eq!(bob.decrypt(&h4, &ct4, AD).unwrap(), b"again");
    }

    #[test]
    fn test_tampered_ciphertext_leaves_state_unchanged() {
        let (mut alice, mut bob) = paired_ratchets();

        let (header, mut ct) = alice.encrypt(&mut OsRng, b"Hello, Bob!", AD, false).unwrap();
        ct[0] ^= 0xFF;

        let before = bob.to_bytes().unwrap();
        assert_eq!(
            bob.decrypt(&header, &ct, AD),
            Err(Error::AuthenticationFailure)
        );
        assert_eq!(bob.to_bytes().unwrap(), before);
    }

    #[test]
    fn test_tampered_header_rejected() {
        let (mut alice, mut bob) = paired_ratchets();

        let (mut header, ct) = alice.encrypt(&mut OsRng, b"msg", AD, false).unwrap();
        header.pn ^= 1;
        assert!(bob.decrypt(&header, &ct, AD).is_err());
    }

    #[test]
    fn test_skip_limit_exceeded() {
        let (mut alice, mut bob) = paired_ratchets();

        // Advance the sender one message past the retention bound
        let mut last = None;
        for _ in 0..MAX_SKIP + 2 {
            last = Some(alice.encrypt(&mut OsRng, b"skip", AD, false).unwrap());
        }
        let (header, ct) = last.unwrap();
        assert_eq!(header.n, MAX_SKIP + 1);

        let before = bob.to_bytes().unwrap();
        assert_eq!(bob.decrypt(&header, &ct, AD), Err(Error::SkipLimitExceeded));
        assert_eq!(bob.to_bytes().unwrap(), before);
    }

    #[test]
    fn test_skipped_keys_survive_chain_rotation() {
        let (mut alice, mut bob) = paired_ratchets();

        let first = alice.encrypt(&mut OsRng, b"first", AD, false).unwrap();
        assert_eq!(bob.decrypt(&first.0, &first.1, AD).unwrap(), b"first");

        // Held back from the old chain, then the sender rotates
        let old_chain = alice.encrypt(&mut OsRng, b"held back", AD, false).unwrap();
        let rotated = alice.encrypt(&mut OsRng, b"new chain", AD, true).unwrap();

        assert_eq!(bob.decrypt(&rotated.0, &rotated.1, AD).unwrap(), b"new chain");
        assert_eq!(bob.skipped_key_count(), 1);

        assert_eq!(
            bob.decrypt(&old_chain.0, &old_chain.1, AD).unwrap(),
            b"held back"
        );
        assert_eq!(bob.skipped_key_count(), 0);
    }

    #[test]
    fn test_force_without_remote_key_is_error() {
        let shared = SymmetricKey::from_bytes([0x5A; 32]);
        let prekey = KeyPair::generate(&mut OsRng).unwrap();
        let mut receiver = RatchetState::init_receiver(shared, prekey);

        assert_eq!(
            receiver
                .encrypt(&mut OsRng, b"too early", AD, true)
                .map(|_| ()),
            Err(Error::NotInitialized)
        );
    }

    #[test]
    fn test_header_roundtrip() {
        let pair = KeyPair::generate(&mut OsRng).unwrap();
        let header = Header {
            ratchet_pub: pair.public,
            pn: 7,
            n: 42,
        };
        let parsed = Header::from_bytes(&header.to_bytes()).unwrap();
        assert_eq!(parsed.ratchet_pub, header.ratchet_pub);
        assert_eq!(parsed.pn, 7);
        assert_eq!(parsed.n, 42);

        assert!(Header::from_bytes(&[0u8; 10]).is_err());
    }

    #[test]
    fn test_state_persistence_roundtrip() {
        let (mut alice, mut bob) = paired_ratchets();

        let (h1, ct1) = alice.encrypt(&mut OsRng, b"before restart", AD, false).unwrap();
        bob.decrypt(&h1, &ct1, AD).unwrap();

        // Simulate an application restart on Bob's side
        let mut restored = RatchetState::from_bytes(&bob.to_bytes().unwrap()).unwrap();

        let (h2, ct2) = alice.encrypt(&mut OsRng, b"after restart", AD, false).unwrap();
        assert_eq!(restored.decrypt(&h2, &ct2, AD).unwrap(), b"after restart");
    }
}
