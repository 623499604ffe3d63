//! Symmetric primitives: key derivation and the authenticated envelope.
//!
//! The envelope is an explicit encrypt-then-MAC composition rather than an
//! AEAD primitive: AES-256-CBC with PKCS#7 padding under a per-message key
//! and HKDF-derived IV, followed by a full-length HMAC-SHA256 tag over
//! `associated_data ‖ ciphertext`. The info strings below are wire-visible
//! constants; changing any of them breaks interoperability.

use crate::error::{Error, Result};
use crate::keys::DhOutput;

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

type HmacSha256 = Hmac<Sha256>;
type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// HKDF info for the root-key KDF
const ROOT_INFO: &[u8] = b"RootKey";

/// HKDF info for the per-message cipher keys
const MESSAGE_INFO: &[u8] = b"MessageKey";

/// Size of symmetric keys (32 bytes for 256-bit security)
pub const KEY_LEN: usize = 32;

/// Size of the envelope authentication tag (full HMAC-SHA256 output)
pub const TAG_LEN: usize = 32;

/// AES block and IV size
const BLOCK_LEN: usize = 16;

/// Derived symmetric key (root, chain, or message key), zeroized on drop
#[derive(Clone, Zeroize, ZeroizeOnDrop, bincode::Encode, bincode::Decode)]
pub struct SymmetricKey([u8; KEY_LEN]);

impl SymmetricKey {
    /// Create from raw bytes
    #[must_use]
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Get key as bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SymmetricKey([REDACTED])")
    }
}

/// Root-key KDF step
///
/// `(rk', ck) = HKDF-SHA256(salt = rk, ikm = dh_out, info = "RootKey")`,
/// 64 bytes split into the next root key and a fresh chain key.
#[must_use]
pub fn kdf_rk(rk: &SymmetricKey, dh_out: &DhOutput) -> (SymmetricKey, SymmetricKey) {
    let hk = Hkdf::<Sha256>::new(Some(rk.as_bytes()), dh_out.as_bytes());

    let mut okm = [0u8; 64];
    hk.expand(ROOT_INFO, &mut okm)
        .expect("64 bytes is a valid HKDF-SHA256 output length");

    let mut root = [0u8; KEY_LEN];
    let mut chain = [0u8; KEY_LEN];
    root.copy_from_slice(&okm[..KEY_LEN]);
    chain.copy_from_slice(&okm[KEY_LEN..]);
    okm.zeroize();

    (SymmetricKey(root), SymmetricKey(chain))
}

/// Chain-key KDF step
///
/// `mk = HMAC-SHA256(ck, 0x01)`, `ck' = HMAC-SHA256(ck, 0x02)`.
/// Returns `(ck', mk)`.
#[must_use]
pub fn kdf_ck(ck: &SymmetricKey) -> (SymmetricKey, SymmetricKey) {
    let mut mac = HmacSha256::new_from_slice(ck.as_bytes()).expect("HMAC accepts any key size");
    mac.update(&[0x01]);
    let message_key = SymmetricKey(mac.finalize().into_bytes().into());

    let mut mac = HmacSha256::new_from_slice(ck.as_bytes()).expect("HMAC accepts any key size");
    mac.update(&[0x02]);
    let next_chain_key = SymmetricKey(mac.finalize().into_bytes().into());

    (next_chain_key, message_key)
}

/// Per-message cipher key derivation
///
/// `HKDF-SHA256(salt = none, ikm = mk, info = "MessageKey")`, 80 bytes
/// split into the AES-256 key, the HMAC key, and the CBC IV.
#[must_use]
pub fn kdf_message(mk: &SymmetricKey) -> ([u8; KEY_LEN], [u8; KEY_LEN], [u8; BLOCK_LEN]) {
    let hk = Hkdf::<Sha256>::new(None, mk.as_bytes());

    let mut okm = [0u8; 80];
    hk.expand(MESSAGE_INFO, &mut okm)
        .expect("80 bytes is a valid HKDF-SHA256 output length");

    let mut enc_key = [0u8; KEY_LEN];
    let mut auth_key = [0u8; KEY_LEN];
    let mut iv = [0u8; BLOCK_LEN];
    enc_key.copy_from_slice(&okm[..32]);
    auth_key.copy_from_slice(&okm[32..64]);
    iv.copy_from_slice(&okm[64..]);
    okm.zeroize();

    (enc_key, auth_key, iv)
}

/// Encrypt `plaintext` under the per-message key `mk`
///
/// Returns `ciphertext ‖ tag`. The IV is derived from `mk`, which is used
/// for exactly one message, so no randomness is consumed here.
#[must_use]
pub fn encrypt(mk: &SymmetricKey, plaintext: &[u8], associated_data: &[u8]) -> Vec<u8> {
    let (mut enc_key, mut auth_key, iv) = kdf_message(mk);

    let mut out =
        Aes256CbcEnc::new(&enc_key.into(), &iv.into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    let mut mac = HmacSha256::new_from_slice(&auth_key).expect("HMAC accepts any key size");
    mac.update(associated_data);
    mac.update(&out);
    out.extend_from_slice(&mac.finalize().into_bytes());

    enc_key.zeroize();
    auth_key.zeroize();
    out
}

/// Decrypt `ciphertext ‖ tag` under the per-message key `mk`
///
/// The tag is checked in constant time before any decryption; a mismatch is
/// [`Error::AuthenticationFailure`]. A ciphertext that is empty, not
/// block-aligned, or mispadded is [`Error::DecodeFailure`].
pub fn decrypt(mk: &SymmetricKey, ciphertext: &[u8], associated_data: &[u8]) -> Result<Vec<u8>> {
    if ciphertext.len() < TAG_LEN {
        return Err(Error::DecodeFailure);
    }
    let (ct, tag) = ciphertext.split_at(ciphertext.len() - TAG_LEN);

    let (mut enc_key, mut auth_key, iv) = kdf_message(mk);

    let mut mac = HmacSha256::new_from_slice(&auth_key).expect("HMAC accepts any key size");
    mac.update(associated_data);
    mac.update(ct);
    let expected = mac.finalize().into_bytes();
    auth_key.zeroize();

    if !bool::from(expected.ct_eq(tag)) {
        enc_key.zeroize();
        return Err(Error::AuthenticationFailure);
    }

    if ct.is_empty() || ct.len() % BLOCK_LEN != 0 {
        enc_key.zeroize();
        return Err(Error::DecodeFailure);
    }

    let plaintext = Aes256CbcDec::new(&enc_key.into(), &iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(ct)
        .map_err(|_| Error::DecodeFailure);
    enc_key.zeroize();
    plaintext
}
