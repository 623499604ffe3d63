//! Schnorr signatures over the Edwards25519 group.
//!
//! Used to authenticate signed prekeys with the owner's identity key. The
//! scheme is the classic one: commitment `R = kB`, challenge
//! `h = SHA-512(R ‖ A ‖ m)` reduced to a scalar, response `s = k + h·a`.
//! Verification checks `sB == R + hA` without needing the secret.

use crate::error::{Error, Result};
use crate::keys::{PublicKey, SecretKey};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use curve25519_dalek::edwards::EdwardsPoint;
use curve25519_dalek::scalar::Scalar;
use rand_core::{CryptoRng, RngCore};
use serde::Deserialize as _;
use sha2::{Digest, Sha512};
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

/// Signature length in bytes: R point (32) followed by s scalar (32)
pub const SIGNATURE_LEN: usize = 64;

/// Schnorr signature: commitment point and response scalar
#[derive(Clone, Copy, bincode::Encode, bincode::Decode)]
pub struct Signature {
    r: [u8; 32],
    s: [u8; 32],
}

impl Signature {
    /// Serialize as R ‖ s
    #[must_use]
    pub fn to_bytes(&self) -> [u8; SIGNATURE_LEN] {
        let mut bytes = [0u8; SIGNATURE_LEN];
        bytes[..32].copy_from_slice(&self.r);
        bytes[32..].copy_from_slice(&self.s);
        bytes
    }

    /// Parse from a 64-byte slice
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != SIGNATURE_LEN {
            return Err(Error::InvalidKeyLength);
        }
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&bytes[..32]);
        s.copy_from_slice(&bytes[32..]);
        Ok(Self { r, s })
    }
}

impl std::fmt::Debug for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Signature({})", BASE64.encode(self.to_bytes()))
    }
}

impl serde::Serialize for Signature {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        if serializer.is_human_readable() {
            serializer.serialize_str(&BASE64.encode(self.to_bytes()))
        } else {
            serializer.serialize_bytes(&self.to_bytes())
        }
    }
}

impl<'de> serde::Deserialize<'de> for Signature {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let bytes = if deserializer.is_human_readable() {
            let encoded = String::deserialize(deserializer)?;
            BASE64.decode(&encoded).map_err(serde::de::Error::custom)?
        } else {
            Vec::<u8>::deserialize(deserializer)?
        };
        Signature::from_slice(&bytes).map_err(serde::de::Error::custom)
    }
}

/// Challenge scalar: SHA-512(R ‖ A ‖ m) reduced mod the group order
fn challenge(r: &[u8; 32], public: &PublicKey, message: &[u8]) -> Scalar {
    let mut hash = Sha512::new();
    hash.update(r);
    hash.update(public.as_bytes());
    hash.update(message);
    Scalar::from_hash(hash)
}

/// Sign `message` with `secret`
///
/// The commitment nonce is drawn fresh from `rng`; entropy failure surfaces
/// as [`Error::SigningFailure`].
pub fn sign<R: RngCore + CryptoRng>(
    secret: &SecretKey,
    message: &[u8],
    rng: &mut R,
) -> Result<Signature> {
    let mut wide = [0u8; 64];
    rng.try_fill_bytes(&mut wide)
        .map_err(|_| Error::SigningFailure)?;
    let k = Scalar::from_bytes_mod_order_wide(&wide);
    wide.zeroize();

    let r = EdwardsPoint::mul_base(&k).compress().0;
    let h = challenge(&r, &secret.public_key(), message);
    let s = k + h * secret.scalar();

    Ok(Signature { r, s: s.to_bytes() })
}

/// Verify `sig` over `message` with `public`
///
/// Fails with [`Error::VerificationFailure`] on any mismatch, including a
/// public key or response scalar that does not decode.
pub fn verify(public: &PublicKey, message: &[u8], sig: &Signature) -> Result<()> {
    let a = public
        .decompress()
        .map_err(|_| Error::VerificationFailure)?;
    let s: Option<Scalar> = Scalar::from_canonical_bytes(sig.s).into();
    let s = s.ok_or(Error::VerificationFailure)?;
    let h = challenge(&sig.r, public, message);

    // R' = sB - hA; matches R iff sB == R + hA
    let r_check = EdwardsPoint::vartime_double_scalar_mul_basepoint(&-h, &a, &s);
    if bool::from(r_check.compress().0.ct_eq(&sig.r)) {
        Ok(())
    } else {
        Err(Error::VerificationFailure)
    }
}
