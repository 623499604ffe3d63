//! Edwards25519 key types with memory safety guarantees.
//!
//! The curve is used directly as a prime-order group: secret keys are
//! canonical scalars, public keys are compressed points, and the
//! Diffie-Hellman output is the compressed scalar multiplication of the two.
//! The same key pair serves both key agreement and Schnorr signing.

use crate::error::{Error, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use curve25519_dalek::edwards::{CompressedEdwardsY, EdwardsPoint};
use curve25519_dalek::scalar::Scalar;
use rand_core::{CryptoRng, RngCore};
use serde::Deserialize as _;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of serialized keys and DH outputs in bytes
pub const KEY_LEN: usize = 32;

/// Compressed Edwards25519 public key (32 bytes)
#[derive(Clone, Copy, Eq, bincode::Encode, bincode::Decode)]
pub struct PublicKey([u8; KEY_LEN]);

impl PublicKey {
    /// Create from raw compressed-point bytes
    #[must_use]
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Create from a byte slice, checking the length
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; KEY_LEN] = bytes.try_into().map_err(|_| Error::InvalidKeyLength)?;
        Ok(Self(bytes))
    }

    /// Get raw bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// Decode the compressed point, rejecting invalid encodings
    pub(crate) fn decompress(&self) -> Result<EdwardsPoint> {
        CompressedEdwardsY(self.0)
            .decompress()
            .ok_or(Error::InvalidPoint)
    }
}

impl PartialEq for PublicKey {
    /// Constant-time equality
    fn eq(&self, other: &Self) -> bool {
        bool::from(self.0.ct_eq(&other.0))
    }
}

impl std::hash::Hash for PublicKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKey([REDACTED])")
    }
}

impl serde::Serialize for PublicKey {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        if serializer.is_human_readable() {
            serializer.serialize_str(&BASE64.encode(self.0))
        } else {
            serializer.serialize_bytes(&self.0)
        }
    }
}

impl<'de> serde::Deserialize<'de> for PublicKey {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        if deserializer.is_human_readable() {
            let encoded = String::deserialize(deserializer)?;
            let bytes = BASE64
                .decode(&encoded)
                .map_err(serde::de::Error::custom)?;
            PublicKey::from_slice(&bytes).map_err(serde::de::Error::custom)
        } else {
            let bytes = <[u8; KEY_LEN]>::deserialize(deserializer)?;
            Ok(Self(bytes))
        }
    }
}

/// Edwards25519 secret key: a canonical scalar, zeroized on drop
#[derive(Clone, Zeroize, ZeroizeOnDrop, bincode::Encode, bincode::Decode)]
pub struct SecretKey([u8; KEY_LEN]);

impl SecretKey {
    /// Generate a new random secret key
    ///
    /// Draws 64 bytes from the RNG and reduces them to a uniform scalar.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Result<Self> {
        let mut wide = [0u8; 64];
        rng.try_fill_bytes(&mut wide)
            .map_err(|_| Error::RngFailure)?;
        let scalar = Scalar::from_bytes_mod_order_wide(&wide);
        wide.zeroize();
        Ok(Self(scalar.to_bytes()))
    }

    /// Create from raw bytes, rejecting non-canonical scalars
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Result<Self> {
        let scalar: Option<Scalar> = Scalar::from_canonical_bytes(bytes).into();
        scalar
            .map(|s| Self(s.to_bytes()))
            .ok_or(Error::InvalidKeyLength)
    }

    /// The scalar this key holds. Canonical by construction.
    pub(crate) fn scalar(&self) -> Scalar {
        Scalar::from_bytes_mod_order(self.0)
    }

    /// Derive the corresponding public key
    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        PublicKey(EdwardsPoint::mul_base(&self.scalar()).compress().0)
    }

    /// Perform Diffie-Hellman key agreement
    ///
    /// Fails with [`Error::InvalidPoint`] if `public` is not a valid point.
    pub fn diffie_hellman(&self, public: &PublicKey) -> Result<DhOutput> {
        let point = public.decompress()?;
        let shared = point * self.scalar();
        Ok(DhOutput(shared.compress().0))
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretKey([REDACTED])")
    }
}

/// Output of a Diffie-Hellman operation (32 bytes), zeroized on drop
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct DhOutput([u8; KEY_LEN]);

impl DhOutput {
    /// Returns the serialized shared point
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    #[cfg(test)]
    pub(crate) fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }
}

impl std::fmt::Debug for DhOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DhOutput([REDACTED])")
    }
}

/// Secret/public key pair
#[derive(Clone, Debug, bincode::Encode, bincode::Decode)]
pub struct KeyPair {
    /// Secret half
    pub secret: SecretKey,
    /// Public half
    pub public: PublicKey,
}

impl KeyPair {
    /// Generate a fresh key pair
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Result<Self> {
        let secret = SecretKey::generate(rng)?;
        let public = secret.public_key();
        Ok(Self { secret, public })
    }

    /// Build a pair from an existing secret key
    #[must_use]
    pub fn from_secret(secret: SecretKey) -> Self {
        let public = secret.public_key();
        Self { secret, public }
    }
}

/// Long-term identity key pair
///
/// A single Edwards25519 pair used both for the handshake DH computations
/// and for Schnorr signatures over signed prekeys.
#[derive(Clone, Debug, bincode::Encode, bincode::Decode)]
pub struct IdentityKeyPair(KeyPair);

impl IdentityKeyPair {
    /// Generate a new identity
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Result<Self> {
        Ok(Self(KeyPair::generate(rng)?))
    }

    /// Build an identity from an existing secret key
    #[must_use]
    pub fn from_secret(secret: SecretKey) -> Self {
        Self(KeyPair::from_secret(secret))
    }

    /// The public identity key
    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        self.0.public
    }

    /// The secret half, for handshake DH computations
    #[must_use]
    pub fn secret(&self) -> &SecretKey {
        &self.0.secret
    }
}
