//! Error types for the protocol core.

use thiserror::Error;

/// Result type alias for protocol operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during protocol operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Entropy source failed to produce random bytes
    #[error("random number generator failure")]
    RngFailure,

    /// A public key did not decode to a valid curve point
    #[error("invalid curve point")]
    InvalidPoint,

    /// A key or signature was not in 32/64-byte canonical form
    #[error("invalid key length or encoding")]
    InvalidKeyLength,

    /// Signature creation failed
    #[error("signing failure")]
    SigningFailure,

    /// Signature did not verify
    #[error("signature verification failure")]
    VerificationFailure,

    /// Signed-prekey signature in a bundle did not verify
    #[error("handshake verification failure")]
    HandshakeVerificationFailure,

    /// Handshake named a one-time prekey the responder does not hold
    #[error("missing one-time prekey")]
    MissingOneTimePrekey,

    /// Ciphertext authentication tag mismatch
    #[error("authentication failure")]
    AuthenticationFailure,

    /// Malformed padding, header, or envelope
    #[error("decode failure")]
    DecodeFailure,

    /// More than the allowed number of message keys would be skipped
    #[error("skip limit exceeded")]
    SkipLimitExceeded,

    /// Operation requires a remote ratchet key that is not yet known
    #[error("ratchet not initialized")]
    NotInitialized,

    /// No prekey bundle published for the requested user
    #[error("directory miss")]
    DirectoryMiss,

    /// State or envelope could not be serialized
    #[error("serialization failure")]
    SerializationFailure,

    /// Storage backend failed
    #[error("storage failure")]
    StorageFailure,
}
