//! # End-to-end encrypted messaging core
//!
//! The cryptographic core of a two-party messaging system: X3DH key
//! agreement, Double Ratchet messaging, and safety-number fingerprints,
//! all over the Edwards25519 group.
//!
//! ## Security Properties
//!
//! - **Forward secrecy**: past messages stay secret if current keys leak
//! - **Post-compromise security**: fresh DH ratchet steps heal a compromise
//! - **Asynchronous**: the initiator encrypts against a published prekey
//!   bundle without the responder being online
//! - **Out-of-order tolerance**: skipped message keys are cached (bounded
//!   by [`double_ratchet::MAX_SKIP`]) so reordered delivery still decrypts
//!
//! ## Threat Model
//!
//! This implementation assumes:
//! - The adversary can inject, modify, delay, drop, or reorder messages
//! - The adversary cannot break the Edwards25519 group, HKDF-SHA256, or
//!   the AES-CBC + HMAC-SHA256 envelope
//! - Key material is zeroized on drop, but side channels are mitigated,
//!   not formally verified
//!
//! ## Usage
//!
//! ```rust,no_run
//! use rand_core::OsRng;
//! use signal_core::{
//!     storage::{InMemoryDirectory, InMemorySessionStore},
//!     IdentityKeyPair, PrekeyState, Session,
//! };
//!
//! let directory = InMemoryDirectory::new();
//!
//! // Bob publishes a prekey bundle
//! let bob_identity = IdentityKeyPair::generate(&mut OsRng).unwrap();
//! let bob_prekeys = PrekeyState::generate(&mut OsRng, &bob_identity, 16).unwrap();
//! let bob = Session::open(
//!     "bob", "alice", bob_identity, bob_prekeys,
//!     directory.clone(), InMemorySessionStore::new(),
//! ).unwrap();
//! bob.publish_bundle().unwrap();
//!
//! // Alice opens a session and sends the first message
//! let alice_identity = IdentityKeyPair::generate(&mut OsRng).unwrap();
//! let alice_prekeys = PrekeyState::generate(&mut OsRng, &alice_identity, 16).unwrap();
//! let mut alice = Session::open(
//!     "alice", "bob", alice_identity, alice_prekeys,
//!     directory, InMemorySessionStore::new(),
//! ).unwrap();
//! let envelope = alice.encrypt(&mut OsRng, b"hello", false).unwrap();
//! ```

#![forbid(unsafe_code)]
#![deny(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![warn(clippy::all, clippy::pedantic, clippy::cargo)]

pub mod crypto;
pub mod double_ratchet;
pub mod error;
pub mod fingerprint;
pub mod keys;
pub mod schnorr;
pub mod session;
pub mod storage;
pub mod wire;
pub mod x3dh;

// Re-export main types
pub use double_ratchet::{Header, RatchetState, MAX_SKIP};
pub use error::{Error, Result};
pub use fingerprint::{fingerprint, safety_number};
pub use keys::{IdentityKeyPair, KeyPair, PublicKey, SecretKey};
pub use session::Session;
pub use wire::MessageEnvelope;
pub use x3dh::{HandshakeBundle, PrekeyBundle, PrekeyState};
