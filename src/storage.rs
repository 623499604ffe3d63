//! Storage and directory abstractions.
//!
//! Trait seams for the two collaborators the core persists through: a key
//! directory that serves public prekey bundles, and a session store that
//! holds opaque per-peer state blobs between application runs. In-memory
//! implementations back the test suite; production code plugs HTTP and
//! database adapters into the same traits.

use crate::error::{Error, Result};
use crate::x3dh::PrekeyBundle;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Key directory: publishes and serves public prekey bundles.
///
/// Publish is idempotent with last-writer-wins semantics; fetch returns the
/// currently published bundle or [`Error::DirectoryMiss`].
pub trait Directory {
    /// Publish `bundle` under `user_id`, replacing any previous bundle.
    fn publish(&self, user_id: &str, bundle: &PrekeyBundle) -> Result<()>;

    /// Fetch the bundle currently published for `user_id`.
    fn fetch(&self, user_id: &str) -> Result<PrekeyBundle>;
}

/// Session store: opaque state blobs keyed per `(self, peer)` pair.
pub trait SessionStore {
    /// Store `blob` under `key`, replacing any previous value.
    fn put(&self, key: &str, blob: Vec<u8>) -> Result<()>;

    /// Load the blob stored under `key`, if any.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Remove the blob stored under `key`.
    fn remove(&self, key: &str) -> Result<()>;
}

/// Storage key for a persisted ratchet session
#[must_use]
pub fn session_key(own_id: &str, peer_id: &str) -> String {
    format!("client:ratchet:{own_id}:{peer_id}")
}

/// Thread-safe in-memory directory.
///
/// Stores bundles in serialized form, mirroring what an HTTP directory
/// would hold. Clones share the same underlying map.
#[derive(Clone, Debug, Default)]
pub struct InMemoryDirectory {
    bundles: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl InMemoryDirectory {
    /// Creates a new empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Directory for InMemoryDirectory {
    fn publish(&self, user_id: &str, bundle: &PrekeyBundle) -> Result<()> {
        let serialized = bundle.to_bytes()?;
        let mut bundles = self.bundles.lock().map_err(|_| Error::StorageFailure)?;
        bundles.insert(user_id.to_owned(), serialized);
        Ok(())
    }

    fn fetch(&self, user_id: &str) -> Result<PrekeyBundle> {
        let bundles = self.bundles.lock().map_err(|_| Error::StorageFailure)?;
        let serialized = bundles.get(user_id).ok_or(Error::DirectoryMiss)?;
        PrekeyBundle::from_bytes(serialized)
    }
}

/// Thread-safe in-memory session store.
///
/// Clones share the same underlying map, so one store can back several
/// sessions.
#[derive(Clone, Debug, Default)]
pub struct InMemorySessionStore {
    blobs: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl InMemorySessionStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for InMemorySessionStore {
    fn put(&self, key: &str, blob: Vec<u8>) -> Result<()> {
        let mut blobs = self.blobs.lock().map_err(|_| Error::StorageFailure)?;
        blobs.insert(key.to_owned(), blob);
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let blobs = self.blobs.lock().map_err(|_| Error::StorageFailure)?;
        Ok(blobs.get(key).cloned())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut blobs = self.blobs.lock().map_err(|_| Error::StorageFailure)?;
        blobs.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::IdentityKeyPair;
    use crate::x3dh::PrekeyState;
    use rand_core::OsRng;

    #[test]
    fn test_directory_publish_fetch() {
        let directory = InMemoryDirectory::new();
        let identity = IdentityKeyPair::generate(&mut OsRng).unwrap();
        let prekeys = PrekeyState::generate(&mut OsRng, &identity, 1).unwrap();

        directory.publish("bob", &prekeys.public_bundle()).unwrap();
        let fetched = directory.fetch("bob").unwrap();
        fetched.verify().unwrap();
        assert_eq!(fetched.identity_key, identity.public_key());
    }

    #[test]
    fn test_directory_miss() {
        let directory = InMemoryDirectory::new();
        assert_eq!(
            directory.fetch("nobody").map(|_| ()),
            Err(Error::DirectoryMiss)
        );
    }

    #[test]
    fn test_directory_last_writer_wins() {
        let directory = InMemoryDirectory::new();
        let identity = IdentityKeyPair::generate(&mut OsRng).unwrap();

        let first = PrekeyState::generate(&mut OsRng, &identity, 0).unwrap();
        let second = PrekeyState::generate(&mut OsRng, &identity, 0).unwrap();

        directory.publish("bob", &first.public_bundle()).unwrap();
        directory.publish("bob", &second.public_bundle()).unwrap();

        let fetched = directory.fetch("bob").unwrap();
        assert_eq!(fetched.signed_prekey, second.public_bundle().signed_prekey);
    }

    #[test]
    fn test_session_store_roundtrip() {
        let store = InMemorySessionStore::new();
        let key = session_key("alice", "bob");
        assert_eq!(key, "client:ratchet:alice:bob");

        assert!(store.get(&key).unwrap().is_none());
        store.put(&key, vec![1, 2, 3]).unwrap();
        assert_eq!(store.get(&key).unwrap(), Some(vec![1, 2, 3]));

        store.remove(&key).unwrap();
        assert!(store.get(&key).unwrap().is_none());
    }
}
