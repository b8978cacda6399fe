use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// What a record is allowed to resolve to, beyond the home-directory boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BookmarkScope {
    /// A fixed folder such as `Desktop`; the resolved folder's name must match.
    WellKnown { folder_name: String },
    /// A user-picked folder; the resolved path must equal the path recorded at grant time.
    Custom { recorded_path: PathBuf },
}

/// Persisted, per-folder access token.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookmarkRecord {
    pub key: String,
    pub scope: BookmarkScope,
    /// Understood only by the [`BookmarkResolver`](super::BookmarkResolver) that produced it.
    pub opaque_data: Vec<u8>,
}

impl std::fmt::Debug for BookmarkRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BookmarkRecord")
            .field("key", &self.key)
            .field("scope", &self.scope)
            .field("opaque_len", &self.opaque_data.len())
            .finish()
    }
}

/// Keyed storage for bookmark records.
///
/// Reads may run concurrently; `save` and `delete` must each be atomic for their key.
/// Production stores must keep records out of plaintext shared state.
pub trait BookmarkStore: Send + Sync {
    fn save(&self, record: BookmarkRecord) -> Result<()>;
    fn load(&self, key: &str) -> Result<Option<BookmarkRecord>>;
    /// Returns whether a record was present.
    fn delete(&self, key: &str) -> Result<bool>;
}

/// Process-local store. Records vanish with the process, which also keeps them out of any
/// shared on-disk state.
#[derive(Debug, Default)]
pub struct MemoryBookmarkStore {
    records: RwLock<HashMap<String, BookmarkRecord>>,
}

impl MemoryBookmarkStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records
            .read()
            .map(|records| records.len())
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned() -> Error {
    Error::Store("bookmark store lock poisoned".to_string())
}

impl BookmarkStore for MemoryBookmarkStore {
    fn save(&self, record: BookmarkRecord) -> Result<()> {
        let mut records = self.records.write().map_err(|_| poisoned())?;
        records.insert(record.key.clone(), record);
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<BookmarkRecord>> {
        let records = self.records.read().map_err(|_| poisoned())?;
        Ok(records.get(key).cloned())
    }

    fn delete(&self, key: &str) -> Result<bool> {
        let mut records = self.records.write().map_err(|_| poisoned())?;
        Ok(records.remove(key).is_some())
    }
}

/// Records kept in the OS credential store (Keychain, Secret Service, Credential Manager), one
/// entry per key under a shared service name.
#[cfg(feature = "keyring")]
#[derive(Debug, Clone)]
pub struct KeyringBookmarkStore {
    service_name: String,
}

#[cfg(feature = "keyring")]
impl KeyringBookmarkStore {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }

    fn entry(&self, key: &str) -> Result<keyring::Entry> {
        keyring::Entry::new(&self.service_name, key)
            .map_err(|err| Error::Store(format!("keyring entry for {key:?}: {err}")))
    }
}

#[cfg(feature = "keyring")]
impl BookmarkStore for KeyringBookmarkStore {
    fn save(&self, record: BookmarkRecord) -> Result<()> {
        let bytes = serde_json::to_vec(&record)?;
        self.entry(&record.key)?
            .set_secret(&bytes)
            .map_err(|err| Error::Store(format!("keyring save for {:?}: {err}", record.key)))
    }

    fn load(&self, key: &str) -> Result<Option<BookmarkRecord>> {
        match self.entry(key)?.get_secret() {
            Ok(bytes) => {
                let record: BookmarkRecord = serde_json::from_slice(&bytes)?;
                if record.key != key {
                    return Err(Error::Store(format!(
                        "keyring entry {key:?} holds a record for another key"
                    )));
                }
                Ok(Some(record))
            }
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(err) => Err(Error::Store(format!("keyring load for {key:?}: {err}"))),
        }
    }

    fn delete(&self, key: &str) -> Result<bool> {
        match self.entry(key)?.delete_credential() {
            Ok(()) => Ok(true),
            Err(keyring::Error::NoEntry) => Ok(false),
            Err(err) => Err(Error::Store(format!("keyring delete for {key:?}: {err}"))),
        }
    }
}
