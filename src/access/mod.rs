//! Scoped folder access backed by persisted bookmark records.
//!
//! [`AccessBroker::acquire`] turns a stored record into a live [`AccessGrant`] after checking it
//! against the home-directory boundary and the record's own scope. Any record that fails those
//! checks is deleted rather than just refused, so a tampered record cannot be replayed.
//!
//! Grants release themselves when dropped, and at most one grant per key is live at a time.
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{Error, GrantDenial, Result};

mod resolver;
mod store;

pub use resolver::{BookmarkResolver, PathBookmarkResolver, ResolvedBookmark};
#[cfg(feature = "keyring")]
pub use store::KeyringBookmarkStore;
pub use store::{BookmarkRecord, BookmarkScope, BookmarkStore, MemoryBookmarkStore};

/// Relative to home; folders here belong to sandboxed apps, not the user.
const SANDBOX_CONTAINERS: &str = "Library/Containers";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantKind {
    /// The key names a standard folder (`Desktop`, `Downloads`, ...).
    WellKnown,
    /// A user-picked folder pinned to its current path.
    Custom,
}

struct BrokerInner {
    store: Arc<dyn BookmarkStore>,
    resolver: Arc<dyn BookmarkResolver>,
    home: PathBuf,
    acquire_timeout: Duration,
    active: Mutex<HashSet<String>>,
    released: Condvar,
}

#[derive(Clone)]
pub struct AccessBroker {
    inner: Arc<BrokerInner>,
}

impl std::fmt::Debug for AccessBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessBroker")
            .field("home", &self.inner.home)
            .field("acquire_timeout", &self.inner.acquire_timeout)
            .finish_non_exhaustive()
    }
}

impl AccessBroker {
    /// `home` must be canonical; it is the boundary every resolved folder must stay inside.
    pub fn new(
        store: Arc<dyn BookmarkStore>,
        resolver: Arc<dyn BookmarkResolver>,
        home: PathBuf,
        acquire_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                store,
                resolver,
                home,
                acquire_timeout,
                active: Mutex::new(HashSet::new()),
                released: Condvar::new(),
            }),
        }
    }

    pub fn home(&self) -> &Path {
        &self.inner.home
    }

    pub fn store(&self) -> &Arc<dyn BookmarkStore> {
        &self.inner.store
    }

    /// Record the user's decision to grant access to `folder` under `key`.
    ///
    /// Folders outside home are refused up front and nothing is stored.
    pub fn grant_folder(
        &self,
        key: &str,
        folder: &Path,
        kind: GrantKind,
    ) -> Result<BookmarkRecord> {
        if key.trim().is_empty() {
            return Err(Error::InvalidPolicy("bookmark key is empty".to_string()));
        }
        let canonical = folder
            .canonicalize()
            .map_err(|err| Error::io_path("canonicalize", folder, err))?;
        if !self.within_boundary(&canonical) {
            return Err(Error::GrantDenied(GrantDenial::BoundaryViolation));
        }
        let scope = match kind {
            GrantKind::WellKnown => {
                if !name_matches(&canonical, key) {
                    return Err(Error::GrantDenied(GrantDenial::NameMismatch));
                }
                BookmarkScope::WellKnown {
                    folder_name: key.to_string(),
                }
            }
            GrantKind::Custom => BookmarkScope::Custom {
                recorded_path: canonical.clone(),
            },
        };
        let record = BookmarkRecord {
            key: key.to_string(),
            scope,
            opaque_data: self.inner.resolver.create(&canonical)?,
        };
        self.inner.store.save(record.clone())?;
        debug!(key, folder = %canonical.display(), "bookmark granted");
        Ok(record)
    }

    /// Forget the record for `key`. Returns whether one existed.
    pub fn revoke(&self, key: &str) -> Result<bool> {
        self.inner.store.delete(key)
    }

    /// Resolve the record for `key` into an active grant.
    ///
    /// Waits (up to the configured timeout) while another grant for the same key is live.
    pub fn acquire(&self, key: &str) -> Result<AccessGrant> {
        let slot = self.claim(key)?;

        let record = self
            .inner
            .store
            .load(key)?
            .ok_or(Error::GrantDenied(GrantDenial::NotFound))?;

        let resolved = match self.inner.resolver.resolve(&record.opaque_data) {
            Ok(resolved) => resolved,
            Err(err) => {
                debug!(key, error = %err, "bookmark failed to resolve");
                return Err(self.deny(key, GrantDenial::Stale));
            }
        };
        if resolved.is_stale {
            return Err(self.deny(key, GrantDenial::Stale));
        }
        let Ok(folder) = resolved.folder.canonicalize() else {
            return Err(self.deny(key, GrantDenial::Stale));
        };
        if !self.within_boundary(&folder) {
            debug!(key, folder = %folder.display(), "bookmark resolved outside home");
            return Err(self.deny(key, GrantDenial::BoundaryViolation));
        }
        match &record.scope {
            BookmarkScope::WellKnown { folder_name } => {
                if !name_matches(&folder, folder_name) {
                    return Err(self.deny(key, GrantDenial::NameMismatch));
                }
            }
            BookmarkScope::Custom { recorded_path } => {
                if &folder != recorded_path {
                    return Err(self.deny(key, GrantDenial::PathMismatch));
                }
            }
        }

        if !self.inner.resolver.start_access(&folder) {
            return Err(self.deny(key, GrantDenial::Stale));
        }

        Ok(AccessGrant {
            inner: Arc::clone(&self.inner),
            key: key.to_string(),
            folder,
            slot: Some(slot),
        })
    }

    fn within_boundary(&self, canonical: &Path) -> bool {
        let home = &self.inner.home;
        canonical.starts_with(home) && !canonical.starts_with(home.join(SANDBOX_CONTAINERS))
    }

    fn deny(&self, key: &str, reason: GrantDenial) -> Error {
        if reason.deletes_record() {
            match self.inner.store.delete(key) {
                Ok(_) => warn!(key, %reason, "bookmark record deleted"),
                Err(err) => warn!(key, %reason, error = %err, "failed to delete bookmark record"),
            }
        }
        Error::GrantDenied(reason)
    }

    fn claim(&self, key: &str) -> Result<KeySlot> {
        let deadline = Instant::now() + self.inner.acquire_timeout;
        let mut active = self
            .inner
            .active
            .lock()
            .map_err(|_| Error::Store("access broker lock poisoned".to_string()))?;
        while active.contains(key) {
            let now = Instant::now();
            if now >= deadline {
                return Err(Error::Timeout("acquire"));
            }
            let (guard, _) = self
                .inner
                .released
                .wait_timeout(active, deadline - now)
                .map_err(|_| Error::Store("access broker lock poisoned".to_string()))?;
            active = guard;
        }
        active.insert(key.to_string());
        Ok(KeySlot {
            inner: Arc::clone(&self.inner),
            key: key.to_string(),
        })
    }
}

fn name_matches(folder: &Path, expected: &str) -> bool {
    folder
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.eq_ignore_ascii_case(expected))
}

/// Exclusive claim on a key; frees the key for the next waiter when dropped.
struct KeySlot {
    inner: Arc<BrokerInner>,
    key: String,
}

impl Drop for KeySlot {
    fn drop(&mut self) {
        let mut active = self
            .inner
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        active.remove(&self.key);
        drop(active);
        self.inner.released.notify_all();
    }
}

/// Temporary permission to operate inside one granted folder.
///
/// Active from acquisition until [`AccessGrant::release`] or drop, whichever comes first.
pub struct AccessGrant {
    inner: Arc<BrokerInner>,
    key: String,
    folder: PathBuf,
    slot: Option<KeySlot>,
}

impl std::fmt::Debug for AccessGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessGrant")
            .field("key", &self.key)
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

impl AccessGrant {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn resolved_folder(&self) -> &Path {
        &self.folder
    }

    pub fn is_active(&self) -> bool {
        self.slot.is_some()
    }

    /// Whether `canonical` is the granted folder or inside it.
    pub fn covers(&self, canonical: &Path) -> bool {
        canonical.starts_with(&self.folder)
    }

    /// Idempotent; later calls are no-ops.
    pub fn release(&mut self) {
        if let Some(slot) = self.slot.take() {
            self.inner.resolver.stop_access(&self.folder);
            drop(slot);
        }
    }
}

impl Drop for AccessGrant {
    fn drop(&mut self) {
        self.release();
    }
}
