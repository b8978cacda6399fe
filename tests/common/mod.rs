#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use safe_relocate::{GrantKind, MemoryBookmarkStore, RelocationPolicy, Relocator};

#[cfg(unix)]
pub mod unix_helpers;

/// A throwaway home directory. `path` is canonical.
pub struct TestHome {
    _dir: tempfile::TempDir,
    pub path: PathBuf,
}

impl TestHome {
    pub fn new(folders: &[&str]) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("home");
        std::fs::create_dir(&path).expect("create home");
        let path = path.canonicalize().expect("canonicalize home");
        for folder in folders {
            std::fs::create_dir_all(path.join(folder)).expect("create folder");
        }
        Self { _dir: dir, path }
    }

    pub fn join(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.path.join(relative)
    }

    pub fn write(&self, relative: impl AsRef<Path>, contents: impl AsRef<[u8]>) -> PathBuf {
        let path = self.join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create parent");
        }
        std::fs::write(&path, contents).expect("write file");
        path
    }
}

/// Defaults with the pause between moves disabled.
pub fn fast_policy(home: &Path) -> RelocationPolicy {
    let mut policy = RelocationPolicy::with_home(home);
    policy.batch.operation_delay_ms = 0;
    policy
}

pub fn relocator(policy: RelocationPolicy) -> Arc<Relocator> {
    Arc::new(
        Relocator::with_store(policy, Arc::new(MemoryBookmarkStore::new()))
            .expect("relocator"),
    )
}

/// A relocator over `home` with well-known grants for each of `keys` (folders named alike).
pub fn granted_relocator(home: &TestHome, keys: &[&str]) -> Arc<Relocator> {
    let relocator = relocator(fast_policy(&home.path));
    for key in keys {
        relocator
            .broker()
            .grant_folder(key, &home.join(key), GrantKind::WellKnown)
            .expect("grant");
    }
    relocator
}
