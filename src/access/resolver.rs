use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::validate::FileIdentity;

/// A bookmark turned back into a concrete folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedBookmark {
    pub folder: PathBuf,
    /// The OS considers the token outdated; the user has to grant access again.
    pub is_stale: bool,
}

/// The OS access-control layer that issues and interprets bookmark blobs.
pub trait BookmarkResolver: Send + Sync {
    /// Issue a new opaque token for `folder`.
    fn create(&self, folder: &Path) -> Result<Vec<u8>>;

    fn resolve(&self, opaque_data: &[u8]) -> Result<ResolvedBookmark>;

    /// Begin using a security-scoped resource. Returning `false` means access was refused.
    fn start_access(&self, folder: &Path) -> bool {
        let _ = folder;
        true
    }

    fn stop_access(&self, folder: &Path) {
        let _ = folder;
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct PathBookmark {
    path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    identity: Option<FileIdentity>,
}

/// Resolver for hosts without OS-issued bookmarks.
///
/// The blob records the folder's canonical path and `(dev, ino)`. It goes stale when the folder
/// disappears or the path now names a different directory.
#[derive(Debug, Clone, Copy, Default)]
pub struct PathBookmarkResolver;

impl BookmarkResolver for PathBookmarkResolver {
    fn create(&self, folder: &Path) -> Result<Vec<u8>> {
        let canonical = folder
            .canonicalize()
            .map_err(|err| Error::io_path("canonicalize", folder, err))?;
        let meta =
            fs::metadata(&canonical).map_err(|err| Error::io_path("metadata", folder, err))?;
        if !meta.is_dir() {
            return Err(Error::InvalidPolicy(format!(
                "bookmark target {} is not a directory",
                folder.display()
            )));
        }
        let bookmark = PathBookmark {
            path: canonical,
            identity: FileIdentity::from_metadata(&meta),
        };
        Ok(serde_json::to_vec(&bookmark)?)
    }

    fn resolve(&self, opaque_data: &[u8]) -> Result<ResolvedBookmark> {
        let bookmark: PathBookmark = serde_json::from_slice(opaque_data)?;
        let stale = |folder: PathBuf| ResolvedBookmark {
            folder,
            is_stale: true,
        };

        let meta = match fs::symlink_metadata(&bookmark.path) {
            Ok(meta) => meta,
            Err(_) => return Ok(stale(bookmark.path)),
        };
        if !meta.is_dir() || FileIdentity::from_metadata(&meta) != bookmark.identity {
            return Ok(stale(bookmark.path));
        }
        let folder = match bookmark.path.canonicalize() {
            Ok(folder) => folder,
            Err(_) => return Ok(stale(bookmark.path)),
        };
        Ok(ResolvedBookmark {
            folder,
            is_stale: false,
        })
    }
}
