//! Handle-bound validation of source files.
//!
//! The source is opened first (refusing a final symlink) and every later check reads metadata
//! from the open descriptor. Nothing here stats by path and then acts by path, so swapping the
//! directory entry after validation cannot change which file the handle refers to.
use std::fs;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result, ValidationFailure};

/// File type as reported by the open handle. Only `Regular` may be relocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    Regular,
    RejectedSymlink,
    RejectedDirectory,
    RejectedCharDevice,
    RejectedBlockDevice,
    RejectedFifo,
    RejectedSocket,
    RejectedOther,
}

impl FileKind {
    pub fn from_file_type(file_type: fs::FileType) -> Self {
        if file_type.is_file() {
            return Self::Regular;
        }
        if file_type.is_symlink() {
            return Self::RejectedSymlink;
        }
        if file_type.is_dir() {
            return Self::RejectedDirectory;
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::FileTypeExt;

            if file_type.is_char_device() {
                return Self::RejectedCharDevice;
            }
            if file_type.is_block_device() {
                return Self::RejectedBlockDevice;
            }
            if file_type.is_fifo() {
                return Self::RejectedFifo;
            }
            if file_type.is_socket() {
                return Self::RejectedSocket;
            }
        }
        Self::RejectedOther
    }

    pub fn is_regular(self) -> bool {
        matches!(self, Self::Regular)
    }

    pub fn rejection(self) -> Option<ValidationFailure> {
        match self {
            Self::Regular => None,
            Self::RejectedSymlink => Some(ValidationFailure::SymlinkRejected),
            Self::RejectedDirectory => Some(ValidationFailure::DirectoryRejected),
            Self::RejectedCharDevice => Some(ValidationFailure::CharDeviceRejected),
            Self::RejectedBlockDevice => Some(ValidationFailure::BlockDeviceRejected),
            Self::RejectedFifo => Some(ValidationFailure::FifoRejected),
            Self::RejectedSocket => Some(ValidationFailure::SocketRejected),
            Self::RejectedOther => Some(ValidationFailure::UnsupportedKind),
        }
    }
}

/// Device/inode pair naming a file independently of any path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileIdentity {
    pub dev: u64,
    pub ino: u64,
}

impl FileIdentity {
    #[cfg(unix)]
    pub fn from_metadata(meta: &fs::Metadata) -> Option<Self> {
        use std::os::unix::fs::MetadataExt;

        Some(Self {
            dev: meta.dev(),
            ino: meta.ino(),
        })
    }

    #[cfg(not(unix))]
    pub fn from_metadata(meta: &fs::Metadata) -> Option<Self> {
        let _ = meta;
        None
    }

    /// Identity of whatever currently sits at `path`, without following a final symlink.
    pub fn of_path(path: &Path) -> std::io::Result<Option<Self>> {
        fs::symlink_metadata(path).map(|meta| Self::from_metadata(&meta))
    }
}

/// An open, validated source file.
///
/// The descriptor stays open for as long as this value lives and is closed exactly once when it
/// is dropped, on every exit path.
#[derive(Debug)]
pub struct ValidatedFileHandle {
    file: fs::File,
    path: PathBuf,
    kind: FileKind,
    identity: Option<FileIdentity>,
    len: u64,
    #[cfg(unix)]
    mode: u32,
}

impl ValidatedFileHandle {
    pub fn kind(&self) -> FileKind {
        self.kind
    }

    pub fn identity(&self) -> Option<FileIdentity> {
        self.identity
    }

    /// The path the handle was opened from. Informational only; it may no longer name this file.
    pub fn opened_path(&self) -> &Path {
        &self.path
    }

    pub fn file_name(&self) -> Option<&std::ffi::OsStr> {
        self.path.file_name()
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub(crate) fn file(&self) -> &fs::File {
        &self.file
    }

    #[cfg(unix)]
    pub(crate) fn mode(&self) -> u32 {
        self.mode
    }

    /// Whether the directory entry at the opened path still refers to this handle's file.
    pub fn still_at_opened_path(&self) -> bool {
        match (self.identity, FileIdentity::of_path(&self.path)) {
            (Some(expected), Ok(Some(actual))) => expected == actual,
            (None, Ok(None)) => self.path.exists(),
            _ => false,
        }
    }

    /// Stream the file's bytes from the open descriptor, starting at offset zero.
    pub(crate) fn rewind_reader(&self) -> std::io::Result<impl Read + '_> {
        let mut file = &self.file;
        file.seek(SeekFrom::Start(0))?;
        Ok(file)
    }
}

#[cfg(unix)]
const OWNER_READ: u32 = 0o400;

/// Open `source_path` without following a final symlink and confirm it is a regular file whose
/// owner-read bit is set.
///
/// Hard links are ordinary regular files and are accepted.
pub fn validate(source_path: &Path) -> Result<ValidatedFileHandle> {
    let file = crate::platform::open_readonly_nofollow(source_path)
        .map_err(|err| classify_open_error(source_path, &err))?;
    let meta = file.metadata().map_err(|err| {
        tracing::debug!(path = %source_path.display(), error = %err, "fstat failed");
        Error::ValidationFailed(ValidationFailure::Unreadable)
    })?;

    let kind = FileKind::from_file_type(meta.file_type());
    if let Some(reason) = kind.rejection() {
        drop(file);
        tracing::debug!(path = %source_path.display(), ?kind, "source rejected by type");
        return Err(Error::ValidationFailed(reason));
    }

    #[cfg(unix)]
    let mode = {
        use std::os::unix::fs::PermissionsExt;

        let mode = meta.permissions().mode();
        if mode & OWNER_READ == 0 {
            drop(file);
            tracing::debug!(path = %source_path.display(), mode, "owner-read bit missing");
            return Err(Error::ValidationFailed(ValidationFailure::PermissionDenied));
        }
        mode
    };

    Ok(ValidatedFileHandle {
        identity: FileIdentity::from_metadata(&meta),
        len: meta.len(),
        file,
        path: source_path.to_path_buf(),
        kind,
        #[cfg(unix)]
        mode,
    })
}

fn classify_open_error(path: &Path, err: &std::io::Error) -> Error {
    tracing::debug!(path = %path.display(), error = %err, "no-follow open failed");
    if crate::platform::is_symlink_open_error(err) {
        return Error::ValidationFailed(ValidationFailure::SymlinkRejected);
    }
    #[cfg(unix)]
    {
        let raw = err.raw_os_error();
        // Sockets cannot be opened; classify the entry only to report a precise rejection.
        if (raw == Some(libc::ENXIO) || raw == Some(libc::EOPNOTSUPP))
            && let Ok(meta) = fs::symlink_metadata(path)
            && let Some(reason) = FileKind::from_file_type(meta.file_type()).rejection()
        {
            return Error::ValidationFailed(reason);
        }
    }
    let reason = match err.kind() {
        std::io::ErrorKind::NotFound => ValidationFailure::NotFound,
        std::io::ErrorKind::PermissionDenied => ValidationFailure::PermissionDenied,
        _ => ValidationFailure::Unreadable,
    };
    Error::ValidationFailed(reason)
}
