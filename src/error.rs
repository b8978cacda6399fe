use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why the Path Sanitizer refused a destination.
///
/// Messages only ever echo the offending fragment the caller supplied, never a resolved absolute
/// path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
#[non_exhaustive]
pub enum PathRejection {
    Empty,
    NulByte,
    Absolute,
    HomeShorthand,
    SystemPrefix { prefix: String },
    TooLong { chars: usize, max_chars: usize },
    DotComponent,
    ComponentTooLong { chars: usize, max_chars: usize },
    ForbiddenCharacter { character: char },
    ReservedName { name: String },
    EscapesBoundary,
}

impl fmt::Display for PathRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "path is empty"),
            Self::NulByte => write!(f, "path contains a null byte"),
            Self::Absolute => write!(f, "absolute paths are not allowed"),
            Self::HomeShorthand => write!(f, "home shorthand '~' is not allowed"),
            Self::SystemPrefix { prefix } => {
                write!(f, "path references a system location ({prefix})")
            }
            Self::TooLong { chars, max_chars } => {
                write!(f, "path is too long ({chars} chars; max {max_chars})")
            }
            Self::DotComponent => write!(f, "'.' and '..' components are not allowed"),
            Self::ComponentTooLong { chars, max_chars } => write!(
                f,
                "path component is too long ({chars} chars; max {max_chars})"
            ),
            Self::ForbiddenCharacter { character } => {
                write!(f, "path contains forbidden character {character:?}")
            }
            Self::ReservedName { name } => write!(f, "{name:?} is a reserved system name"),
            Self::EscapesBoundary => write!(f, "escapes boundary"),
        }
    }
}

/// Why the Secure File Validator refused a source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum ValidationFailure {
    SymlinkRejected,
    NotFound,
    PermissionDenied,
    DirectoryRejected,
    CharDeviceRejected,
    BlockDeviceRejected,
    FifoRejected,
    SocketRejected,
    UnsupportedKind,
    Unreadable,
    NotAbsolute,
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            Self::SymlinkRejected => "source is a symbolic link",
            Self::NotFound => "source not found",
            Self::PermissionDenied => "source is not readable by its owner",
            Self::DirectoryRejected => "source is a directory",
            Self::CharDeviceRejected => "source is a character device",
            Self::BlockDeviceRejected => "source is a block device",
            Self::FifoRejected => "source is a fifo",
            Self::SocketRejected => "source is a socket",
            Self::UnsupportedKind => "source is not a regular file",
            Self::Unreadable => "source could not be opened",
            Self::NotAbsolute => "source path must be absolute",
        };
        f.write_str(message)
    }
}

/// Why the Scoped Access Broker refused a grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum GrantDenial {
    NotFound,
    Stale,
    BoundaryViolation,
    NameMismatch,
    PathMismatch,
    SourceOutsideGrant,
    Inactive,
}

impl GrantDenial {
    /// Whether the broker deletes the offending record when this denial is raised.
    pub fn deletes_record(self) -> bool {
        matches!(
            self,
            Self::Stale | Self::BoundaryViolation | Self::NameMismatch | Self::PathMismatch
        )
    }
}

impl fmt::Display for GrantDenial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            Self::NotFound => "record not found",
            Self::Stale => "folder access is stale and must be granted again",
            Self::BoundaryViolation => "granted folder is outside the home directory",
            Self::NameMismatch => "granted folder does not match the expected folder name",
            Self::PathMismatch => "granted folder does not match the recorded path",
            Self::SourceOutsideGrant => "source is outside the granted folder",
            Self::Inactive => "access grant is no longer active",
        };
        f.write_str(message)
    }
}

/// Why the Relocation Executor could not complete a move after every check passed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
#[non_exhaustive]
pub enum RelocationFailure {
    SourceNotFound,
    DestinationExists,
    PermissionDenied,
    DiskFull,
    FileInUse,
    SystemPermissionDenied,
    OperationFailed(String),
}

impl RelocationFailure {
    /// Classify an OS error. The detail string never carries a path: `io::Error` values created
    /// by the OS render as `"<description> (os error N)"`.
    pub fn from_io(err: &std::io::Error) -> Self {
        #[cfg(unix)]
        if let Some(code) = err.raw_os_error() {
            match code {
                libc::ENOSPC | libc::EDQUOT => return Self::DiskFull,
                libc::EBUSY | libc::ETXTBSY => return Self::FileInUse,
                libc::EPERM => return Self::SystemPermissionDenied,
                libc::EACCES => return Self::PermissionDenied,
                _ => {}
            }
        }
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::SourceNotFound,
            std::io::ErrorKind::AlreadyExists => Self::DestinationExists,
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied,
            std::io::ErrorKind::StorageFull => Self::DiskFull,
            std::io::ErrorKind::ResourceBusy => Self::FileInUse,
            _ => Self::OperationFailed(err.to_string()),
        }
    }
}

impl fmt::Display for RelocationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SourceNotFound => f.write_str("source not found"),
            Self::DestinationExists => f.write_str("destination exists"),
            Self::PermissionDenied => f.write_str("permission denied"),
            Self::DiskFull => f.write_str("disk full"),
            Self::FileInUse => f.write_str("file in use"),
            Self::SystemPermissionDenied => f.write_str("operation not permitted by the system"),
            Self::OperationFailed(detail) => write!(f, "operation failed: {detail}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("io error during {op} ({}): {source}", .path.display())]
    IoPath {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid policy: {0}")]
    InvalidPolicy(String),

    #[error("invalid utf-8 in file: {0}")]
    InvalidUtf8(PathBuf),

    #[error("input is too large ({size_bytes} bytes; max {max_bytes} bytes)")]
    InputTooLarge { size_bytes: u64, max_bytes: u64 },

    #[error("path rejected: {0}")]
    PathRejected(PathRejection),

    #[error("validation failed: {0}")]
    ValidationFailed(ValidationFailure),

    #[error("grant denied: {0}")]
    GrantDenied(GrantDenial),

    #[error("relocation failed: {0}")]
    Relocation(RelocationFailure),

    #[error("bookmark store error: {0}")]
    Store(String),

    #[error("{0} timed out")]
    Timeout(&'static str),
}

impl Error {
    pub const CODE_IO: &'static str = "io";
    pub const CODE_IO_PATH: &'static str = "io_path";
    pub const CODE_JSON: &'static str = "json";
    pub const CODE_INVALID_POLICY: &'static str = "invalid_policy";
    pub const CODE_INVALID_UTF8: &'static str = "invalid_utf8";
    pub const CODE_INPUT_TOO_LARGE: &'static str = "input_too_large";
    pub const CODE_PATH_REJECTED: &'static str = "path_rejected";
    pub const CODE_VALIDATION_FAILED: &'static str = "validation_failed";
    pub const CODE_GRANT_DENIED: &'static str = "grant_denied";
    pub const CODE_RELOCATION_FAILED: &'static str = "relocation_failed";
    pub const CODE_STORE: &'static str = "store";
    pub const CODE_TIMEOUT: &'static str = "timeout";

    pub fn code(&self) -> &'static str {
        match self {
            Self::Io(_) => Self::CODE_IO,
            Self::IoPath { .. } => Self::CODE_IO_PATH,
            Self::Json(_) => Self::CODE_JSON,
            Self::InvalidPolicy(_) => Self::CODE_INVALID_POLICY,
            Self::InvalidUtf8(_) => Self::CODE_INVALID_UTF8,
            Self::InputTooLarge { .. } => Self::CODE_INPUT_TOO_LARGE,
            Self::PathRejected(_) => Self::CODE_PATH_REJECTED,
            Self::ValidationFailed(_) => Self::CODE_VALIDATION_FAILED,
            Self::GrantDenied(_) => Self::CODE_GRANT_DENIED,
            Self::Relocation(_) => Self::CODE_RELOCATION_FAILED,
            Self::Store(_) => Self::CODE_STORE,
            Self::Timeout(_) => Self::CODE_TIMEOUT,
        }
    }

    pub(crate) fn io_path(op: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::IoPath {
            op,
            path: path.to_path_buf(),
            source,
        }
    }
}

impl From<PathRejection> for Error {
    fn from(reason: PathRejection) -> Self {
        Self::PathRejected(reason)
    }
}

impl From<ValidationFailure> for Error {
    fn from(reason: ValidationFailure) -> Self {
        Self::ValidationFailed(reason)
    }
}

impl From<GrantDenial> for Error {
    fn from(reason: GrantDenial) -> Self {
        Self::GrantDenied(reason)
    }
}

impl From<RelocationFailure> for Error {
    fn from(reason: RelocationFailure) -> Self {
        Self::Relocation(reason)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relocation_failure_maps_common_errnos() {
        let exists = std::io::Error::from(std::io::ErrorKind::AlreadyExists);
        assert_eq!(
            RelocationFailure::from_io(&exists),
            RelocationFailure::DestinationExists
        );
        let missing = std::io::Error::from(std::io::ErrorKind::NotFound);
        assert_eq!(
            RelocationFailure::from_io(&missing),
            RelocationFailure::SourceNotFound
        );
    }

    #[cfg(unix)]
    #[test]
    fn relocation_failure_distinguishes_eperm_from_eacces() {
        let eperm = std::io::Error::from_raw_os_error(libc::EPERM);
        let eacces = std::io::Error::from_raw_os_error(libc::EACCES);
        let enospc = std::io::Error::from_raw_os_error(libc::ENOSPC);
        assert_eq!(
            RelocationFailure::from_io(&eperm),
            RelocationFailure::SystemPermissionDenied
        );
        assert_eq!(
            RelocationFailure::from_io(&eacces),
            RelocationFailure::PermissionDenied
        );
        assert_eq!(RelocationFailure::from_io(&enospc), RelocationFailure::DiskFull);
    }

    #[test]
    fn only_boundary_denials_delete_records() {
        assert!(GrantDenial::Stale.deletes_record());
        assert!(GrantDenial::BoundaryViolation.deletes_record());
        assert!(GrantDenial::NameMismatch.deletes_record());
        assert!(GrantDenial::PathMismatch.deletes_record());
        assert!(!GrantDenial::NotFound.deletes_record());
        assert!(!GrantDenial::SourceOutsideGrant.deletes_record());
    }

    #[test]
    fn codes_are_stable() {
        assert_eq!(
            Error::from(PathRejection::Empty).code(),
            Error::CODE_PATH_REJECTED
        );
        assert_eq!(Error::from(GrantDenial::Stale).code(), "grant_denied");
        assert_eq!(Error::Timeout("move").to_string(), "move timed out");
    }
}
