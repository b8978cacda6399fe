//! `safe-relocate` moves user files into sanitized folders under the home directory without
//! following symlinks, escaping the home boundary, or replacing existing files.
//!
//! A move runs through five stages: destination sanitizing ([`sanitize`]), handle-bound source
//! validation ([`validate`]), scoped folder access ([`access`]), the move itself ([`relocate`]),
//! and rate-limited batching ([`batch`]).

pub mod access;
pub mod batch;
mod error;
pub mod home;
mod platform;
pub mod policy;
#[cfg(feature = "policy-io")]
pub mod policy_io;
pub mod relocate;
pub mod sanitize;
pub mod validate;

pub use error::{
    Error, GrantDenial, PathRejection, RelocationFailure, Result, ValidationFailure,
};

pub use access::{
    AccessBroker, AccessGrant, BookmarkRecord, BookmarkResolver, BookmarkScope, BookmarkStore,
    GrantKind, MemoryBookmarkStore, PathBookmarkResolver, ResolvedBookmark,
};
#[cfg(feature = "keyring")]
pub use access::KeyringBookmarkStore;
pub use batch::{Batch, BatchCoordinator, BatchReport, BatchState, TruncationNotice};
pub use policy::{BatchLimits, IoRules, PathRules, RelocationPolicy};
pub use relocate::{MoveOutcome, MoveResult, ProposedMove, RelocationExecutor, Relocator};
pub use sanitize::{PathSanitizer, SanitizedPath};
pub use validate::{FileIdentity, FileKind, ValidatedFileHandle, validate};
