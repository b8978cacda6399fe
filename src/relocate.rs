//! Moving one validated file into its sanitized destination.
//!
//! [`RelocationExecutor`] performs the move itself. [`Relocator`] runs the full per-proposal
//! pipeline: sanitize the destination, validate the source, acquire the folder grant, execute,
//! release.
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::access::{
    AccessBroker, AccessGrant, BookmarkResolver, BookmarkStore, PathBookmarkResolver,
};
use crate::error::{
    Error, GrantDenial, PathRejection, RelocationFailure, Result, ValidationFailure,
};
use crate::platform;
use crate::policy::RelocationPolicy;
use crate::sanitize::{self, PathSanitizer, SanitizedPath};
use crate::validate::{self, FileIdentity, ValidatedFileHandle};

/// A requested relocation, as produced by the categorization layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposedMove {
    /// Absolute path of the file to move.
    pub source_path: PathBuf,
    /// Destination folder, relative to the home directory. Untrusted.
    pub destination_relative_path: String,
    /// Bookmark key of the folder that contains the source. Defaults to the name of the
    /// source's parent directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_key: Option<String>,
}

impl ProposedMove {
    pub fn new(source_path: impl Into<PathBuf>, destination: impl Into<String>) -> Self {
        Self {
            source_path: source_path.into(),
            destination_relative_path: destination.into(),
            access_key: None,
        }
    }

    pub fn with_access_key(mut self, key: impl Into<String>) -> Self {
        self.access_key = Some(key.into());
        self
    }

    pub fn effective_access_key(&self) -> Option<String> {
        if let Some(key) = &self.access_key {
            return Some(key.clone());
        }
        self.source_path
            .parent()
            .and_then(Path::file_name)
            .and_then(|name| name.to_str())
            .map(str::to_string)
    }
}

/// How a single proposal ended. Reasons are human-readable and never contain paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum MoveOutcome {
    Succeeded,
    FailedValidation(String),
    FailedPermission(String),
    FailedIo(RelocationFailure),
}

impl MoveOutcome {
    pub fn from_error(err: &Error) -> Self {
        match err {
            Error::PathRejected(reason) => Self::FailedValidation(reason.to_string()),
            Error::ValidationFailed(ValidationFailure::PermissionDenied) => {
                Self::FailedPermission(ValidationFailure::PermissionDenied.to_string())
            }
            Error::ValidationFailed(reason) => Self::FailedValidation(reason.to_string()),
            Error::GrantDenied(reason) => Self::FailedPermission(reason.to_string()),
            Error::Store(_) => Self::FailedPermission("bookmark store unavailable".to_string()),
            Error::Relocation(failure) => Self::FailedIo(failure.clone()),
            Error::Timeout(_) => {
                Self::FailedIo(RelocationFailure::OperationFailed("timeout".to_string()))
            }
            Error::Io(source) | Error::IoPath { source, .. } => {
                Self::FailedIo(RelocationFailure::from_io(source))
            }
            Error::Json(_)
            | Error::InvalidPolicy(_)
            | Error::InvalidUtf8(_)
            | Error::InputTooLarge { .. } => Self::FailedValidation(err.code().to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveResult {
    pub source_path: PathBuf,
    /// Where the file now lives. Set only on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_path: Option<PathBuf>,
    pub outcome: MoveOutcome,
}

impl MoveResult {
    pub fn succeeded(source_path: PathBuf, destination_path: PathBuf) -> Self {
        Self {
            source_path,
            destination_path: Some(destination_path),
            outcome: MoveOutcome::Succeeded,
        }
    }

    pub fn failed(source_path: PathBuf, err: &Error) -> Self {
        Self {
            source_path,
            destination_path: None,
            outcome: MoveOutcome::from_error(err),
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MoveMethod {
    /// New name linked to the open descriptor, old name removed.
    Linked,
    Renamed,
    /// Cross-device: bytes streamed from the descriptor.
    Copied,
}

/// Performs the filesystem side of a move for an already validated handle.
#[derive(Debug, Clone)]
pub struct RelocationExecutor {
    home: PathBuf,
    sanitizer: PathSanitizer,
    create_parents: bool,
}

impl RelocationExecutor {
    /// `home` must be canonical.
    pub fn new(home: PathBuf, sanitizer: PathSanitizer, create_parents: bool) -> Self {
        Self {
            home,
            sanitizer,
            create_parents,
        }
    }

    /// Move the file behind `handle` to `<home>/<destination>/<file name>`.
    ///
    /// Consumes the handle; it is closed before this returns, whatever the outcome. Never
    /// replaces an existing destination and never rolls back a completed move.
    pub fn execute(
        &self,
        handle: ValidatedFileHandle,
        destination: &SanitizedPath,
        grant: &AccessGrant,
    ) -> MoveResult {
        let source_path = handle.opened_path().to_path_buf();
        match self.execute_inner(handle, destination, grant) {
            Ok(dest) => MoveResult::succeeded(source_path, dest),
            Err(err) => {
                debug!(source = %source_path.display(), error = %err, "move failed");
                MoveResult::failed(source_path, &err)
            }
        }
    }

    fn execute_inner(
        &self,
        handle: ValidatedFileHandle,
        destination: &SanitizedPath,
        grant: &AccessGrant,
    ) -> Result<PathBuf> {
        if let Some(reason) = handle.kind().rejection() {
            return Err(Error::ValidationFailed(reason));
        }
        if !grant.is_active() {
            return Err(Error::GrantDenied(GrantDenial::Inactive));
        }
        let file_name = handle
            .file_name()
            .ok_or(Error::ValidationFailed(ValidationFailure::Unreadable))?
            .to_os_string();
        if let Some(name) = file_name.to_str()
            && sanitize::is_reserved_name(name, &self.sanitizer.rules().extra_reserved_names)
        {
            return Err(Error::PathRejected(PathRejection::ReservedName {
                name: name.to_string(),
            }));
        }

        let dest_dir = self.prepare_destination_dir(destination)?;
        let dest = dest_dir.join(&file_name);
        match fs::symlink_metadata(&dest) {
            Ok(_) => return Err(Error::Relocation(RelocationFailure::DestinationExists)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(Error::Relocation(RelocationFailure::from_io(&err))),
        }

        let method = self.move_file(&handle, &dest)?;
        verify_moved(&handle, &dest, method)?;
        if let Err(err) = platform::sync_move_parents(handle.opened_path(), &dest) {
            warn!(error = %err, "move applied but parent directories were not synced");
        }
        info!(?method, bytes = handle.len(), "file relocated");
        debug!(
            source = %handle.opened_path().display(),
            destination = %dest.display(),
            "relocation detail"
        );
        drop(handle);
        Ok(dest)
    }

    /// Walk `destination` under home one segment at a time, creating missing folders and
    /// re-checking the boundary after each step. Returns the canonical destination folder.
    fn prepare_destination_dir(&self, destination: &SanitizedPath) -> Result<PathBuf> {
        let mut current = self.home.clone();
        for component in destination.components() {
            let next = current.join(component);
            match fs::symlink_metadata(&next) {
                Ok(_) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    if !self.create_parents {
                        return Err(Error::Relocation(RelocationFailure::OperationFailed(
                            "destination folder does not exist".to_string(),
                        )));
                    }
                    self.sanitizer.recheck_component(component)?;
                    match fs::create_dir(&next) {
                        Ok(()) => debug!(folder = %next.display(), "created destination folder"),
                        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {}
                        Err(err) => return Err(Error::Relocation(folder_failure(&err))),
                    }
                }
                Err(err) => return Err(Error::Relocation(folder_failure(&err))),
            }
            current = sanitize::ensure_within(&self.home, &next)?;
            if !current.is_dir() {
                return Err(Error::Relocation(RelocationFailure::OperationFailed(
                    "destination folder is not a directory".to_string(),
                )));
            }
        }
        Ok(current)
    }

    fn move_file(&self, handle: &ValidatedFileHandle, dest: &Path) -> Result<MoveMethod> {
        match platform::link_open_file(handle.file(), dest) {
            Ok(()) => {
                remove_source_entry(handle, dest)?;
                return Ok(MoveMethod::Linked);
            }
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                return Err(Error::Relocation(RelocationFailure::DestinationExists));
            }
            Err(err) if platform::is_cross_device(&err) => {
                return copy_from_handle(handle, dest);
            }
            Err(err) => {
                debug!(error = %err, "descriptor link unavailable, falling back to rename");
            }
        }

        if !handle.still_at_opened_path() {
            return Err(Error::Relocation(RelocationFailure::OperationFailed(
                "source changed since validation".to_string(),
            )));
        }
        match platform::rename_no_replace(handle.opened_path(), dest) {
            Ok(()) => Ok(MoveMethod::Renamed),
            Err(err) if platform::is_cross_device(&err) => copy_from_handle(handle, dest),
            Err(err) => Err(Error::Relocation(RelocationFailure::from_io(&err))),
        }
    }
}

fn folder_failure(err: &io::Error) -> RelocationFailure {
    match RelocationFailure::from_io(err) {
        RelocationFailure::SourceNotFound => {
            RelocationFailure::OperationFailed("destination folder vanished".to_string())
        }
        other => other,
    }
}

/// Remove the source's directory entry after the file is reachable at `dest`.
///
/// The entry is removed only while it still names the validated file; a swapped-in entry is left
/// alone. If removal fails the new name is unlinked again so the file is not left in two places.
fn remove_source_entry(handle: &ValidatedFileHandle, dest: &Path) -> Result<()> {
    let source = handle.opened_path();
    let removed = match handle.identity() {
        Some(expected) => platform::unlink_if_identity(source, expected),
        None if handle.still_at_opened_path() => {
            fs::remove_file(source).map(|()| platform::UnlinkOutcome::Removed)
        }
        None => Ok(platform::UnlinkOutcome::Replaced),
    };
    match removed {
        Ok(platform::UnlinkOutcome::Removed | platform::UnlinkOutcome::Missing) => Ok(()),
        Ok(platform::UnlinkOutcome::Replaced) => {
            warn!("source entry was replaced during the move and was left in place");
            Ok(())
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => {
            if let Err(undo) = fs::remove_file(dest) {
                warn!(error = %undo, "could not remove destination after failed source removal");
            }
            Err(Error::Relocation(RelocationFailure::from_io(&err)))
        }
    }
}

fn copy_from_handle(handle: &ValidatedFileHandle, dest: &Path) -> Result<MoveMethod> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(handle.mode() & 0o7777);
    }
    let mut out = options.open(dest).map_err(|err| match err.kind() {
        io::ErrorKind::AlreadyExists => Error::Relocation(RelocationFailure::DestinationExists),
        _ => Error::Relocation(RelocationFailure::from_io(&err)),
    })?;

    let copied = handle
        .rewind_reader()
        .and_then(|mut reader| io::copy(&mut reader, &mut out))
        .and_then(|bytes| out.sync_all().map(|()| bytes));
    drop(out);
    match copied {
        Ok(bytes) if bytes == handle.len() => {}
        Ok(bytes) => {
            let _ = fs::remove_file(dest);
            return Err(Error::Relocation(RelocationFailure::OperationFailed(format!(
                "short copy: {bytes} of {} bytes",
                handle.len()
            ))));
        }
        Err(err) => {
            let _ = fs::remove_file(dest);
            return Err(Error::Relocation(RelocationFailure::from_io(&err)));
        }
    }

    remove_source_entry(handle, dest)?;
    Ok(MoveMethod::Copied)
}

fn verify_moved(handle: &ValidatedFileHandle, dest: &Path, method: MoveMethod) -> Result<()> {
    let dest_identity = FileIdentity::of_path(dest).map_err(|_| {
        Error::Relocation(RelocationFailure::OperationFailed(
            "destination missing after move".to_string(),
        ))
    })?;
    if method != MoveMethod::Copied
        && handle.identity().is_some()
        && dest_identity != handle.identity()
    {
        return Err(Error::Relocation(RelocationFailure::OperationFailed(
            "destination does not hold the validated file".to_string(),
        )));
    }
    if handle.still_at_opened_path() {
        return Err(Error::Relocation(RelocationFailure::OperationFailed(
            "source still present after move".to_string(),
        )));
    }
    Ok(())
}

/// The full single-file pipeline, shared by every move of a batch.
#[derive(Debug)]
pub struct Relocator {
    policy: RelocationPolicy,
    sanitizer: PathSanitizer,
    broker: AccessBroker,
    executor: RelocationExecutor,
}

impl Relocator {
    pub fn new(
        policy: RelocationPolicy,
        store: Arc<dyn BookmarkStore>,
        resolver: Arc<dyn BookmarkResolver>,
    ) -> Result<Self> {
        policy.validate()?;
        let home = match &policy.home_dir {
            Some(home) => home.clone(),
            None => crate::home::real_home_dir()?,
        };
        let home = home.canonicalize().map_err(|err| {
            Error::InvalidPolicy(format!("home directory {}: {err}", home.display()))
        })?;
        if !home.is_dir() {
            return Err(Error::InvalidPolicy(format!(
                "home directory {} is not a directory",
                home.display()
            )));
        }

        let sanitizer = PathSanitizer::new(policy.paths.clone());
        let broker = AccessBroker::new(store, resolver, home.clone(), policy.io.acquire_timeout());
        let executor =
            RelocationExecutor::new(home, sanitizer.clone(), policy.io.create_parents);
        Ok(Self {
            policy,
            sanitizer,
            broker,
            executor,
        })
    }

    /// Uses [`PathBookmarkResolver`].
    pub fn with_store(policy: RelocationPolicy, store: Arc<dyn BookmarkStore>) -> Result<Self> {
        Self::new(policy, store, Arc::new(PathBookmarkResolver))
    }

    pub fn policy(&self) -> &RelocationPolicy {
        &self.policy
    }

    pub fn home(&self) -> &Path {
        self.broker.home()
    }

    pub fn sanitizer(&self) -> &PathSanitizer {
        &self.sanitizer
    }

    pub fn broker(&self) -> &AccessBroker {
        &self.broker
    }

    pub fn executor(&self) -> &RelocationExecutor {
        &self.executor
    }

    /// Run one proposal end to end. Every failure is folded into the returned result.
    pub fn relocate(&self, proposal: &ProposedMove) -> MoveResult {
        match self.try_relocate(proposal) {
            Ok(result) => result,
            Err(err) => {
                debug!(
                    source = %proposal.source_path.display(),
                    error = %err,
                    "proposal rejected before execution"
                );
                MoveResult::failed(proposal.source_path.clone(), &err)
            }
        }
    }

    fn try_relocate(&self, proposal: &ProposedMove) -> Result<MoveResult> {
        let destination = self
            .sanitizer
            .sanitize(&proposal.destination_relative_path)?;
        if !proposal.source_path.is_absolute() {
            return Err(Error::ValidationFailed(ValidationFailure::NotAbsolute));
        }
        let handle = validate::validate(&proposal.source_path)?;

        let key = proposal
            .effective_access_key()
            .ok_or(Error::GrantDenied(GrantDenial::NotFound))?;
        let mut grant = self.broker.acquire(&key)?;
        let source_dir = proposal
            .source_path
            .parent()
            .and_then(|parent| parent.canonicalize().ok());
        if !source_dir.is_some_and(|dir| grant.covers(&dir)) {
            return Err(Error::GrantDenied(GrantDenial::SourceOutsideGrant));
        }

        let mut result = self.executor.execute(handle, &destination, &grant);
        grant.release();
        result.source_path = proposal.source_path.clone();
        Ok(result)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::access::{GrantKind, MemoryBookmarkStore};
    use crate::policy::RelocationPolicy;

    struct Fixture {
        _dir: tempfile::TempDir,
        home: PathBuf,
        relocator: Relocator,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().expect("tempdir");
        let home = dir.path().join("home");
        fs::create_dir_all(home.join("Downloads")).expect("mkdir");
        let home = home.canonicalize().expect("canonical");
        let relocator = Relocator::with_store(
            RelocationPolicy::with_home(&home),
            Arc::new(MemoryBookmarkStore::new()),
        )
        .expect("relocator");
        relocator
            .broker()
            .grant_folder("Downloads", &home.join("Downloads"), GrantKind::WellKnown)
            .expect("grant");
        Fixture {
            _dir: dir,
            home,
            relocator,
        }
    }

    #[test]
    fn access_key_defaults_to_parent_folder_name() {
        let proposal = ProposedMove::new("/home/u/Downloads/a.pdf", "Documents");
        assert_eq!(proposal.effective_access_key().as_deref(), Some("Downloads"));
        let proposal = proposal.with_access_key("Custom");
        assert_eq!(proposal.effective_access_key().as_deref(), Some("Custom"));
    }

    #[test]
    fn outcome_mapping_keeps_categories_apart() {
        assert!(matches!(
            MoveOutcome::from_error(&Error::ValidationFailed(ValidationFailure::PermissionDenied)),
            MoveOutcome::FailedPermission(_)
        ));
        assert!(matches!(
            MoveOutcome::from_error(&Error::ValidationFailed(ValidationFailure::FifoRejected)),
            MoveOutcome::FailedValidation(_)
        ));
        assert!(matches!(
            MoveOutcome::from_error(&Error::GrantDenied(GrantDenial::Stale)),
            MoveOutcome::FailedPermission(_)
        ));
        assert_eq!(
            MoveOutcome::from_error(&Error::Timeout("move")),
            MoveOutcome::FailedIo(RelocationFailure::OperationFailed("timeout".to_string()))
        );
    }

    #[test]
    fn moves_file_and_creates_destination_folders() {
        let fx = fixture();
        let source = fx.home.join("Downloads/report.pdf");
        fs::write(&source, b"pdf bytes").expect("write");

        let result = fx
            .relocator
            .relocate(&ProposedMove::new(&source, "Documents/PDFs"));
        assert_eq!(result.outcome, MoveOutcome::Succeeded, "{result:?}");
        let dest = fx.home.join("Documents/PDFs/report.pdf");
        assert_eq!(result.destination_path.as_deref(), Some(dest.as_path()));
        assert_eq!(fs::read(&dest).expect("read"), b"pdf bytes");
        assert!(!source.exists());
    }

    #[test]
    fn never_replaces_existing_destination() {
        let fx = fixture();
        let source = fx.home.join("Downloads/a.txt");
        fs::write(&source, "new").expect("write");
        fs::create_dir_all(fx.home.join("Archive")).expect("mkdir");
        fs::write(fx.home.join("Archive/a.txt"), "old").expect("write existing");

        let result = fx.relocator.relocate(&ProposedMove::new(&source, "Archive"));
        assert_eq!(
            result.outcome,
            MoveOutcome::FailedIo(RelocationFailure::DestinationExists)
        );
        assert_eq!(
            fs::read_to_string(fx.home.join("Archive/a.txt")).expect("read"),
            "old"
        );
        assert_eq!(fs::read_to_string(&source).expect("read"), "new");
    }

    #[test]
    fn rejects_destination_that_escapes_through_symlink() {
        let fx = fixture();
        let outside = tempfile::tempdir().expect("tempdir");
        std::os::unix::fs::symlink(outside.path(), fx.home.join("Escape")).expect("symlink");
        let source = fx.home.join("Downloads/a.txt");
        fs::write(&source, "x").expect("write");

        let result = fx
            .relocator
            .relocate(&ProposedMove::new(&source, "Escape/inner"));
        assert!(matches!(result.outcome, MoveOutcome::FailedValidation(_)));
        assert!(source.exists());
        assert!(!outside.path().join("inner").exists());
    }

    #[test]
    fn source_outside_granted_folder_is_refused() {
        let fx = fixture();
        fs::create_dir_all(fx.home.join("Elsewhere/Downloads")).expect("mkdir");
        let source = fx.home.join("Elsewhere/Downloads/a.txt");
        fs::write(&source, "x").expect("write");

        let result = fx.relocator.relocate(&ProposedMove::new(&source, "Docs"));
        assert_eq!(
            result.outcome,
            MoveOutcome::FailedPermission(GrantDenial::SourceOutsideGrant.to_string())
        );
        assert!(source.exists());
    }

    #[test]
    fn relative_source_is_rejected() {
        let fx = fixture();
        let result = fx
            .relocator
            .relocate(&ProposedMove::new("Downloads/a.txt", "Docs"));
        assert!(matches!(result.outcome, MoveOutcome::FailedValidation(_)));
    }

    #[test]
    fn keeps_permission_bits_when_copying() {
        use std::os::unix::fs::PermissionsExt;

        let fx = fixture();
        let source = fx.home.join("Downloads/script.sh");
        fs::write(&source, "#!/bin/sh\n").expect("write");
        fs::set_permissions(&source, fs::Permissions::from_mode(0o640)).expect("chmod");
        let handle = validate::validate(&source).expect("validate");
        let dest = fx.home.join("copied.sh");

        assert_eq!(
            copy_from_handle(&handle, &dest).expect("copy"),
            MoveMethod::Copied
        );
        let mode = fs::metadata(&dest).expect("meta").permissions().mode();
        assert_eq!(mode & 0o777, 0o640);
        assert!(!source.exists());
    }
}
