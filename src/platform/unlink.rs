use std::io;
use std::path::Path;

use crate::validate::FileIdentity;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnlinkOutcome {
    Removed,
    /// The entry now names a different file and was left alone.
    Replaced,
    Missing,
}

/// Remove the entry at `path` only if it still names `expected`.
///
/// The parent directory is opened once and both the identity check and the removal go through
/// that descriptor, so a parent directory swapped for a symlink cannot redirect the unlink. A
/// rename of the entry itself inside the pinned directory between `fstatat` and `unlinkat` is
/// still possible; POSIX has no compare-and-unlink.
#[cfg(unix)]
pub(crate) fn unlink_if_identity(path: &Path, expected: FileIdentity) -> io::Result<UnlinkOutcome> {
    use std::ffi::CString;
    use std::fs::OpenOptions;
    use std::os::fd::AsRawFd;
    use std::os::unix::ffi::OsStrExt;
    use std::os::unix::fs::OpenOptionsExt;

    let (Some(parent), Some(name)) = (path.parent(), path.file_name()) else {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "path has no parent directory or file name",
        ));
    };
    let dir = OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_DIRECTORY | libc::O_CLOEXEC)
        .open(parent)?;
    let name = CString::new(name.as_bytes()).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            "file name contains interior NUL byte",
        )
    })?;

    // SAFETY:
    // - `stat` is plain old data and fully written by a successful `fstatat`.
    // - `dir` stays open and `name` stays alive for the duration of both calls.
    let mut stat: libc::stat = unsafe { std::mem::zeroed() };
    let rc = unsafe {
        libc::fstatat(
            dir.as_raw_fd(),
            name.as_ptr(),
            &mut stat,
            libc::AT_SYMLINK_NOFOLLOW,
        )
    };
    if rc != 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::NotFound {
            return Ok(UnlinkOutcome::Missing);
        }
        return Err(err);
    }
    #[allow(clippy::unnecessary_cast)]
    let actual = FileIdentity {
        dev: stat.st_dev as u64,
        ino: stat.st_ino as u64,
    };
    if actual != expected {
        return Ok(UnlinkOutcome::Replaced);
    }

    // SAFETY:
    // - `dir` is an open directory descriptor and `name` is NUL-terminated.
    let rc = unsafe { libc::unlinkat(dir.as_raw_fd(), name.as_ptr(), 0) };
    if rc != 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::NotFound {
            return Ok(UnlinkOutcome::Missing);
        }
        return Err(err);
    }
    Ok(UnlinkOutcome::Removed)
}

#[cfg(not(unix))]
pub(crate) fn unlink_if_identity(path: &Path, expected: FileIdentity) -> io::Result<UnlinkOutcome> {
    let _ = (path, expected);
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "identity-checked unlink is unsupported on this platform",
    ))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;

    fn identity(path: &Path) -> FileIdentity {
        FileIdentity::of_path(path)
            .expect("stat")
            .expect("identity")
    }

    #[test]
    fn removes_matching_entry() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("a.txt");
        fs::write(&path, "a").expect("write");
        let expected = identity(&path);

        assert_eq!(
            unlink_if_identity(&path, expected).expect("unlink"),
            UnlinkOutcome::Removed
        );
        assert!(!path.exists());
    }

    #[test]
    fn leaves_replaced_entry_in_place() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("a.txt");
        fs::write(&path, "original").expect("write");
        let expected = identity(&path);
        fs::rename(&path, dir.path().join("stash")).expect("move aside");
        fs::write(&path, "impostor").expect("write impostor");

        assert_eq!(
            unlink_if_identity(&path, expected).expect("unlink"),
            UnlinkOutcome::Replaced
        );
        assert_eq!(fs::read_to_string(&path).expect("read"), "impostor");
    }

    #[test]
    fn missing_entry_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("gone.txt");
        fs::write(&path, "x").expect("write");
        let expected = identity(&path);
        fs::remove_file(&path).expect("remove");

        assert_eq!(
            unlink_if_identity(&path, expected).expect("unlink"),
            UnlinkOutcome::Missing
        );
    }
}
