use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

#[cfg(unix)]
pub(crate) fn is_symlink_open_error(err: &io::Error) -> bool {
    // Linux and Darwin report ELOOP for O_NOFOLLOW on a symlink; FreeBSD reports EMLINK.
    matches!(err.raw_os_error(), Some(code) if code == libc::ELOOP || code == libc::EMLINK)
}

#[cfg(not(unix))]
pub(crate) fn is_symlink_open_error(_err: &io::Error) -> bool {
    false
}

/// Open `path` read-only, refusing to traverse a final symlink.
///
/// `O_NONBLOCK` keeps a FIFO from parking the caller until a writer shows up; the descriptor is
/// only used for `fstat` and reads of regular files, where the flag has no effect.
#[cfg(unix)]
pub(crate) fn open_readonly_nofollow(path: &Path) -> io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;

    let mut options = OpenOptions::new();
    options
        .read(true)
        .custom_flags(libc::O_NOFOLLOW | libc::O_NONBLOCK | libc::O_CLOEXEC);
    options.open(path)
}

#[cfg(windows)]
pub(crate) fn open_readonly_nofollow(path: &Path) -> io::Result<File> {
    use std::os::windows::fs::OpenOptionsExt;
    use windows_sys::Win32::Storage::FileSystem::FILE_FLAG_OPEN_REPARSE_POINT;

    let mut options = OpenOptions::new();
    options
        .read(true)
        .custom_flags(FILE_FLAG_OPEN_REPARSE_POINT);
    options.open(path)
}

#[cfg(all(not(unix), not(windows)))]
pub(crate) fn open_readonly_nofollow(path: &Path) -> io::Result<File> {
    let _ = path;
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "platform does not support atomic no-follow opens",
    ))
}
