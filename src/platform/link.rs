use std::fs::File;
use std::path::Path;

/// Create `dest` as a new hard link to the inode behind `file`, without consulting the path the
/// file was opened from.
///
/// Fails with `AlreadyExists` if `dest` exists, so this doubles as a no-overwrite primitive.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub(crate) fn link_open_file(file: &File, dest: &Path) -> std::io::Result<()> {
    use std::ffi::CString;
    use std::os::fd::AsRawFd;
    use std::os::unix::ffi::OsStrExt;

    let proc_path = CString::new(format!("/proc/self/fd/{}", file.as_raw_fd())).map_err(|_| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "descriptor path contains interior NUL byte",
        )
    })?;
    let dest = CString::new(dest.as_os_str().as_bytes()).map_err(|_| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "destination path contains interior NUL byte",
        )
    })?;

    // DESIGN INVARIANT (identity-bound link):
    // - `linkat(AT_EMPTY_PATH)` needs CAP_DAC_READ_SEARCH; following the `/proc/self/fd` magic
    //   link with AT_SYMLINK_FOLLOW is the unprivileged equivalent and names the open inode, not
    //   whatever currently sits at the source path.
    //
    // SAFETY:
    // - Both C strings are NUL-terminated and valid for this synchronous call.
    let rc = unsafe {
        libc::linkat(
            libc::AT_FDCWD,
            proc_path.as_ptr(),
            libc::AT_FDCWD,
            dest.as_ptr(),
            libc::AT_SYMLINK_FOLLOW,
        )
    };
    if rc == 0 {
        return Ok(());
    }
    Err(std::io::Error::last_os_error())
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub(crate) fn link_open_file(file: &File, dest: &Path) -> std::io::Result<()> {
    let _ = file;
    let _ = dest;
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "linking an open descriptor is unsupported on this platform",
    ))
}
