use std::fs;
use std::path::Path;

#[cfg(unix)]
fn sync_parent_directory(path: &Path) -> std::io::Result<()> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }
    let parent_dir = fs::File::open(parent)?;
    parent_dir.sync_all()
}

#[cfg(unix)]
pub(crate) fn sync_move_parents(src_path: &Path, dest_path: &Path) -> std::io::Result<()> {
    sync_parent_directory(dest_path)?;
    if src_path.parent() != dest_path.parent() {
        sync_parent_directory(src_path)?;
    }
    Ok(())
}

#[cfg(not(unix))]
pub(crate) fn sync_move_parents(_src_path: &Path, _dest_path: &Path) -> std::io::Result<()> {
    Ok(())
}

/// Rename `src_path` to `dest_path`, failing with `AlreadyExists` instead of replacing an existing
/// destination.
///
/// Durability is separate: once this returns `Ok` the rename is applied, and callers decide how
/// to treat a later [`sync_move_parents`] failure.
pub(crate) fn rename_no_replace(src_path: &Path, dest_path: &Path) -> std::io::Result<()> {
    rename_no_replace_raw(src_path, dest_path)
}

#[cfg(windows)]
fn rename_no_replace_raw(src_path: &Path, dest_path: &Path) -> std::io::Result<()> {
    use std::os::windows::ffi::OsStrExt;

    use windows_sys::Win32::Storage::FileSystem::{MOVEFILE_WRITE_THROUGH, MoveFileExW};

    fn to_wide_null(p: &Path) -> Vec<u16> {
        let mut wide: Vec<u16> = p.as_os_str().encode_wide().collect();
        wide.push(0);
        wide
    }

    let src_w = to_wide_null(src_path);
    let dest_w = to_wide_null(dest_path);

    // Without MOVEFILE_REPLACE_EXISTING, MoveFileExW fails if the destination exists.
    //
    // SAFETY:
    // - `src_w` and `dest_w` are owned, NUL-terminated UTF-16 buffers.
    // - Passed pointers stay valid for this synchronous call and do not escape.
    let moved = unsafe { MoveFileExW(src_w.as_ptr(), dest_w.as_ptr(), MOVEFILE_WRITE_THROUGH) };
    if moved == 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn rename_no_replace_raw(src_path: &Path, dest_path: &Path) -> std::io::Result<()> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let src = CString::new(src_path.as_os_str().as_bytes()).map_err(|_| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "source path contains interior NUL byte",
        )
    })?;
    let dest = CString::new(dest_path.as_os_str().as_bytes()).map_err(|_| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "destination path contains interior NUL byte",
        )
    })?;

    // DESIGN INVARIANT (Linux/Android no-replace rename):
    // - A "check destination, then rename" sequence can clobber a file created in between.
    // - `renameat2(..., RENAME_NOREPLACE)` makes the existence check part of the rename.
    //
    // SAFETY:
    // - Both C strings are NUL-terminated and valid for this synchronous call.
    let rc = unsafe {
        libc::renameat2(
            libc::AT_FDCWD,
            src.as_ptr(),
            libc::AT_FDCWD,
            dest.as_ptr(),
            libc::RENAME_NOREPLACE,
        )
    };
    if rc == 0 {
        return Ok(());
    }
    Err(std::io::Error::last_os_error())
}

#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "tvos",
    target_os = "watchos",
    target_os = "visionos"
))]
fn rename_no_replace_raw(src_path: &Path, dest_path: &Path) -> std::io::Result<()> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let src = CString::new(src_path.as_os_str().as_bytes()).map_err(|_| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "source path contains interior NUL byte",
        )
    })?;
    let dest = CString::new(dest_path.as_os_str().as_bytes()).map_err(|_| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "destination path contains interior NUL byte",
        )
    })?;

    // SAFETY:
    // - Both C strings are NUL-terminated and valid for this synchronous call.
    let rc = unsafe { libc::renamex_np(src.as_ptr(), dest.as_ptr(), libc::RENAME_EXCL) };
    if rc == 0 {
        return Ok(());
    }
    Err(std::io::Error::last_os_error())
}

#[cfg(all(
    not(windows),
    not(any(
        target_os = "linux",
        target_os = "android",
        target_os = "macos",
        target_os = "ios",
        target_os = "tvos",
        target_os = "watchos",
        target_os = "visionos"
    ))
))]
fn rename_no_replace_raw(src_path: &Path, dest_path: &Path) -> std::io::Result<()> {
    let _ = src_path;
    let _ = dest_path;
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "atomic no-replace rename is unsupported on this platform",
    ))
}
