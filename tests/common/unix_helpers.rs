use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::FileTypeExt;
use std::path::Path;

pub fn create_fifo(path: &Path) {
    let c_path = CString::new(path.as_os_str().as_bytes())
        .unwrap_or_else(|_| panic!("invalid fifo path (contains NUL): {:?}", path));
    // Safety: `CString::new` guarantees a NUL-terminated C string with no interior NUL bytes, and
    // the pointer remains valid for the duration of the call.
    let rc = unsafe { libc::mkfifo(c_path.as_ptr(), 0o600) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EEXIST)
            && std::fs::symlink_metadata(path).is_ok_and(|meta| meta.file_type().is_fifo())
        {
            return;
        }
        panic!("mkfifo failed for {}: {}", path.display(), err);
    }
}

/// Bind a listening socket at `path`. The socket file lives as long as the listener.
pub fn create_socket(path: &Path) -> std::os::unix::net::UnixListener {
    std::os::unix::net::UnixListener::bind(path)
        .unwrap_or_else(|err| panic!("bind failed for {}: {}", path.display(), err))
}

/// Number of descriptors open in this process.
#[cfg(target_os = "linux")]
pub fn open_descriptor_count() -> usize {
    std::fs::read_dir("/proc/self/fd")
        .expect("read /proc/self/fd")
        .count()
}
