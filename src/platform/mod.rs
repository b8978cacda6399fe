//! Thin wrappers over OS primitives that std does not expose.

mod link;
mod open;
mod rename;
mod unlink;

pub(crate) use link::link_open_file;
pub(crate) use open::{is_symlink_open_error, open_readonly_nofollow};
pub(crate) use rename::{rename_no_replace, sync_move_parents};
pub(crate) use unlink::{UnlinkOutcome, unlink_if_identity};

/// Whether `err` is the cross-device error returned by rename/link between filesystems.
#[cfg(unix)]
pub(crate) fn is_cross_device(err: &std::io::Error) -> bool {
    err.raw_os_error() == Some(libc::EXDEV)
}

#[cfg(not(unix))]
pub(crate) fn is_cross_device(err: &std::io::Error) -> bool {
    err.kind() == std::io::ErrorKind::CrossesDevices
}
