use std::path::PathBuf;

use crate::error::{Error, Result};

/// The invoking user's home directory as recorded in the password database.
///
/// `$HOME` is not consulted: sandboxed hosts point it at a per-app container, and a grant
/// boundary anchored there would accept container paths as "inside home".
#[cfg(unix)]
pub fn real_home_dir() -> Result<PathBuf> {
    use nix::unistd::{Uid, User};

    let uid = Uid::current();
    let user = User::from_uid(uid)
        .map_err(|err| Error::InvalidPolicy(format!("failed to look up uid {uid}: {err}")))?
        .ok_or_else(|| Error::InvalidPolicy(format!("no password entry for uid {uid}")))?;
    if !user.dir.is_absolute() {
        return Err(Error::InvalidPolicy(format!(
            "password entry for uid {uid} has a non-absolute home directory"
        )));
    }
    Ok(user.dir)
}

#[cfg(not(unix))]
pub fn real_home_dir() -> Result<PathBuf> {
    std::env::var_os("USERPROFILE")
        .map(PathBuf::from)
        .filter(|path| path.is_absolute())
        .ok_or_else(|| Error::InvalidPolicy("home directory is unknown".to_string()))
}
