use std::fs::{File, OpenOptions};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use serde::Deserialize;

use safe_relocate::{Error, ProposedMove};

pub(crate) const MAX_PLAN_BYTES: u64 = 16 * 1024 * 1024;

/// A folder grant to record before the moves run.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct PlanGrant {
    pub(crate) key: String,
    pub(crate) folder: PathBuf,
    #[serde(default)]
    pub(crate) custom: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct Plan {
    #[serde(default)]
    pub(crate) grants: Vec<PlanGrant>,
    pub(crate) moves: Vec<ProposedMove>,
}

#[cfg(unix)]
fn open_readonly_nofollow(path: &Path) -> io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;

    let mut options = OpenOptions::new();
    options
        .read(true)
        .custom_flags(libc::O_NOFOLLOW | libc::O_NONBLOCK | libc::O_CLOEXEC);
    options.open(path)
}

#[cfg(not(unix))]
fn open_readonly_nofollow(path: &Path) -> io::Result<File> {
    OpenOptions::new().read(true).open(path)
}

fn open_input_file(path: &Path) -> Result<File, Error> {
    let file = open_readonly_nofollow(path).map_err(|err| {
        #[cfg(unix)]
        {
            if err.raw_os_error() == Some(libc::ELOOP) {
                return Error::InvalidPolicy(format!(
                    "plan {} is a symlink; refusing to read it",
                    path.display()
                ));
            }
        }
        Error::IoPath {
            op: "open",
            path: path.to_path_buf(),
            source: err,
        }
    })?;
    let meta = file.metadata().map_err(|err| Error::IoPath {
        op: "metadata",
        path: path.to_path_buf(),
        source: err,
    })?;
    if !meta.is_file() {
        return Err(Error::InvalidPolicy(format!(
            "plan {} is not a regular file",
            path.display()
        )));
    }
    if meta.len() > MAX_PLAN_BYTES {
        return Err(Error::InputTooLarge {
            size_bytes: meta.len(),
            max_bytes: MAX_PLAN_BYTES,
        });
    }
    Ok(file)
}

pub(crate) fn load_text_limited(path: &Path, max_bytes: u64) -> Result<String, Error> {
    let limit = max_bytes.saturating_add(1);
    let mut bytes = Vec::<u8>::new();

    if path.as_os_str() == "-" {
        io::stdin()
            .take(limit)
            .read_to_end(&mut bytes)
            .map_err(|err| Error::IoPath {
                op: "read_stdin",
                path: path.to_path_buf(),
                source: err,
            })?;
    } else {
        open_input_file(path)?
            .take(limit)
            .read_to_end(&mut bytes)
            .map_err(|err| Error::IoPath {
                op: "read",
                path: path.to_path_buf(),
                source: err,
            })?;
    }

    let read_size = u64::try_from(bytes.len()).unwrap_or(u64::MAX);
    if read_size > max_bytes {
        return Err(Error::InputTooLarge {
            size_bytes: read_size,
            max_bytes,
        });
    }
    String::from_utf8(bytes).map_err(|_| Error::InvalidUtf8(path.to_path_buf()))
}

pub(crate) fn load_plan(path: &Path) -> Result<Plan, Error> {
    let text = load_text_limited(path, MAX_PLAN_BYTES)?;
    Ok(serde_json::from_str(&text)?)
}
