use std::io::Read;
use std::path::Path;

use crate::{Error, RelocationPolicy, Result};

const DEFAULT_MAX_POLICY_BYTES: u64 = 4 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyFormat {
    Toml,
    Json,
}

pub fn parse_policy(raw: &str, format: PolicyFormat) -> Result<RelocationPolicy> {
    match format {
        PolicyFormat::Json => serde_json::from_str(raw)
            .map_err(|err| Error::InvalidPolicy(format!("invalid json policy: {err}"))),
        PolicyFormat::Toml => toml::from_str(raw)
            .map_err(|err| Error::InvalidPolicy(format!("invalid toml policy: {err}"))),
    }
}

pub fn load_policy(path: impl AsRef<Path>) -> Result<RelocationPolicy> {
    load_policy_limited(path, DEFAULT_MAX_POLICY_BYTES)
}

/// Load and validate a policy file from disk with a byte limit.
///
/// Format detection is by file extension:
/// - `.json` => JSON
/// - `.toml` or no extension => TOML
///
/// The file is opened without following a final symlink and must be a regular file, so a FIFO
/// or device node cannot stall loading.
pub fn load_policy_limited(path: impl AsRef<Path>, max_bytes: u64) -> Result<RelocationPolicy> {
    if max_bytes == 0 {
        return Err(Error::InvalidPolicy(
            "max policy bytes must be > 0".to_string(),
        ));
    }

    let path = path.as_ref();
    let file = crate::platform::open_readonly_nofollow(path).map_err(|err| {
        if crate::platform::is_symlink_open_error(&err) {
            return Error::InvalidPolicy(format!(
                "policy path {} is a symlink",
                path.display()
            ));
        }
        Error::io_path("open", path, err)
    })?;
    let meta = file
        .metadata()
        .map_err(|err| Error::io_path("metadata", path, err))?;
    if !meta.is_file() {
        return Err(Error::InvalidPolicy(format!(
            "policy path {} is not a regular file",
            path.display()
        )));
    }

    let limit = max_bytes.saturating_add(1);
    let mut bytes = Vec::<u8>::new();
    file.take(limit)
        .read_to_end(&mut bytes)
        .map_err(|err| Error::io_path("read", path, err))?;

    if bytes.len() as u64 > max_bytes {
        return Err(Error::InputTooLarge {
            size_bytes: bytes.len() as u64,
            max_bytes,
        });
    }

    let raw = std::str::from_utf8(&bytes).map_err(|_| Error::InvalidUtf8(path.to_path_buf()))?;
    let format = match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => PolicyFormat::Json,
        Some("toml") | None => PolicyFormat::Toml,
        Some(other) => {
            return Err(Error::InvalidPolicy(format!(
                "unsupported policy format {other:?}; expected .toml or .json"
            )));
        }
    };
    let policy = parse_policy(raw, format)?;
    policy.validate()?;
    Ok(policy)
}
