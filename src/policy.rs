use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BatchLimits {
    /// Caps how many proposals a single batch call processes; the rest are reported as dropped.
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    /// Pause inserted between successive moves (milliseconds). `0` disables the pause.
    #[serde(default = "default_operation_delay_ms")]
    pub operation_delay_ms: u64,
}

const fn default_max_batch_size() -> usize {
    1000
}

const fn default_operation_delay_ms() -> u64 {
    100
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self {
            max_batch_size: default_max_batch_size(),
            operation_delay_ms: default_operation_delay_ms(),
        }
    }
}

impl BatchLimits {
    pub fn operation_delay(&self) -> Duration {
        Duration::from_millis(self.operation_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PathRules {
    #[serde(default = "default_max_path_chars")]
    pub max_path_chars: usize,
    #[serde(default = "default_max_component_chars")]
    pub max_component_chars: usize,
    /// Additional component names to refuse, matched case-insensitively on top of the built-in
    /// reserved set.
    #[serde(default)]
    pub extra_reserved_names: Vec<String>,
}

const fn default_max_path_chars() -> usize {
    1024
}

const fn default_max_component_chars() -> usize {
    255
}

impl Default for PathRules {
    fn default() -> Self {
        Self {
            max_path_chars: default_max_path_chars(),
            max_component_chars: default_max_component_chars(),
            extra_reserved_names: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IoRules {
    /// Wall-clock budget for one single-move pipeline (milliseconds).
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Upper bound on waiting for another holder of the same bookmark key to release it.
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
    /// Whether missing destination folders may be created.
    #[serde(default = "default_create_parents")]
    pub create_parents: bool,
}

const fn default_timeout_ms() -> u64 {
    5_000
}

const fn default_acquire_timeout_ms() -> u64 {
    5_000
}

const fn default_create_parents() -> bool {
    true
}

impl Default for IoRules {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
            create_parents: default_create_parents(),
        }
    }
}

impl IoRules {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

// Hard caps are policy-level guardrails against misconfiguration.
const MAX_BATCH_SIZE_HARD_CAP: usize = 100_000;
const OPERATION_DELAY_MS_HARD_CAP: u64 = 60_000;
const MAX_PATH_CHARS_HARD_CAP: usize = 4096;
const MAX_COMPONENT_CHARS_HARD_CAP: usize = 255;
const TIMEOUT_MS_HARD_CAP: u64 = 600_000;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct RelocationPolicy {
    #[serde(default)]
    pub batch: BatchLimits,
    #[serde(default)]
    pub paths: PathRules,
    #[serde(default)]
    pub io: IoRules,
    /// Base directory destinations are resolved against and grants must stay inside.
    ///
    /// `None` resolves the real home directory from the password database at context creation;
    /// `$HOME` is deliberately not consulted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home_dir: Option<PathBuf>,
}

fn validate_usize_limit(value: usize, field: &str, hard_cap: usize) -> Result<()> {
    if value == 0 {
        return Err(Error::InvalidPolicy(format!("{field} must be > 0")));
    }
    if value > hard_cap {
        return Err(Error::InvalidPolicy(format!(
            "{field} must be <= {hard_cap}"
        )));
    }
    Ok(())
}

fn validate_u64_limit(value: u64, field: &str, hard_cap: u64) -> Result<()> {
    if value == 0 {
        return Err(Error::InvalidPolicy(format!("{field} must be > 0")));
    }
    if value > hard_cap {
        return Err(Error::InvalidPolicy(format!(
            "{field} must be <= {hard_cap}"
        )));
    }
    Ok(())
}

impl RelocationPolicy {
    pub fn with_home(home_dir: impl Into<PathBuf>) -> Self {
        Self {
            home_dir: Some(home_dir.into()),
            ..Self::default()
        }
    }

    /// Structural validation only: checks limits and shape without touching the filesystem.
    ///
    /// Home directory existence and canonicalization happen in `Relocator::new`.
    pub fn validate(&self) -> Result<()> {
        validate_usize_limit(
            self.batch.max_batch_size,
            "batch.max_batch_size",
            MAX_BATCH_SIZE_HARD_CAP,
        )?;
        if self.batch.operation_delay_ms > OPERATION_DELAY_MS_HARD_CAP {
            return Err(Error::InvalidPolicy(format!(
                "batch.operation_delay_ms must be <= {OPERATION_DELAY_MS_HARD_CAP}"
            )));
        }
        validate_usize_limit(
            self.paths.max_path_chars,
            "paths.max_path_chars",
            MAX_PATH_CHARS_HARD_CAP,
        )?;
        validate_usize_limit(
            self.paths.max_component_chars,
            "paths.max_component_chars",
            MAX_COMPONENT_CHARS_HARD_CAP,
        )?;
        if self.paths.max_component_chars > self.paths.max_path_chars {
            return Err(Error::InvalidPolicy(
                "paths.max_component_chars must be <= paths.max_path_chars".to_string(),
            ));
        }
        for name in &self.paths.extra_reserved_names {
            if name.trim().is_empty() || name.contains('/') || name.contains('\0') {
                return Err(Error::InvalidPolicy(format!(
                    "paths.extra_reserved_names contains an invalid entry: {name:?}"
                )));
            }
        }
        validate_u64_limit(self.io.timeout_ms, "io.timeout_ms", TIMEOUT_MS_HARD_CAP)?;
        validate_u64_limit(
            self.io.acquire_timeout_ms,
            "io.acquire_timeout_ms",
            TIMEOUT_MS_HARD_CAP,
        )?;
        if let Some(home) = &self.home_dir
            && !home.is_absolute()
        {
            return Err(Error::InvalidPolicy(
                "home_dir must be an absolute path".to_string(),
            ));
        }
        Ok(())
    }
}
