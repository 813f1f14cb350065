//! Runtime configuration, read from the environment of the instrumented
//! program.

use crate::event::RECORD_SIZE;
use crate::footprint::{DEFAULT_UNIT_SHIFT, MAX_UNIT_SHIFT};
use std::path::PathBuf;
use thiserror::Error;

/// Backing store location
pub const ENV_LOG: &str = "RMSPROF_LOG";
/// Log capacity in bytes
pub const ENV_CAPACITY: &str = "RMSPROF_CAPACITY";
/// Footprint granularity (log2 of the unit size in bytes)
pub const ENV_UNIT_SHIFT: &str = "RMSPROF_UNIT_SHIFT";

/// Default log file, relative to the working directory of the traced program
pub const DEFAULT_LOG_PATH: &str = "rmsprof.trace";

/// Default capacity: 4 GiB, about 178 million records
pub const DEFAULT_CAPACITY: u64 = 1 << 32;

/// Prefix selecting a POSIX shared-memory object instead of a file
pub const SHM_PREFIX: &str = "shm:";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}: invalid capacity '{value}' (examples: 1073741824, 16G, 2^34)")]
    InvalidCapacity { var: &'static str, value: String },

    #[error("{var}: invalid unit shift '{value}', expected 0..={max}")]
    InvalidUnitShift {
        var: &'static str,
        value: String,
        max: u32,
    },

    #[error("{var}: shared memory name '{value}' must look like shm:/name")]
    InvalidShmName { var: &'static str, value: String },

    #[error("{var} is empty")]
    Empty { var: &'static str },
}

/// Where the log lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backing {
    /// Regular file (sparse, mapped with MAP_NORESERVE)
    File(PathBuf),
    /// POSIX shared-memory object, e.g. `/rmsprof`
    SharedMemory(String),
}

impl Backing {
    /// Parse `shm:/name` or a file path.
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        if value.is_empty() {
            return Err(ConfigError::Empty { var: ENV_LOG });
        }
        match value.strip_prefix(SHM_PREFIX) {
            Some(name) => {
                let valid = name.len() > 1 && name.starts_with('/') && !name[1..].contains('/');
                if !valid {
                    return Err(ConfigError::InvalidShmName {
                        var: ENV_LOG,
                        value: value.to_string(),
                    });
                }
                Ok(Backing::SharedMemory(name.to_string()))
            }
            None => Ok(Backing::File(PathBuf::from(value))),
        }
    }
}

impl std::fmt::Display for Backing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backing::File(path) => write!(f, "{}", path.display()),
            Backing::SharedMemory(name) => write!(f, "{SHM_PREFIX}{name}"),
        }
    }
}

/// Runtime configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceConfig {
    pub backing: Backing,
    /// Upper bound on the log size in bytes, terminator included
    pub capacity: u64,
    /// Footprint granularity
    pub unit_shift: u32,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            backing: Backing::File(PathBuf::from(DEFAULT_LOG_PATH)),
            capacity: DEFAULT_CAPACITY,
            unit_shift: DEFAULT_UNIT_SHIFT,
        }
    }
}

impl TraceConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from any key lookup; unset keys take defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup(ENV_LOG) {
            config.backing = Backing::parse(value.trim())?;
        }

        if let Some(value) = lookup(ENV_CAPACITY) {
            config.capacity = parse_capacity(value.trim()).ok_or(ConfigError::InvalidCapacity {
                var: ENV_CAPACITY,
                value: value.clone(),
            })?;
        }

        if let Some(value) = lookup(ENV_UNIT_SHIFT) {
            config.unit_shift = value
                .trim()
                .parse::<u32>()
                .ok()
                .filter(|shift| *shift <= MAX_UNIT_SHIFT)
                .ok_or(ConfigError::InvalidUnitShift {
                    var: ENV_UNIT_SHIFT,
                    value: value.clone(),
                    max: MAX_UNIT_SHIFT,
                })?;
        }

        Ok(config)
    }

    pub fn with_backing(mut self, backing: Backing) -> Self {
        self.backing = backing;
        self
    }

    pub fn with_capacity(mut self, capacity: u64) -> Self {
        self.capacity = capacity;
        self
    }

    /// Whole records that fit in the configured capacity.
    pub fn capacity_records(&self) -> u64 {
        self.capacity / RECORD_SIZE as u64
    }
}

/// Parse `123`, `64K`, `16G`, `1T` (binary multiples) or `2^34`.
fn parse_capacity(value: &str) -> Option<u64> {
    if let Some(exp) = value.strip_prefix("2^") {
        let exp: u32 = exp.parse().ok()?;
        return 1u64.checked_shl(exp).filter(|_| exp < 64);
    }

    let upper = value.to_ascii_uppercase();
    let digits = upper.trim_end_matches("IB").trim_end_matches('B');
    let (number, shift) = match digits.chars().last()? {
        'K' => (&digits[..digits.len() - 1], 10),
        'M' => (&digits[..digits.len() - 1], 20),
        'G' => (&digits[..digits.len() - 1], 30),
        'T' => (&digits[..digits.len() - 1], 40),
        _ => (digits, 0),
    };
    let number: u64 = number.trim().parse().ok()?;
    number.checked_mul(1u64 << shift)
}
