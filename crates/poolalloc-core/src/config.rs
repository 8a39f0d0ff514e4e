//! Pool configuration.
//!
//! Defaults match the classic layout: 8-byte stride, 128-byte ceiling,
//! 20-block refills. Values may also come from the environment:
//! - `POOLALLOC_MAX_SMALL`: small-object ceiling in bytes.
//! - `POOLALLOC_REFILL_BATCH`: blocks requested per refill.
//! - `POOLALLOC_LOG`: minimum lifecycle log level
//!   (`trace`, `debug`, `info`, `warn`, `error`, `off`).
//! - `POOLALLOC_LOG_CAPACITY`: retained lifecycle records.

use crate::error::ConfigError;
use crate::log::AllocatorLogLevel;
use crate::pool::size_class::{ALIGN, DEFAULT_MAX_SMALL_BYTES, MAX_SMALL_BYTES_LIMIT};

/// Default number of blocks requested from the arena per refill.
pub const DEFAULT_REFILL_BATCH: usize = 20;

/// Largest accepted refill batch. At the largest ceiling a refill then asks
/// the platform for at most `2 * 4096 * 1024` bytes plus the growth term.
pub const MAX_REFILL_BATCH: usize = 1024;

/// Default number of lifecycle records kept before the oldest is dropped.
pub const DEFAULT_LOG_CAPACITY: usize = 1024;

/// Minimum level for lifecycle records, or `Off`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogLevelSetting {
    Enabled(AllocatorLogLevel),
    Off,
}

impl Default for LogLevelSetting {
    fn default() -> Self {
        Self::Enabled(AllocatorLogLevel::Info)
    }
}

impl LogLevelSetting {
    /// Parse from string (case-insensitive). Unknown values fall back to the
    /// default rather than failing.
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" | "all" => Self::Enabled(AllocatorLogLevel::Trace),
            "debug" => Self::Enabled(AllocatorLogLevel::Debug),
            "info" | "default" => Self::Enabled(AllocatorLogLevel::Info),
            "warn" | "warning" => Self::Enabled(AllocatorLogLevel::Warn),
            "error" => Self::Enabled(AllocatorLogLevel::Error),
            "off" | "none" | "disabled" | "0" => Self::Off,
            _ => Self::default(),
        }
    }

    /// True if a record at `level` should be kept.
    #[must_use]
    pub fn allows(self, level: AllocatorLogLevel) -> bool {
        match self {
            Self::Enabled(min) => level >= min,
            Self::Off => false,
        }
    }
}

/// Tunables for a [`crate::PoolAllocator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Small-object ceiling. Requests above it bypass the free lists.
    pub max_small_bytes: usize,
    /// Blocks requested from the arena when a free list runs dry.
    pub refill_batch: usize,
    /// Minimum lifecycle log level.
    pub log_level: LogLevelSetting,
    /// Lifecycle records retained (0 keeps none).
    pub log_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_small_bytes: DEFAULT_MAX_SMALL_BYTES,
            refill_batch: DEFAULT_REFILL_BATCH,
            log_level: LogLevelSetting::default(),
            log_capacity: DEFAULT_LOG_CAPACITY,
        }
    }
}

impl PoolConfig {
    #[must_use]
    pub fn with_max_small_bytes(mut self, bytes: usize) -> Self {
        self.max_small_bytes = bytes;
        self
    }

    #[must_use]
    pub fn with_refill_batch(mut self, count: usize) -> Self {
        self.refill_batch = count;
        self
    }

    #[must_use]
    pub fn with_log_level(mut self, level: LogLevelSetting) -> Self {
        self.log_level = level;
        self
    }

    #[must_use]
    pub fn with_log_capacity(mut self, capacity: usize) -> Self {
        self.log_capacity = capacity;
        self
    }

    /// Checks the ceiling and batch size.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let max = self.max_small_bytes;
        if max == 0 || !max.is_multiple_of(ALIGN) || max > MAX_SMALL_BYTES_LIMIT {
            return Err(ConfigError::InvalidMaxSmall {
                value: max,
                max: MAX_SMALL_BYTES_LIMIT,
            });
        }
        if self.refill_batch == 0 || self.refill_batch > MAX_REFILL_BATCH {
            return Err(ConfigError::InvalidRefillBatch {
                value: self.refill_batch,
                max: MAX_REFILL_BATCH,
            });
        }
        Ok(())
    }

    /// Builds a configuration from `POOLALLOC_*` environment variables,
    /// using defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`PoolConfig::from_env`] with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(raw) = lookup("POOLALLOC_MAX_SMALL") {
            config.max_small_bytes = parse_usize("POOLALLOC_MAX_SMALL", &raw)?;
        }
        if let Some(raw) = lookup("POOLALLOC_REFILL_BATCH") {
            config.refill_batch = parse_usize("POOLALLOC_REFILL_BATCH", &raw)?;
        }
        if let Some(raw) = lookup("POOLALLOC_LOG") {
            config.log_level = LogLevelSetting::from_str_loose(&raw);
        }
        if let Some(raw) = lookup("POOLALLOC_LOG_CAPACITY") {
            config.log_capacity = parse_usize("POOLALLOC_LOG_CAPACITY", &raw)?;
        }
        config.validate()?;
        Ok(config)
    }
}

fn parse_usize(var: &'static str, raw: &str) -> Result<usize, ConfigError> {
    raw.trim()
        .parse::<usize>()
        .map_err(|_| ConfigError::Unparseable {
            var,
            raw: raw.to_string(),
        })
}
