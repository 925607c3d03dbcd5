//! Allocator configuration.
//!
//! Handle validation is selected with `OFFALLOC_MODE`:
//! - `strict` (default): every handle is checked for pool, generation and
//!   offset before `free` or `allocation_size` touch the node.
//! - `hardened`: strict checks plus a full [`verify_integrity`] audit after
//!   every mutating call. Violations are logged at Error level.
//! - `off`: only bounds and used-state checks. Baseline for benchmarks.
//!
//! `OFFALLOC_MAX_ALLOCATIONS`, `OFFALLOC_LOG_CAPACITY` and
//! `OFFALLOC_LOG_LEVEL` size the node pool and the lifecycle log ring.
//!
//! [`verify_integrity`]: crate::Allocator::verify_integrity

use crate::error::ConfigError;
use crate::log::AllocatorLogLevel;

/// Node pool size used when a caller does not pick one.
pub const DEFAULT_MAX_ALLOCATIONS: u32 = 128 * 1024;

/// How much checking `free` and `allocation_size` do on a handle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleValidation {
    /// Pool id, generation and offset are all checked.
    #[default]
    Strict,
    /// Strict checks plus an integrity audit after each mutation.
    Hardened,
    /// Bounds and used-state only.
    Off,
}

impl HandleValidation {
    /// Parse from string (case-insensitive). Unknown values are strict.
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "hardened" | "audit" | "full" => Self::Hardened,
            "off" | "none" | "disabled" => Self::Off,
            _ => Self::Strict,
        }
    }

    /// True if pool, generation and offset are checked.
    #[must_use]
    pub const fn checks_generation(self) -> bool {
        !matches!(self, Self::Off)
    }

    /// True if every mutation is followed by an integrity audit.
    #[must_use]
    pub const fn audits(self) -> bool {
        matches!(self, Self::Hardened)
    }
}

/// Construction parameters for an [`Allocator`](crate::Allocator).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocatorConfig {
    /// Size of the managed range in bytes.
    pub capacity: u32,
    /// Maximum number of simultaneous nodes (live allocations plus free
    /// regions).
    pub max_allocations: u32,
    /// Handle checking policy.
    pub validation: HandleValidation,
    /// Number of lifecycle records retained; 0 disables recording.
    pub log_capacity: usize,
    /// Records below this level are dropped.
    pub log_level: AllocatorLogLevel,
}

impl AllocatorConfig {
    /// Config with default validation and logging disabled.
    #[must_use]
    pub const fn new(capacity: u32, max_allocations: u32) -> Self {
        Self {
            capacity,
            max_allocations,
            validation: HandleValidation::Strict,
            log_capacity: 0,
            log_level: AllocatorLogLevel::Trace,
        }
    }

    #[must_use]
    pub const fn with_validation(mut self, validation: HandleValidation) -> Self {
        self.validation = validation;
        self
    }

    #[must_use]
    pub const fn with_log(mut self, capacity: usize, level: AllocatorLogLevel) -> Self {
        self.log_capacity = capacity;
        self.log_level = level;
        self
    }

    /// Rejects configurations the allocator cannot start from.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_allocations == 0 {
            return Err(ConfigError::ZeroMaxAllocations);
        }
        Ok(())
    }

    /// Builds a config for `capacity` from the `OFFALLOC_*` environment.
    pub fn from_env(capacity: u32) -> Result<Self, ConfigError> {
        Self::from_lookup(capacity, |key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable lookup.
    pub fn from_lookup(
        capacity: u32,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut config = Self::new(capacity, DEFAULT_MAX_ALLOCATIONS);
        if let Some(mode) = lookup("OFFALLOC_MODE") {
            config.validation = HandleValidation::from_str_loose(&mode);
        }
        if let Some(raw) = lookup("OFFALLOC_MAX_ALLOCATIONS") {
            config.max_allocations = parse_env("OFFALLOC_MAX_ALLOCATIONS", &raw)?;
        }
        if let Some(raw) = lookup("OFFALLOC_LOG_CAPACITY") {
            config.log_capacity = parse_env("OFFALLOC_LOG_CAPACITY", &raw)?;
        }
        if let Some(raw) = lookup("OFFALLOC_LOG_LEVEL") {
            config.log_level =
                AllocatorLogLevel::parse(&raw).ok_or_else(|| ConfigError::InvalidEnv {
                    key: "OFFALLOC_LOG_LEVEL",
                    value: raw.clone(),
                })?;
        }
        config.validate()?;
        Ok(config)
    }
}

fn parse_env<T: std::str::FromStr>(key: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        key,
        value: raw.to_string(),
    })
}
