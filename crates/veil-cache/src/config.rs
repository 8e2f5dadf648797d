//! Cache configuration
//!
//! Defaults are usable as-is. `from_env` overlays `VEIL_*` variables.

use crate::error::{CacheError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use veil_crypto::CipherPool;
use veil_store::StoreOptions;

/// One hour
pub const DEFAULT_MAX_AGE_SECS: u64 = 60 * 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Max age applied by `add` in every new registry
    pub default_max_age_secs: u64,
    /// Distinct cipher contexts shared by all chunk stores
    pub cipher_pool_capacity: usize,
    /// Slots a chunk arena grows by
    pub arena_increment: usize,
    /// Directory for backing files; the system temp dir when unset
    pub spill_dir: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_max_age_secs: DEFAULT_MAX_AGE_SECS,
            cipher_pool_capacity: CipherPool::DEFAULT_CAPACITY,
            arena_increment: StoreOptions::DEFAULT_ARENA_INCREMENT,
            spill_dir: None,
        }
    }
}

impl CacheConfig {
    /// Defaults overlaid with `VEIL_DEFAULT_MAX_AGE_SECS`,
    /// `VEIL_CIPHER_POOL_CAPACITY`, `VEIL_ARENA_INCREMENT` and `VEIL_SPILL_DIR`
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(v) = lookup("VEIL_DEFAULT_MAX_AGE_SECS") {
            config.default_max_age_secs = parse_var("VEIL_DEFAULT_MAX_AGE_SECS", &v)?;
        }
        if let Some(v) = lookup("VEIL_CIPHER_POOL_CAPACITY") {
            config.cipher_pool_capacity = parse_var("VEIL_CIPHER_POOL_CAPACITY", &v)?;
        }
        if let Some(v) = lookup("VEIL_ARENA_INCREMENT") {
            config.arena_increment = parse_var("VEIL_ARENA_INCREMENT", &v)?;
        }
        if let Some(v) = lookup("VEIL_SPILL_DIR").filter(|v| !v.is_empty()) {
            config.spill_dir = Some(PathBuf::from(v));
        }

        config.validate()?;
        Ok(config)
    }

    pub fn with_default_max_age(mut self, max_age: Duration) -> Self {
        self.default_max_age_secs = max_age.as_secs();
        self
    }

    pub fn with_cipher_pool_capacity(mut self, capacity: usize) -> Self {
        self.cipher_pool_capacity = capacity;
        self
    }

    pub fn with_arena_increment(mut self, increment: usize) -> Self {
        self.arena_increment = increment;
        self
    }

    pub fn with_spill_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.spill_dir = Some(dir.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_max_age_secs == 0 {
            return Err(CacheError::Config("default_max_age_secs must be > 0".into()));
        }
        if self.cipher_pool_capacity == 0 {
            return Err(CacheError::Config("cipher_pool_capacity must be > 0".into()));
        }
        if self.arena_increment == 0 {
            return Err(CacheError::Config("arena_increment must be > 0".into()));
        }
        Ok(())
    }

    pub fn default_max_age(&self) -> Duration {
        Duration::from_secs(self.default_max_age_secs)
    }

    /// What each chunk store is created with
    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            arena_increment: self.arena_increment,
            spill_dir: self
                .spill_dir
                .clone()
                .unwrap_or_else(std::env::temp_dir),
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| CacheError::Config(format!("{name}: cannot parse {value:?}")))
}
