//! Configuration types shared across crates.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level daemon configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Bind address (e.g., "0.0.0.0:14000").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Backing storage for the cache and fragment store.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Blob cache sizing.
    #[serde(default)]
    pub cache: CacheConfig,
    /// Tape (bundle store) availability.
    #[serde(default)]
    pub tape: TapeConfig,
}

impl AppConfig {
    /// Create a test configuration: in-memory storage, a small cache,
    /// tape enabled.
    ///
    /// **For testing only.**
    pub fn for_testing() -> Self {
        Self {
            bind: "127.0.0.1:0".to_string(),
            storage: StorageConfig::Memory,
            cache: CacheConfig {
                max_size: 10_000,
                ttl_secs: 60,
            },
            tape: TapeConfig::default(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:14000".to_string()
}

/// Storage backend configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local filesystem storage.
    Filesystem {
        /// Root directory for storage.
        root: PathBuf,
    },
    /// In-memory storage. Contents are lost on restart.
    Memory,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Filesystem {
            root: PathBuf::from("./data/storage"),
        }
    }
}

/// Blob cache configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum total size of cached entries in bytes. 0 means unbounded.
    #[serde(default = "default_cache_max_size")]
    pub max_size: u64,
    /// Entry time-to-live in seconds. A Get refreshes the clock.
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
}

impl CacheConfig {
    /// The TTL as a Duration.
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    /// Validate cache configuration invariants.
    pub fn validate(&self) -> Result<()> {
        if self.ttl_secs == 0 {
            return Err(Error::Config("cache.ttl_secs must be nonzero".to_string()));
        }
        Ok(())
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: default_cache_max_size(),
            ttl_secs: default_cache_ttl_secs(),
        }
    }
}

fn default_cache_max_size() -> u64 {
    1024 * 1024 * 1024 // 1 GiB
}

fn default_cache_ttl_secs() -> u64 {
    86400 // 24 hours
}

/// Tape availability configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TapeConfig {
    /// When false the bundle store is administratively offline and blob
    /// reads that miss the cache answer 503.
    #[serde(default = "default_tape_enabled")]
    pub enabled: bool,
}

impl Default for TapeConfig {
    fn default() -> Self {
        Self {
            enabled: default_tape_enabled(),
        }
    }
}

fn default_tape_enabled() -> bool {
    true
}
