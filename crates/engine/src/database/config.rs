//! Database configuration via `snapkv.toml`
//!
//! On first open a default `snapkv.toml` with comments is written into the
//! data directory. To change settings, edit the file and reopen.

use serde::{Deserialize, Serialize};
use snapkv_concurrency::RegistryConfig;
use snapkv_core::{SiError, SiResult};
use snapkv_durability::DurabilityMode;
use std::path::Path;
use std::time::Duration;

/// Config file name placed in the database data directory.
pub const CONFIG_FILE_NAME: &str = "snapkv.toml";

/// Database configuration loaded from `snapkv.toml`.
///
/// # Example
///
/// ```toml
/// durability = "always"
/// lock_timeout_ms = 5000
/// txn_cache_capacity = 10000
/// txn_cache_ttl_secs = 300
/// keep_alive_staleness_ms = 600000
/// reaper_interval_ms = 1000
/// compaction_interval_ms = 60000
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapConfig {
    /// Durability mode: `"always"`, `"standard"` or `"cache"`.
    ///
    /// Only `"always"` syncs a write's log record before the write is
    /// acknowledged. `"standard"` acknowledges first and syncs in batches.
    pub durability: String,
    /// Bound on a single row lock wait.
    pub lock_timeout_ms: u64,
    /// Maximum transaction records held in the registry cache.
    pub txn_cache_capacity: u64,
    /// Time-to-live of a cached transaction record.
    pub txn_cache_ttl_secs: u64,
    /// A transaction without keep-alive for this long is rolled back.
    pub keep_alive_staleness_ms: u64,
    /// How often the reaper runs; 0 disables it.
    pub reaper_interval_ms: u64,
    /// How often the reaper compacts old versions and transaction records;
    /// 0 disables it. Only runs while the reaper does.
    pub compaction_interval_ms: u64,
}

impl Default for SnapConfig {
    fn default() -> Self {
        Self {
            durability: "always".to_string(),
            lock_timeout_ms: 5000,
            txn_cache_capacity: 10_000,
            txn_cache_ttl_secs: 300,
            keep_alive_staleness_ms: 600_000,
            reaper_interval_ms: 1000,
            compaction_interval_ms: 60_000,
        }
    }
}

impl SnapConfig {
    /// Parse the durability string into a `DurabilityMode`.
    pub fn durability_mode(&self) -> SiResult<DurabilityMode> {
        self.durability
            .parse()
            .map_err(|e: String| SiError::config(format!("{} in {}", e, CONFIG_FILE_NAME)))
    }

    /// Check every field.
    pub fn validate(&self) -> SiResult<()> {
        self.durability_mode()?;
        if self.lock_timeout_ms == 0 {
            return Err(SiError::config("lock_timeout_ms must be greater than 0"));
        }
        if self.txn_cache_capacity == 0 {
            return Err(SiError::config("txn_cache_capacity must be greater than 0"));
        }
        if self.txn_cache_ttl_secs == 0 {
            return Err(SiError::config("txn_cache_ttl_secs must be greater than 0"));
        }
        Ok(())
    }

    /// Row lock wait bound.
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// Keep-alive staleness window.
    pub fn staleness_window(&self) -> Duration {
        Duration::from_millis(self.keep_alive_staleness_ms)
    }

    /// Reaper period, `None` when disabled.
    pub fn reaper_interval(&self) -> Option<Duration> {
        (self.reaper_interval_ms > 0).then(|| Duration::from_millis(self.reaper_interval_ms))
    }

    /// Compaction period, `None` when disabled.
    pub fn compaction_interval(&self) -> Option<Duration> {
        (self.compaction_interval_ms > 0).then(|| Duration::from_millis(self.compaction_interval_ms))
    }

    /// Registry cache settings.
    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            cache_capacity: self.txn_cache_capacity,
            cache_ttl: Duration::from_secs(self.txn_cache_ttl_secs),
        }
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# snapkv configuration
#
# Durability mode: "always" (default), "standard" or "cache"
#   "always"   = fsync every log append before the write is acknowledged
#   "standard" = periodic fsync (~100ms); writes and commits are acknowledged
#                BEFORE they are on disk, so a crash can lose acknowledged
#                work from the last interval
#   "cache"    = never fsync
durability = "always"

# Longest a write or read waits for a row lock before failing with LockTimeout
lock_timeout_ms = 5000

# Transaction record cache (write-through)
txn_cache_capacity = 10000
txn_cache_ttl_secs = 300

# Transactions with no keep-alive for this long are rolled back by the reaper
keep_alive_staleness_ms = 600000

# Reaper period; 0 disables the background reaper
reaper_interval_ms = 1000

# How often the reaper drops versions and transaction records no reader can
# need any more; 0 disables compaction
compaction_interval_ms = 60000
"#
    }

    /// Read, parse and validate config from a file path.
    pub fn from_file(path: &Path) -> SiResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SiError::config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let config: SnapConfig = toml::from_str(&content).map_err(|e| {
            SiError::config(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the default config file if it does not already exist.
    pub fn write_default_if_missing(path: &Path) -> SiResult<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml())?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> SiResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| SiError::Serialization(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
