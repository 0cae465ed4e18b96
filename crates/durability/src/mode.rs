//! Durability mode configuration
//!
//! Controls fsync behaviour of partition logs and the transaction table.

use std::str::FromStr;

/// Durability mode for log appends
///
/// | Mode | fsync | Data Loss Window |
/// |------|-------|-----------------|
/// | Cache | Never | Everything not yet applied |
/// | Always | Every append | Zero |
/// | Standard | Periodic | Up to interval/batch |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurabilityMode {
    /// No fsync; file-backed logs are written but never synced
    Cache,

    /// fsync after every append
    ///
    /// An acknowledged write is on disk before the caller sees `Ok`.
    Always,

    /// fsync every `batch_size` appends OR every `interval_ms` milliseconds
    Standard {
        /// Maximum time between fsyncs in milliseconds
        interval_ms: u64,
        /// Maximum appends between fsyncs
        batch_size: usize,
    },
}

impl DurabilityMode {
    /// Whether appends ever need an fsync
    pub fn requires_sync(&self) -> bool {
        !matches!(self, DurabilityMode::Cache)
    }

    /// Whether every append must be synced before returning
    pub fn requires_immediate_fsync(&self) -> bool {
        matches!(self, DurabilityMode::Always)
    }

    /// Decide whether a Standard-mode writer is due for an fsync
    pub fn sync_due(&self, appends_since_sync: usize, millis_since_sync: u64) -> bool {
        match *self {
            DurabilityMode::Cache => false,
            DurabilityMode::Always => appends_since_sync > 0,
            DurabilityMode::Standard {
                interval_ms,
                batch_size,
            } => {
                appends_since_sync > 0
                    && (appends_since_sync >= batch_size || millis_since_sync >= interval_ms)
            }
        }
    }

    /// Human-readable description of the mode
    pub fn description(&self) -> &'static str {
        match self {
            DurabilityMode::Cache => "Cache (no fsync, buffered writes lost on crash)",
            DurabilityMode::Always => "Always sync (safest, slowest)",
            DurabilityMode::Standard { .. } => "Standard (balanced speed/safety)",
        }
    }

    /// `Standard { interval_ms: 100, batch_size: 1000 }`
    pub fn standard_default() -> Self {
        DurabilityMode::Standard {
            interval_ms: 100,
            batch_size: 1000,
        }
    }
}

impl Default for DurabilityMode {
    fn default() -> Self {
        Self::standard_default()
    }
}

impl FromStr for DurabilityMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "standard" => Ok(DurabilityMode::standard_default()),
            "always" => Ok(DurabilityMode::Always),
            "cache" => Ok(DurabilityMode::Cache),
            other => Err(format!(
                "invalid durability mode '{}', expected \"standard\", \"always\" or \"cache\"",
                other
            )),
        }
    }
}
