//! Timestamp oracle
//!
//! Issues strictly increasing logical timestamps. The durable oracle
//! reserves a batch of timestamps by persisting the batch's upper bound
//! before handing any of them out; after a restart it resumes at the
//! persisted bound, so a timestamp is never issued twice even if the
//! process died halfway through a batch.

use parking_lot::Mutex;
use snapkv_core::{SiError, SiResult, Timestamp};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// A source of strictly increasing timestamps
pub trait TimestampSource: Send + Sync {
    /// Issue the next timestamp
    fn next(&self) -> SiResult<Timestamp>;

    /// The most recently issued timestamp (`ZERO` before the first)
    fn last_issued(&self) -> Timestamp;
}

/// Default number of timestamps reserved per persisted batch
pub const DEFAULT_RESERVATION_BATCH: u64 = 1024;

struct OracleState {
    /// Last timestamp handed out
    last: u64,
    /// Exclusive upper bound of what may be handed out without persisting
    reserved: u64,
}

/// Process-wide timestamp oracle
pub struct TimestampOracle {
    state: Mutex<OracleState>,
    path: Option<PathBuf>,
    batch: u64,
}

impl TimestampOracle {
    /// Oracle with no persistence; the first timestamp issued is `last + 1`
    pub fn in_memory(last: Timestamp) -> Self {
        TimestampOracle {
            state: Mutex::new(OracleState {
                last: last.as_u64(),
                reserved: u64::MAX,
            }),
            path: None,
            batch: 0,
        }
    }

    /// Open a durable oracle whose reservation bound lives at `path`
    pub fn open(path: impl AsRef<Path>, batch: u64) -> SiResult<Self> {
        if batch == 0 {
            return Err(SiError::config("oracle reservation batch must be > 0"));
        }
        let path = path.as_ref().to_path_buf();
        let persisted = if path.exists() {
            read_bound(&path)?
        } else {
            0
        };
        info!(target: "snapkv::txn", path = ?path, resume_at = persisted, "Opened timestamp oracle");

        Ok(TimestampOracle {
            // Anything below the persisted bound may have been issued already
            state: Mutex::new(OracleState {
                last: persisted,
                reserved: persisted,
            }),
            path: Some(path),
            batch,
        })
    }

    /// Ensure every future timestamp is greater than `ts`
    ///
    /// Used after recovery so newly issued ids sort after every id found in
    /// the transaction table.
    pub fn advance_past(&self, ts: Timestamp) {
        let mut state = self.state.lock();
        if state.last < ts.as_u64() {
            state.last = ts.as_u64();
        }
    }
}

fn read_bound(path: &Path) -> SiResult<u64> {
    let bytes = fs::read(path)?;
    if bytes.len() != 8 {
        return Err(SiError::storage(format!(
            "oracle file {} is {} bytes, expected 8",
            path.display(),
            bytes.len()
        )));
    }
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes);
    Ok(u64::from_le_bytes(raw))
}

/// Write the bound to a temp file, fsync, then rename over the old one
fn persist_bound(path: &Path, bound: u64) -> SiResult<()> {
    let tmp = path.with_extension("tmp");
    {
        let mut file: File = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp)?;
        file.write_all(&bound.to_le_bytes())?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

impl TimestampSource for TimestampOracle {
    fn next(&self) -> SiResult<Timestamp> {
        let mut state = self.state.lock();
        let candidate = state.last + 1;
        if candidate >= state.reserved {
            if let Some(path) = &self.path {
                let bound = candidate + self.batch;
                persist_bound(path, bound)?;
                debug!(target: "snapkv::txn", bound, "Reserved timestamp batch");
                state.reserved = bound;
            }
        }
        state.last = candidate;
        Ok(Timestamp(candidate))
    }

    fn last_issued(&self) -> Timestamp {
        Timestamp(self.state.lock().last)
    }
}
