//! Durable transaction table
//!
//! The registry persists every transaction record here. `insert` is
//! create-if-absent; `update` overwrites. The file backend is an append-only
//! log of framed records where the last record for an id wins on load;
//! `retain` rewrites it down to one record per surviving id.

use crate::error::{DurabilityError, DurabilityResult};
use crate::frame::{append_frame, decode_frame, encode_frame, FrameError};
use crate::mode::DurabilityMode;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use snapkv_core::{Transaction, TxnId};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Storage for transaction records
pub trait TransactionStore: Send + Sync {
    /// Persist a new record; fails with `RecordExists` if the id is taken
    fn insert(&self, txn: &Transaction) -> DurabilityResult<()>;

    /// Persist a new version of an existing record
    fn update(&self, txn: &Transaction) -> DurabilityResult<()>;

    /// Load a record
    fn get(&self, id: TxnId) -> DurabilityResult<Option<Transaction>>;

    /// Load every record, ascending by id
    fn scan(&self) -> DurabilityResult<Vec<Transaction>>;

    /// Drop every record `keep` rejects; returns how many were dropped
    fn retain(&self, keep: &dyn Fn(&Transaction) -> bool) -> DurabilityResult<usize>;
}

/// Transaction table held in memory
#[derive(Default)]
pub struct MemoryTransactionStore {
    records: DashMap<TxnId, Transaction>,
}

impl MemoryTransactionStore {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }
}

impl TransactionStore for MemoryTransactionStore {
    fn insert(&self, txn: &Transaction) -> DurabilityResult<()> {
        match self.records.entry(txn.id) {
            Entry::Occupied(_) => Err(DurabilityError::RecordExists(txn.id.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(txn.clone());
                Ok(())
            }
        }
    }

    fn update(&self, txn: &Transaction) -> DurabilityResult<()> {
        self.records.insert(txn.id, txn.clone());
        Ok(())
    }

    fn get(&self, id: TxnId) -> DurabilityResult<Option<Transaction>> {
        Ok(self.records.get(&id).map(|r| r.value().clone()))
    }

    fn scan(&self) -> DurabilityResult<Vec<Transaction>> {
        let mut all: Vec<Transaction> = self.records.iter().map(|r| r.value().clone()).collect();
        all.sort_by_key(|t| t.id);
        Ok(all)
    }

    fn retain(&self, keep: &dyn Fn(&Transaction) -> bool) -> DurabilityResult<usize> {
        let before = self.records.len();
        self.records.retain(|_, txn| keep(txn));
        Ok(before - self.records.len())
    }
}

/// Transaction table backed by an append-only file
pub struct FileTransactionStore {
    path: PathBuf,
    /// `None` once a torn write could not be cut back
    file: Mutex<Option<File>>,
    index: DashMap<TxnId, Transaction>,
    durability: DurabilityMode,
}

impl FileTransactionStore {
    /// File name inside the data directory
    pub const FILE_NAME: &'static str = "transactions.tlog";

    /// Open the table in `dir`, loading every record
    pub fn open(dir: impl AsRef<Path>, durability: DurabilityMode) -> DurabilityResult<Self> {
        fs::create_dir_all(dir.as_ref())?;
        let path = dir.as_ref().join(Self::FILE_NAME);

        let index = DashMap::new();
        let mut valid_len = 0usize;
        let mut total_len = 0usize;
        if path.exists() {
            let bytes = fs::read(&path)?;
            total_len = bytes.len();
            while valid_len < bytes.len() {
                match decode_frame(&bytes[valid_len..]) {
                    Ok((payload, consumed)) => {
                        let txn: Transaction = rmp_serde::from_slice(payload)
                            .map_err(|e| DurabilityError::Decode(e.to_string()))?;
                        index.insert(txn.id, txn);
                        valid_len += consumed;
                    }
                    Err(FrameError::InsufficientData) => break,
                    Err(source) => {
                        return Err(DurabilityError::Corrupted {
                            offset: valid_len as u64,
                            source,
                        })
                    }
                }
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        if valid_len < total_len {
            warn!(
                target: "snapkv::storage",
                path = ?path,
                dropped = total_len - valid_len,
                "Truncating torn record at end of transaction table"
            );
            file.set_len(valid_len as u64)?;
        }
        info!(target: "snapkv::storage", path = ?path, records = index.len(), "Opened transaction table");

        Ok(FileTransactionStore {
            path,
            file: Mutex::new(Some(file)),
            index,
            durability,
        })
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, slot: &mut Option<File>, txn: &Transaction) -> DurabilityResult<()> {
        let file = slot
            .as_mut()
            .ok_or_else(|| DurabilityError::TableUnavailable(self.path.display().to_string()))?;
        let payload =
            rmp_serde::to_vec(txn).map_err(|e| DurabilityError::Encode(e.to_string()))?;
        if let Err(e) = append_frame(file, &encode_frame(&payload)) {
            if matches!(e, DurabilityError::TornWrite { .. }) {
                error!(target: "snapkv::storage", path = ?self.path, error = %e, "Transaction table unusable after torn append");
                *slot = None;
            }
            return Err(e);
        }
        // Status changes gate visibility, so they are synced unless caching
        if self.durability.requires_sync() {
            file.sync_data()?;
        }
        Ok(())
    }

    /// Write `records` to a sibling file and move it over the table
    fn rewrite(&self, records: &[Transaction]) -> DurabilityResult<File> {
        let tmp = self.path.with_extension("tlog.tmp");
        {
            let mut out = File::create(&tmp)?;
            for txn in records {
                let payload =
                    rmp_serde::to_vec(txn).map_err(|e| DurabilityError::Encode(e.to_string()))?;
                out.write_all(&encode_frame(&payload))?;
            }
            out.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(OpenOptions::new().append(true).open(&self.path)?)
    }
}

impl TransactionStore for FileTransactionStore {
    fn insert(&self, txn: &Transaction) -> DurabilityResult<()> {
        let mut file = self.file.lock();
        if self.index.contains_key(&txn.id) {
            return Err(DurabilityError::RecordExists(txn.id.to_string()));
        }
        self.persist(&mut file, txn)?;
        self.index.insert(txn.id, txn.clone());
        Ok(())
    }

    fn update(&self, txn: &Transaction) -> DurabilityResult<()> {
        let mut file = self.file.lock();
        self.persist(&mut file, txn)?;
        self.index.insert(txn.id, txn.clone());
        Ok(())
    }

    fn get(&self, id: TxnId) -> DurabilityResult<Option<Transaction>> {
        Ok(self.index.get(&id).map(|r| r.value().clone()))
    }

    fn scan(&self) -> DurabilityResult<Vec<Transaction>> {
        let mut all: Vec<Transaction> = self.index.iter().map(|r| r.value().clone()).collect();
        all.sort_by_key(|t| t.id);
        Ok(all)
    }

    fn retain(&self, keep: &dyn Fn(&Transaction) -> bool) -> DurabilityResult<usize> {
        let mut slot = self.file.lock();
        if slot.is_none() {
            return Err(DurabilityError::TableUnavailable(self.path.display().to_string()));
        }
        let (survivors, dropped): (Vec<Transaction>, Vec<Transaction>) = self
            .scan()?
            .into_iter()
            .partition(|txn| keep(txn));
        if dropped.is_empty() {
            return Ok(0);
        }

        *slot = Some(self.rewrite(&survivors)?);
        for txn in &dropped {
            self.index.remove(&txn.id);
        }
        info!(
            target: "snapkv::storage",
            path = ?self.path,
            kept = survivors.len(),
            dropped = dropped.len(),
            "Compacted transaction table"
        );
        Ok(dropped.len())
    }
}
