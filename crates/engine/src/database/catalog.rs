//! Partition catalog persisted as `partitions.toml`
//!
//! Records every partition the database has created, which ones were retired
//! by a split, and the next partition id to hand out. Each change rewrites the
//! whole file through a temporary file and a rename.

use crate::partition::PartitionInfo;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use snapkv_core::{PartitionId, SiError, SiResult};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Catalog file name placed in the database data directory.
pub const CATALOG_FILE_NAME: &str = "partitions.toml";

/// One catalog row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Split into children; never reopened
    #[serde(default)]
    pub retired: bool,
    /// Partition description
    pub info: PartitionInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct CatalogFile {
    next_partition_id: u64,
    #[serde(default)]
    partitions: Vec<CatalogEntry>,
}

pub(crate) struct Catalog {
    path: Option<PathBuf>,
    state: Mutex<CatalogFile>,
}

impl Catalog {
    pub(crate) fn in_memory() -> Self {
        Catalog {
            path: None,
            state: Mutex::new(CatalogFile::default()),
        }
    }

    /// Load `path`, or start empty if it does not exist yet
    pub(crate) fn open(path: &Path) -> SiResult<Self> {
        let state = if path.exists() {
            let content = fs::read_to_string(path)?;
            toml::from_str(&content).map_err(|e| {
                SiError::Serialization(format!(
                    "Failed to parse catalog '{}': {}",
                    path.display(),
                    e
                ))
            })?
        } else {
            CatalogFile::default()
        };
        Ok(Catalog {
            path: Some(path.to_path_buf()),
            state: Mutex::new(state),
        })
    }

    fn persist(&self, file: &CatalogFile) -> SiResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let content = toml::to_string(file)
            .map_err(|e| SiError::Serialization(format!("Failed to serialize catalog: {}", e)))?;
        let tmp = path.with_extension("toml.tmp");
        {
            let mut out = File::create(&tmp)?;
            out.write_all(content.as_bytes())?;
            out.sync_all()?;
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Apply `change` and persist; nothing changes in memory if persisting fails
    fn update<T>(&self, change: impl FnOnce(&mut CatalogFile) -> T) -> SiResult<T> {
        let mut state = self.state.lock();
        let mut next = state.clone();
        let out = change(&mut next);
        self.persist(&next)?;
        *state = next;
        Ok(out)
    }

    pub(crate) fn allocate_id(&self) -> SiResult<PartitionId> {
        self.update(|file| {
            file.next_partition_id += 1;
            PartitionId(file.next_partition_id)
        })
    }

    pub(crate) fn record(&self, info: &PartitionInfo) -> SiResult<()> {
        self.update(|file| {
            file.partitions.retain(|e| e.info.id != info.id);
            file.partitions.push(CatalogEntry {
                info: info.clone(),
                retired: false,
            });
        })
    }

    /// Retire `parent` and record both children in one write
    pub(crate) fn record_split(
        &self,
        parent: PartitionId,
        left: &PartitionInfo,
        right: &PartitionInfo,
    ) -> SiResult<()> {
        self.update(|file| {
            for entry in file.partitions.iter_mut() {
                if entry.info.id == parent {
                    entry.retired = true;
                }
            }
            for child in [left, right] {
                file.partitions.push(CatalogEntry {
                    info: child.clone(),
                    retired: false,
                });
            }
        })
    }

    pub(crate) fn get(&self, id: PartitionId) -> Option<CatalogEntry> {
        self.state
            .lock()
            .partitions
            .iter()
            .find(|e| e.info.id == id)
            .cloned()
    }

    /// Partitions that have not been retired, in creation order
    pub(crate) fn live(&self) -> Vec<PartitionInfo> {
        self.state
            .lock()
            .partitions
            .iter()
            .filter(|e| !e.retired)
            .map(|e| e.info.clone())
            .collect()
    }
}
