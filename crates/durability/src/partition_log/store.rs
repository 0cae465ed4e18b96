//! Log store backends
//!
//! A `LogStore` owns one append-only stream per partition. Creating a stream
//! is atomic create-if-absent, so two partitions racing to claim the same
//! id cannot both succeed.
//!
//! # File layout
//!
//! ```text
//! <dir>/<partition>.plog
//!
//! ┌──────────┬─────────┬──────────┬───────────────┬─────────────────────┐
//! │ "SKPL"(4)│ ver (2) │ rsvd (2) │ partition (8) │ frames ...          │
//! └──────────┴─────────┴──────────┴───────────────┴─────────────────────┘
//! ```

use super::record::LogRecord;
use crate::error::{DurabilityError, DurabilityResult};
use crate::frame::{append_frame, decode_frame, encode_frame, FrameError};
use crate::mode::DurabilityMode;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use snapkv_core::PartitionId;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, warn};

/// Magic bytes at the start of every partition log file
pub const LOG_MAGIC: &[u8; 4] = b"SKPL";
/// Current partition log file version
pub const LOG_FORMAT_VERSION: u16 = 1;
/// Size of the file header in bytes
pub const LOG_HEADER_SIZE: usize = 16;

const LOG_EXTENSION: &str = "plog";

/// Append handle on one partition's log
pub trait LogStream: Send {
    /// Partition that owns the stream
    fn partition(&self) -> PartitionId;

    /// Durably append one record (durability per the store's mode)
    fn append(&mut self, record: &LogRecord) -> DurabilityResult<()>;

    /// Read every record in append order
    fn read_all(&self) -> DurabilityResult<Vec<LogRecord>>;

    /// Force buffered appends to stable storage
    fn sync(&mut self) -> DurabilityResult<()>;
}

/// Backend holding the per-partition logs
pub trait LogStore: Send + Sync {
    /// Create a new stream; fails with `StreamExists` if one is present
    fn create_stream(&self, partition: PartitionId) -> DurabilityResult<Box<dyn LogStream>>;

    /// Open an existing stream for appending
    fn open_stream(&self, partition: PartitionId) -> DurabilityResult<Box<dyn LogStream>>;

    /// Read a stream without opening it for append; `None` if absent
    fn read_stream(&self, partition: PartitionId) -> DurabilityResult<Option<Vec<LogRecord>>>;

    /// Whether a stream exists
    fn exists(&self, partition: PartitionId) -> bool;

    /// Delete a stream
    fn remove_stream(&self, partition: PartitionId) -> DurabilityResult<()>;

    /// All stream ids, ascending
    fn list_streams(&self) -> DurabilityResult<Vec<PartitionId>>;
}

// ============================================================================
// In-memory store
// ============================================================================

type SharedRecords = Arc<Mutex<Vec<Vec<u8>>>>;

/// Log store kept entirely in memory
///
/// Records are stored encoded, so this backend exercises the same
/// serialization path as the file store.
#[derive(Default)]
pub struct MemoryLogStore {
    streams: DashMap<PartitionId, SharedRecords>,
}

impl MemoryLogStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

struct MemoryLogStream {
    partition: PartitionId,
    records: SharedRecords,
}

impl LogStream for MemoryLogStream {
    fn partition(&self) -> PartitionId {
        self.partition
    }

    fn append(&mut self, record: &LogRecord) -> DurabilityResult<()> {
        let bytes = record.to_bytes()?;
        self.records.lock().push(bytes);
        Ok(())
    }

    fn read_all(&self) -> DurabilityResult<Vec<LogRecord>> {
        decode_all(&self.records.lock())
    }

    fn sync(&mut self) -> DurabilityResult<()> {
        Ok(())
    }
}

fn decode_all(encoded: &[Vec<u8>]) -> DurabilityResult<Vec<LogRecord>> {
    encoded.iter().map(|b| LogRecord::from_bytes(b)).collect()
}

impl LogStore for MemoryLogStore {
    fn create_stream(&self, partition: PartitionId) -> DurabilityResult<Box<dyn LogStream>> {
        match self.streams.entry(partition) {
            Entry::Occupied(_) => Err(DurabilityError::StreamExists(partition)),
            Entry::Vacant(slot) => {
                let records = SharedRecords::default();
                slot.insert(Arc::clone(&records));
                Ok(Box::new(MemoryLogStream { partition, records }))
            }
        }
    }

    fn open_stream(&self, partition: PartitionId) -> DurabilityResult<Box<dyn LogStream>> {
        let records = self
            .streams
            .get(&partition)
            .map(|r| Arc::clone(r.value()))
            .ok_or(DurabilityError::StreamNotFound(partition))?;
        Ok(Box::new(MemoryLogStream { partition, records }))
    }

    fn read_stream(&self, partition: PartitionId) -> DurabilityResult<Option<Vec<LogRecord>>> {
        let records = match self.streams.get(&partition) {
            Some(r) => Arc::clone(r.value()),
            None => return Ok(None),
        };
        let guard = records.lock();
        decode_all(&guard).map(Some)
    }

    fn exists(&self, partition: PartitionId) -> bool {
        self.streams.contains_key(&partition)
    }

    fn remove_stream(&self, partition: PartitionId) -> DurabilityResult<()> {
        self.streams
            .remove(&partition)
            .map(|_| ())
            .ok_or(DurabilityError::StreamNotFound(partition))
    }

    fn list_streams(&self) -> DurabilityResult<Vec<PartitionId>> {
        let mut ids: Vec<PartitionId> = self.streams.iter().map(|e| *e.key()).collect();
        ids.sort();
        Ok(ids)
    }
}

// ============================================================================
// File store
// ============================================================================

/// Log store writing one `.plog` file per partition
pub struct FileLogStore {
    dir: PathBuf,
    durability: DurabilityMode,
}

impl FileLogStore {
    /// Open (creating if needed) a log directory
    pub fn open(dir: impl AsRef<Path>, durability: DurabilityMode) -> DurabilityResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(FileLogStore { dir, durability })
    }

    /// Directory holding the log files
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn stream_path(&self, partition: PartitionId) -> PathBuf {
        self.dir
            .join(format!("{:020}.{}", partition.as_u64(), LOG_EXTENSION))
    }

    fn stream_for(&self, partition: PartitionId, file: File) -> FileLogStream {
        FileLogStream {
            partition,
            path: self.stream_path(partition),
            file,
            durability: self.durability,
            appends_since_sync: 0,
            last_sync: Instant::now(),
            poisoned: false,
        }
    }
}

fn encode_header(partition: PartitionId) -> [u8; LOG_HEADER_SIZE] {
    let mut header = [0u8; LOG_HEADER_SIZE];
    header[0..4].copy_from_slice(LOG_MAGIC);
    header[4..6].copy_from_slice(&LOG_FORMAT_VERSION.to_le_bytes());
    header[8..16].copy_from_slice(&partition.as_u64().to_le_bytes());
    header
}

fn check_header(bytes: &[u8], partition: PartitionId) -> DurabilityResult<()> {
    if bytes.len() < LOG_HEADER_SIZE {
        return Err(DurabilityError::InvalidHeader(format!(
            "file is {} bytes, header needs {}",
            bytes.len(),
            LOG_HEADER_SIZE
        )));
    }
    if &bytes[0..4] != LOG_MAGIC {
        return Err(DurabilityError::InvalidHeader("bad magic".to_string()));
    }
    let version = u16::from_le_bytes([bytes[4], bytes[5]]);
    if version != LOG_FORMAT_VERSION {
        return Err(DurabilityError::InvalidHeader(format!(
            "unsupported version {}",
            version
        )));
    }
    let mut id = [0u8; 8];
    id.copy_from_slice(&bytes[8..16]);
    let stored = u64::from_le_bytes(id);
    if stored != partition.as_u64() {
        return Err(DurabilityError::InvalidHeader(format!(
            "file belongs to partition {}, expected {}",
            stored,
            partition.as_u64()
        )));
    }
    Ok(())
}

/// Parse a whole log file
///
/// Returns the records and the length of the valid prefix. A torn final
/// frame ends the log; corruption before the tail is an error.
fn parse_log(bytes: &[u8], partition: PartitionId) -> DurabilityResult<(Vec<LogRecord>, usize)> {
    check_header(bytes, partition)?;

    let mut records = Vec::new();
    let mut offset = LOG_HEADER_SIZE;
    while offset < bytes.len() {
        match decode_frame(&bytes[offset..]) {
            Ok((payload, consumed)) => {
                records.push(LogRecord::from_bytes(payload)?);
                offset += consumed;
            }
            Err(FrameError::InsufficientData) => {
                warn!(
                    target: "snapkv::log",
                    partition = %partition,
                    offset,
                    trailing = bytes.len() - offset,
                    "Ignoring torn record at end of partition log"
                );
                break;
            }
            Err(source) => {
                return Err(DurabilityError::Corrupted {
                    offset: offset as u64,
                    source,
                })
            }
        }
    }
    Ok((records, offset))
}

impl LogStore for FileLogStore {
    fn create_stream(&self, partition: PartitionId) -> DurabilityResult<Box<dyn LogStream>> {
        let path = self.stream_path(partition);
        let mut file = match OpenOptions::new()
            .write(true)
            .append(true)
            .create_new(true)
            .open(&path)
        {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(DurabilityError::StreamExists(partition))
            }
            Err(e) => return Err(e.into()),
        };
        file.write_all(&encode_header(partition))?;
        file.sync_all()?;
        debug!(target: "snapkv::log", partition = %partition, path = ?path, "Created partition log");
        Ok(Box::new(self.stream_for(partition, file)))
    }

    fn open_stream(&self, partition: PartitionId) -> DurabilityResult<Box<dyn LogStream>> {
        let path = self.stream_path(partition);
        if !path.exists() {
            return Err(DurabilityError::StreamNotFound(partition));
        }
        let bytes = fs::read(&path)?;
        let (_, valid_len) = parse_log(&bytes, partition)?;

        let file = OpenOptions::new().write(true).append(true).open(&path)?;
        if valid_len < bytes.len() {
            // Drop the torn tail so new frames start on a boundary
            file.set_len(valid_len as u64)?;
            file.sync_all()?;
        }
        Ok(Box::new(self.stream_for(partition, file)))
    }

    fn read_stream(&self, partition: PartitionId) -> DurabilityResult<Option<Vec<LogRecord>>> {
        let path = self.stream_path(partition);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path)?;
        parse_log(&bytes, partition).map(|(records, _)| Some(records))
    }

    fn exists(&self, partition: PartitionId) -> bool {
        self.stream_path(partition).exists()
    }

    fn remove_stream(&self, partition: PartitionId) -> DurabilityResult<()> {
        let path = self.stream_path(partition);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(DurabilityError::StreamNotFound(partition))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn list_streams(&self) -> DurabilityResult<Vec<PartitionId>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(LOG_EXTENSION) {
                continue;
            }
            if let Some(id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<u64>().ok())
            {
                ids.push(PartitionId(id));
            }
        }
        ids.sort();
        Ok(ids)
    }
}

/// Append handle on a `.plog` file
struct FileLogStream {
    partition: PartitionId,
    path: PathBuf,
    file: File,
    durability: DurabilityMode,
    appends_since_sync: usize,
    last_sync: Instant,
    /// Set once a partial frame could not be removed
    poisoned: bool,
}

impl LogStream for FileLogStream {
    fn partition(&self) -> PartitionId {
        self.partition
    }

    fn append(&mut self, record: &LogRecord) -> DurabilityResult<()> {
        if self.poisoned {
            return Err(DurabilityError::StreamClosed(self.partition));
        }
        let frame = encode_frame(&record.to_bytes()?);
        if let Err(e) = append_frame(&mut self.file, &frame) {
            if matches!(e, DurabilityError::TornWrite { .. }) {
                error!(target: "snapkv::log", partition = %self.partition, error = %e, "Partition log unusable after torn append");
                self.poisoned = true;
            }
            return Err(e);
        }
        self.appends_since_sync += 1;

        if self.durability.requires_immediate_fsync() {
            return self.sync();
        }
        let elapsed = self.last_sync.elapsed().as_millis() as u64;
        if self.durability.sync_due(self.appends_since_sync, elapsed) {
            self.sync()?;
        }
        Ok(())
    }

    fn read_all(&self) -> DurabilityResult<Vec<LogRecord>> {
        let bytes = fs::read(&self.path)?;
        parse_log(&bytes, self.partition).map(|(records, _)| records)
    }

    fn sync(&mut self) -> DurabilityResult<()> {
        if self.durability.requires_sync() {
            self.file.sync_data()?;
        }
        self.appends_since_sync = 0;
        self.last_sync = Instant::now();
        Ok(())
    }
}

impl Drop for FileLogStream {
    fn drop(&mut self) {
        if self.appends_since_sync > 0 && self.durability.requires_sync() {
            if let Err(e) = self.file.sync_data() {
                warn!(target: "snapkv::log", partition = %self.partition, error = %e, "Final log sync failed");
            }
        }
    }
}
