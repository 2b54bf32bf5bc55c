//! Metabase write-ahead log
//!
//! Append-only log of [`MetaOp`] records with:
//! - Sequential LSN assignment
//! - CRC32C checksums per record
//! - Replay from any LSN
//! - Reset after a snapshot covers every logged record
//!
//! Record format:
//! ```text
//! +--------+------+--------+------+--------+
//! | Magic  | LSN  | Length | Data | CRC32C |
//! | 4B     | 8B   | 4B     | var  | 4B     |
//! +--------+------+--------+------+--------+
//! ```
//!
//! A torn record at the tail (crash mid-append) ends the log; it is cut off
//! when the log is reopened.

use super::types::MetaOp;
use casnode_common::{Error, Result, Tier};
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

const WAL_MAGIC: u32 = 0x4357_414C; // "CWAL"

/// Record header size (magic + lsn + length)
const RECORD_HEADER_SIZE: usize = 16;
const RECORD_TRAILER_SIZE: usize = 4;

fn wal_err(what: &str, e: &std::io::Error) -> Error {
    Error::storage(Tier::MetadataIndex, format!("WAL {what}: {e}"))
}

/// Log options
#[derive(Clone, Debug)]
pub struct WalOptions {
    /// Sync after every append
    pub sync_on_write: bool,
    /// Size above which compaction is wanted
    pub max_size_bytes: u64,
    /// Buffer size for writes
    pub write_buffer_size: usize,
}

impl Default for WalOptions {
    fn default() -> Self {
        Self {
            sync_on_write: true,
            max_size_bytes: 64 * 1024 * 1024,
            write_buffer_size: 64 * 1024,
        }
    }
}

/// Encode one record
fn encode_record(lsn: u64, data: &[u8]) -> Result<Vec<u8>> {
    let len = u32::try_from(data.len()).map_err(|_| {
        Error::storage(Tier::MetadataIndex, "WAL record larger than 4 GiB")
    })?;
    let mut buf = Vec::with_capacity(RECORD_HEADER_SIZE + data.len() + RECORD_TRAILER_SIZE);
    buf.extend_from_slice(&WAL_MAGIC.to_le_bytes());
    buf.extend_from_slice(&lsn.to_le_bytes());
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(data);
    let crc = crc32c::crc32c(&buf);
    buf.extend_from_slice(&crc.to_le_bytes());
    Ok(buf)
}

/// Decode the record at the start of `buf`: `(lsn, data, record size)`
///
/// `None` means the bytes do not hold a complete, intact record.
fn decode_record(buf: &[u8]) -> Option<(u64, &[u8], usize)> {
    if buf.len() < RECORD_HEADER_SIZE + RECORD_TRAILER_SIZE {
        return None;
    }
    let magic = u32::from_le_bytes(buf[0..4].try_into().ok()?);
    if magic != WAL_MAGIC {
        return None;
    }
    let lsn = u64::from_le_bytes(buf[4..12].try_into().ok()?);
    let len = u32::from_le_bytes(buf[12..16].try_into().ok()?) as usize;
    let total = RECORD_HEADER_SIZE + len + RECORD_TRAILER_SIZE;
    if buf.len() < total {
        return None;
    }
    let body_end = RECORD_HEADER_SIZE + len;
    let stored = u32::from_le_bytes(buf[body_end..total].try_into().ok()?);
    if crc32c::crc32c(&buf[..body_end]) != stored {
        return None;
    }
    Some((lsn, &buf[RECORD_HEADER_SIZE..body_end], total))
}

/// Walk the intact prefix of a log file: `(records, valid length)`
fn read_records(path: &Path) -> Result<(Vec<(u64, Vec<u8>)>, u64)> {
    let raw = match fs::read(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok((Vec::new(), 0)),
        Err(e) => return Err(wal_err("read failed", &e)),
    };
    let mut records = Vec::new();
    let mut offset = 0;
    while let Some((lsn, data, size)) = decode_record(&raw[offset..]) {
        records.push((lsn, data.to_vec()));
        offset += size;
    }
    if offset < raw.len() {
        warn!(
            "WAL {:?} has {} trailing bytes after the last intact record",
            path,
            raw.len() - offset
        );
    }
    Ok((records, offset as u64))
}

/// Metabase write-ahead log
pub struct MetaWal {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
    size: AtomicU64,
    next_lsn: AtomicU64,
    options: WalOptions,
}

impl MetaWal {
    /// Open the log at `path`, creating it if missing
    ///
    /// LSNs continue after the last logged record and never restart below
    /// `min_lsn` (the LSN of the newest snapshot).
    pub fn open(path: impl AsRef<Path>, options: WalOptions, min_lsn: u64) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let (records, valid_len) = read_records(&path)?;
        let last_lsn = records.last().map_or(0, |(lsn, _)| *lsn);

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| wal_err("open failed", &e))?;
        // drop a torn tail so new records follow intact ones
        file.set_len(valid_len)
            .map_err(|e| wal_err("truncate failed", &e))?;
        drop(file);

        let file = OpenOptions::new()
            .append(true)
            .open(&path)
            .map_err(|e| wal_err("open failed", &e))?;

        Ok(Self {
            writer: Mutex::new(BufWriter::with_capacity(options.write_buffer_size, file)),
            size: AtomicU64::new(valid_len),
            next_lsn: AtomicU64::new(last_lsn.max(min_lsn) + 1),
            path,
            options,
        })
    }

    /// Append an operation; returns its LSN
    pub fn append(&self, op: &MetaOp) -> Result<u64> {
        let data = op.to_bytes()?;
        let mut writer = self.writer.lock();
        let lsn = self.next_lsn.load(Ordering::SeqCst);
        let bytes = encode_record(lsn, &data)?;

        writer
            .write_all(&bytes)
            .map_err(|e| wal_err("write failed", &e))?;
        if self.options.sync_on_write {
            writer.flush().map_err(|e| wal_err("flush failed", &e))?;
            writer
                .get_ref()
                .sync_data()
                .map_err(|e| wal_err("sync failed", &e))?;
        }

        self.next_lsn.store(lsn + 1, Ordering::SeqCst);
        self.size.fetch_add(bytes.len() as u64, Ordering::Relaxed);
        Ok(lsn)
    }

    /// Flush buffered records and sync them to disk
    pub fn sync(&self) -> Result<()> {
        let mut writer = self.writer.lock();
        writer.flush().map_err(|e| wal_err("flush failed", &e))?;
        writer
            .get_ref()
            .sync_all()
            .map_err(|e| wal_err("sync failed", &e))
    }

    /// Call `apply` for every logged operation with LSN >= `from_lsn`
    pub fn replay<F>(&self, from_lsn: u64, mut apply: F) -> Result<u64>
    where
        F: FnMut(u64, MetaOp) -> Result<()>,
    {
        self.writer
            .lock()
            .flush()
            .map_err(|e| wal_err("flush failed", &e))?;

        let (records, _) = read_records(&self.path)?;
        let mut replayed = 0;
        for (lsn, data) in records {
            if lsn < from_lsn {
                continue;
            }
            let op = MetaOp::from_bytes(&data).ok_or_else(|| {
                Error::DataCorruption(format!("undecodable WAL record at LSN {lsn}"))
            })?;
            apply(lsn, op)?;
            replayed += 1;
        }
        Ok(replayed)
    }

    /// Empty the log once a snapshot covers every record in it
    ///
    /// The caller must keep appends out while this runs.
    pub fn reset(&self) -> Result<()> {
        let new_path = self.path.with_extension("wal.new");
        {
            let file = File::create(&new_path).map_err(|e| wal_err("create failed", &e))?;
            file.sync_all().map_err(|e| wal_err("sync failed", &e))?;
        }

        let mut writer = self.writer.lock();
        writer.flush().map_err(|e| wal_err("flush failed", &e))?;
        fs::rename(&new_path, &self.path).map_err(|e| wal_err("rename failed", &e))?;

        let file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|e| wal_err("reopen failed", &e))?;
        *writer = BufWriter::with_capacity(self.options.write_buffer_size, file);
        self.size.store(0, Ordering::Relaxed);
        Ok(())
    }

    /// Last assigned LSN
    pub fn current_lsn(&self) -> u64 {
        self.next_lsn.load(Ordering::SeqCst).saturating_sub(1)
    }

    /// Bytes written since the last reset
    pub fn size(&self) -> u64 {
        self.size.load(Ordering::Relaxed)
    }

    pub fn needs_compaction(&self) -> bool {
        self.size() > self.options.max_size_bytes
    }
}
