//! Append-only record log file.
//!
//! Entry layout (little endian):
//!
//! ```text
//! magic(4) version(1) flags(1) id(8) run(8) position(8) timestamp(8)
//! payload_len(4) payload(payload_len) crc32(4)
//! ```

use crate::error::{GridError, Result};
use crate::types::{Record, RecordId, RecordInput, RunId, Timestamp};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

/// Magic bytes for record entries.
const LOG_MAGIC: &[u8; 4] = b"GRD\0";

/// Current log format version.
const LOG_VERSION: u8 = 1;

/// Fixed header size: magic + version + flags + id + run + position + timestamp + payload_len.
const ENTRY_HEADER_SIZE: u64 = 4 + 1 + 1 + 8 + 8 + 8 + 8 + 4;

/// Trailing checksum size.
const ENTRY_TRAILER_SIZE: u64 = 4;

struct LogWriter {
    file: File,
    writes_since_sync: u64,
}

/// Append-only record log.
pub struct RecordLog {
    path: PathBuf,

    /// File handle; also serializes seeks for reads.
    writer: Mutex<LogWriter>,

    /// Next record ID to assign.
    next_id: AtomicU64,

    /// Offset one past the last complete entry.
    size: AtomicU64,

    /// Sync every N writes.
    sync_interval: u64,
}

impl RecordLog {
    /// Default sync interval.
    pub const DEFAULT_SYNC_INTERVAL: u64 = 100;

    /// Open or create a record log with the default sync interval.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_sync_interval(path, Self::DEFAULT_SYNC_INTERVAL)
    }

    /// Open or create a record log.
    ///
    /// `sync_interval` of 0 or 1 syncs every write. A torn entry at the tail
    /// (from a crash mid-append) is truncated away; damage anywhere else
    /// fails with `Corruption` and leaves the file untouched.
    pub fn open_with_sync_interval(path: impl AsRef<Path>, sync_interval: u64) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        let file_size = file.metadata()?.len();
        let (valid_end, max_id) = Self::scan_valid_end(&file)?;

        if valid_end < file_size {
            warn!(
                path = %path.display(),
                valid_end,
                file_size,
                "truncating torn entry at end of record log"
            );
            file.set_len(valid_end)?;
            file.sync_all()?;
        }

        Ok(Self {
            path,
            writer: Mutex::new(LogWriter {
                file,
                writes_since_sync: 0,
            }),
            next_id: AtomicU64::new(max_id + 1),
            size: AtomicU64::new(valid_end),
            sync_interval: sync_interval.max(1),
        })
    }

    /// Append a record for `run_id` at `position`.
    ///
    /// Returns the record and the offset where it was written.
    pub fn append(&self, input: RecordInput, run_id: RunId, position: u64) -> Result<(Record, u64)> {
        if input.payload.len() > u32::MAX as usize {
            return Err(GridError::InvalidFormat(format!(
                "payload of {} bytes exceeds entry limit",
                input.payload.len()
            )));
        }

        let mut writer = self.writer.lock();

        let record = Record {
            id: RecordId(self.next_id.fetch_add(1, Ordering::SeqCst)),
            run_id,
            position,
            timestamp: Timestamp::now(),
            payload: input.payload,
        };

        let offset = self.size.load(Ordering::SeqCst);
        let entry = encode_entry(&record);

        writer.file.seek(SeekFrom::Start(offset))?;
        writer.file.write_all(&entry)?;
        self.size.store(offset + entry.len() as u64, Ordering::SeqCst);

        writer.writes_since_sync += 1;
        if writer.writes_since_sync >= self.sync_interval {
            writer.file.sync_all()?;
            writer.writes_since_sync = 0;
        }

        Ok((record, offset))
    }

    /// Force sync all pending writes to disk.
    pub fn sync(&self) -> Result<()> {
        let mut writer = self.writer.lock();
        writer.file.sync_all()?;
        writer.writes_since_sync = 0;
        Ok(())
    }

    /// Read the record at `offset`.
    pub fn read_at(&self, offset: u64) -> Result<Record> {
        self.read_entry_at(offset).map(|(record, _)| record)
    }

    /// Iterate records from `offset` up to the end of the log at call time.
    pub fn iter_from(&self, offset: u64) -> LogIterator<'_> {
        LogIterator {
            log: self,
            offset,
            end: self.size(),
        }
    }

    /// Current logical size in bytes.
    pub fn size(&self) -> u64 {
        self.size.load(Ordering::SeqCst)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_entry_at(&self, offset: u64) -> Result<(Record, u64)> {
        let mut writer = self.writer.lock();
        writer.file.seek(SeekFrom::Start(offset))?;
        let mut reader = BufReader::new(&mut writer.file);
        let record = read_entry(&mut reader)?;
        let next = offset + entry_len(record.payload.len());
        Ok((record, next))
    }

    /// Find the end of the last complete entry and the largest record id.
    ///
    /// Only the final entry may be damaged: a short read, a checksum
    /// mismatch on an entry ending exactly at EOF, or zero fill up to EOF
    /// count as a torn write. A bad entry with data after it is corruption.
    fn scan_valid_end(file: &File) -> Result<(u64, u64)> {
        let file_size = file.metadata()?.len();
        let mut reader = file.try_clone()?;
        reader.seek(SeekFrom::Start(0))?;
        let mut reader = BufReader::new(reader);

        let mut offset = 0u64;
        let mut max_id = 0u64;

        loop {
            match read_entry(&mut reader) {
                Ok(record) => {
                    max_id = max_id.max(record.id.0);
                    offset += entry_len(record.payload.len());
                }
                Err(GridError::Io(e)) if e.kind() == ErrorKind::UnexpectedEof => break,
                Err(e @ GridError::ChecksumMismatch { .. }) => {
                    if Self::claimed_entry_end(file, offset)? == file_size {
                        break;
                    }
                    return Err(Self::corruption_at(offset, e));
                }
                Err(e @ GridError::InvalidFormat(_)) => {
                    if Self::is_zero_from(file, offset)? {
                        break;
                    }
                    return Err(Self::corruption_at(offset, e));
                }
                Err(e) => return Err(e),
            }
        }

        Ok((offset, max_id))
    }

    /// End offset of the entry at `offset` according to its length field.
    fn claimed_entry_end(file: &File, offset: u64) -> Result<u64> {
        let mut file = file.try_clone()?;
        file.seek(SeekFrom::Start(offset + ENTRY_HEADER_SIZE - 4))?;
        let payload_len = read_u32(&mut file)?;
        Ok(offset + entry_len(payload_len as usize))
    }

    fn is_zero_from(file: &File, offset: u64) -> Result<bool> {
        let mut file = file.try_clone()?;
        file.seek(SeekFrom::Start(offset))?;
        let mut rest = Vec::new();
        file.read_to_end(&mut rest)?;
        Ok(rest.iter().all(|&b| b == 0))
    }

    fn corruption_at(offset: u64, cause: GridError) -> GridError {
        GridError::Corruption(format!(
            "damaged record log entry at offset {} followed by more data: {}",
            offset, cause
        ))
    }
}

fn entry_len(payload_len: usize) -> u64 {
    ENTRY_HEADER_SIZE + payload_len as u64 + ENTRY_TRAILER_SIZE
}

fn encode_entry(record: &Record) -> Vec<u8> {
    let mut buf = Vec::with_capacity(entry_len(record.payload.len()) as usize);
    buf.extend_from_slice(LOG_MAGIC);
    buf.push(LOG_VERSION);
    // Flags (reserved)
    buf.push(0);
    buf.extend_from_slice(&record.id.0.to_le_bytes());
    buf.extend_from_slice(&record.run_id.0.to_le_bytes());
    buf.extend_from_slice(&record.position.to_le_bytes());
    buf.extend_from_slice(&record.timestamp.0.to_le_bytes());
    buf.extend_from_slice(&(record.payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(&record.payload);
    buf.extend_from_slice(&crc32fast::hash(&record.payload).to_le_bytes());
    buf
}

fn read_u64(reader: &mut impl Read) -> Result<u64> {
    let mut bytes = [0u8; 8];
    reader.read_exact(&mut bytes)?;
    Ok(u64::from_le_bytes(bytes))
}

fn read_u32(reader: &mut impl Read) -> Result<u32> {
    let mut bytes = [0u8; 4];
    reader.read_exact(&mut bytes)?;
    Ok(u32::from_le_bytes(bytes))
}

fn read_entry(reader: &mut impl Read) -> Result<Record> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if &magic != LOG_MAGIC {
        return Err(GridError::InvalidFormat("Invalid record magic".into()));
    }

    // Version and flags
    let mut version_flags = [0u8; 2];
    reader.read_exact(&mut version_flags)?;
    if version_flags[0] != LOG_VERSION {
        return Err(GridError::InvalidFormat(format!(
            "Unsupported log version: {}",
            version_flags[0]
        )));
    }

    let id = RecordId(read_u64(reader)?);
    let run_id = RunId(read_u64(reader)?);
    let position = read_u64(reader)?;
    let timestamp = Timestamp(read_u64(reader)? as i64);

    let payload_len = read_u32(reader)? as usize;
    let mut payload = vec![0u8; payload_len];
    reader.read_exact(&mut payload)?;

    let stored = read_u32(reader)?;
    let computed = crc32fast::hash(&payload);
    if stored != computed {
        return Err(GridError::ChecksumMismatch {
            expected: stored,
            got: computed,
        });
    }

    Ok(Record {
        id,
        run_id,
        position,
        timestamp,
        payload,
    })
}

/// Iterator over `(offset, record)` pairs in file order.
pub struct LogIterator<'a> {
    log: &'a RecordLog,
    offset: u64,
    end: u64,
}

impl<'a> Iterator for LogIterator<'a> {
    type Item = Result<(u64, Record)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.end {
            return None;
        }

        let current = self.offset;
        match self.log.read_entry_at(current) {
            Ok((record, next)) => {
                self.offset = next;
                Some(Ok((current, record)))
            }
            Err(e) => {
                // Stop iteration on error
                self.offset = self.end;
                Some(Err(e))
            }
        }
    }
}
