//! Event journal.
//!
//! An append-only, CRC-protected record of a run: the seed and
//! configuration, every operation with its reported row count, every
//! lifecycle transition, findings and the final counters. A journal is
//! enough to re-execute a run against a fresh database (see
//! [`crate::replay`]).
//!
//! # On-disk layout
//!
//! ```text
//! [MAGIC "RFJ1"][VERSION u32 LE][MAX_RECORD_SIZE u32 LE][HEADER_CRC32_LE]
//! [REC_LEN_LE][REC_BYTES][REC_CRC32_LE]
//! [REC_LEN_LE][REC_BYTES][REC_CRC32_LE]
//! ...
//! ```
//!
//! - Record bytes are one JSON-encoded [`Event`].
//! - The record checksum covers `len || record_bytes`.
//! - Reading stops at the first torn or corrupt record. Everything before
//!   it is returned, and the error is reported alongside.
//!
//! Appends are flushed to the OS immediately; [`Journal::sync`] forces them
//! to disk and is called at lifecycle ticks and at the end of a run.

#[cfg(test)]
mod tests;

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crc32fast::Hasher as Crc32;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::HarnessConfig;
use crate::lifecycle::LifecycleAction;
use crate::oracle::Finding;
use crate::session::Counters;
use crate::workload::Operation;

const U32_SIZE: usize = std::mem::size_of::<u32>();

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by journal operations.
#[derive(Debug, Error)]
pub enum JournalError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("event (de)serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// A record's checksum did not match its contents.
    #[error("checksum mismatch in record at offset {offset}")]
    ChecksumMismatch { offset: u64 },

    /// A length prefix exceeds the header's limit.
    #[error("record at offset {offset} exceeds limit ({len} bytes)")]
    RecordTooLarge { offset: u64, len: usize },

    /// The file ends inside a record.
    #[error("torn record at offset {offset}")]
    UnexpectedEof { offset: u64 },

    #[error("invalid journal header: {0}")]
    InvalidHeader(String),
}

// ------------------------------------------------------------------------------------------------
// Header
// ------------------------------------------------------------------------------------------------

/// Metadata at the start of a journal file, followed by its CRC32.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JournalHeader {
    pub magic: [u8; 4],
    pub version: u32,
    pub max_record_size: u32,
}

impl JournalHeader {
    pub const MAGIC: [u8; 4] = *b"RFJ1";
    pub const VERSION: u32 = 1;
    /// 1 MiB.
    pub const DEFAULT_MAX_RECORD_SIZE: u32 = 1024 * 1024;
    /// Encoded size, excluding the checksum.
    pub const SIZE: usize = 12;

    pub fn new(max_record_size: u32) -> Self {
        Self {
            magic: Self::MAGIC,
            version: Self::VERSION,
            max_record_size,
        }
    }

    fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[..4].copy_from_slice(&self.magic);
        buf[4..8].copy_from_slice(&self.version.to_le_bytes());
        buf[8..].copy_from_slice(&self.max_record_size.to_le_bytes());
        buf
    }

    fn decode(buf: &[u8; Self::SIZE]) -> Result<Self, JournalError> {
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&buf[..4]);
        let mut word = [0u8; U32_SIZE];
        word.copy_from_slice(&buf[4..8]);
        let version = u32::from_le_bytes(word);
        word.copy_from_slice(&buf[8..]);
        let max_record_size = u32::from_le_bytes(word);

        if magic != Self::MAGIC {
            return Err(JournalError::InvalidHeader("bad magic".into()));
        }
        if version != Self::VERSION {
            return Err(JournalError::InvalidHeader(format!(
                "unsupported version {version}"
            )));
        }
        Ok(Self {
            magic,
            version,
            max_record_size,
        })
    }
}

// ------------------------------------------------------------------------------------------------
// Events
// ------------------------------------------------------------------------------------------------

/// One journal record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    /// The run began. Recorded before setup touches the engine.
    Started {
        seed: u64,
        engine: String,
        config: HarnessConfig,
    },
    /// A workload operation and the row count the engine reported.
    Operation {
        iteration: u64,
        operation: Operation,
        affected: u64,
    },
    /// A lifecycle transition completed. Recorded before the checks that
    /// follow it.
    Lifecycle {
        iteration: u64,
        action: LifecycleAction,
    },
    /// The oracle detected a mismatch.
    Finding { finding: Finding },
    /// The run stopped on a non-consistency error.
    Failed { iteration: u64, error: String },
    /// The run completed.
    Finished { iterations: u64, counters: Counters },
}

// ------------------------------------------------------------------------------------------------
// Writer
// ------------------------------------------------------------------------------------------------

/// Append-only journal writer.
#[derive(Debug)]
pub struct Journal {
    file: BufWriter<File>,
    path: PathBuf,
    header: JournalHeader,
    records: u64,
    offset: u64,
}

impl Journal {
    /// Creates (or truncates) a journal at `path` and writes its header.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, JournalError> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        let mut file = BufWriter::new(file);

        let header = JournalHeader::new(JournalHeader::DEFAULT_MAX_RECORD_SIZE);
        let header_bytes = header.encode();
        let mut hasher = Crc32::new();
        hasher.update(&header_bytes);

        file.write_all(&header_bytes)?;
        file.write_all(&hasher.finalize().to_le_bytes())?;
        file.flush()?;
        file.get_ref().sync_all()?;

        info!(path = %path.display(), "journal: created");
        Ok(Self {
            file,
            path: path.to_path_buf(),
            header,
            records: 0,
            offset: (JournalHeader::SIZE + U32_SIZE) as u64,
        })
    }

    /// Appends one event.
    pub fn append(&mut self, event: &Event) -> Result<(), JournalError> {
        let bytes = serde_json::to_vec(event)?;
        let len = u32::try_from(bytes.len())
            .ok()
            .filter(|&len| len <= self.header.max_record_size)
            .ok_or(JournalError::RecordTooLarge {
                offset: self.offset,
                len: bytes.len(),
            })?;

        let mut hasher = Crc32::new();
        hasher.update(&len.to_le_bytes());
        hasher.update(&bytes);

        self.file.write_all(&len.to_le_bytes())?;
        self.file.write_all(&bytes)?;
        self.file.write_all(&hasher.finalize().to_le_bytes())?;
        self.file.flush()?;
        self.records += 1;
        self.offset += (U32_SIZE + bytes.len() + U32_SIZE) as u64;
        Ok(())
    }

    /// Forces appended records to disk.
    pub fn sync(&mut self) -> Result<(), JournalError> {
        self.file.flush()?;
        self.file.get_ref().sync_all()?;
        debug!(path = %self.path.display(), records = self.records, "journal: synced");
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records appended through this writer.
    pub fn records(&self) -> u64 {
        self.records
    }
}

// ------------------------------------------------------------------------------------------------
// Reader
// ------------------------------------------------------------------------------------------------

/// Streaming reader over a journal's events.
///
/// Yields events in order until the end of the file or the first torn or
/// corrupt record, which is yielded as an error and ends the iteration.
#[derive(Debug)]
pub struct JournalReader {
    file: BufReader<File>,
    header: JournalHeader,
    offset: u64,
    done: bool,
}

impl JournalReader {
    /// Opens `path` and validates its header.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, JournalError> {
        let path = path.as_ref();
        let mut file = BufReader::new(File::open(path)?);

        let mut header_bytes = [0u8; JournalHeader::SIZE];
        let mut crc_bytes = [0u8; U32_SIZE];
        file.read_exact(&mut header_bytes)
            .and_then(|_| file.read_exact(&mut crc_bytes))
            .map_err(|e| match e.kind() {
                io::ErrorKind::UnexpectedEof => {
                    JournalError::InvalidHeader("file shorter than header".into())
                }
                _ => JournalError::Io(e),
            })?;

        let mut hasher = Crc32::new();
        hasher.update(&header_bytes);
        if hasher.finalize() != u32::from_le_bytes(crc_bytes) {
            return Err(JournalError::InvalidHeader("header checksum mismatch".into()));
        }
        let header = JournalHeader::decode(&header_bytes)?;

        debug!(path = %path.display(), "journal: opened for reading");
        Ok(Self {
            file,
            header,
            offset: (JournalHeader::SIZE + U32_SIZE) as u64,
            done: false,
        })
    }

    pub fn header(&self) -> &JournalHeader {
        &self.header
    }

    fn read_record(&mut self) -> Result<Option<Event>, JournalError> {
        let offset = self.offset;

        let mut len_bytes = [0u8; U32_SIZE];
        let got = read_up_to(&mut self.file, &mut len_bytes)?;
        if got == 0 {
            return Ok(None);
        }
        if got < U32_SIZE {
            return Err(JournalError::UnexpectedEof { offset });
        }

        let len = u32::from_le_bytes(len_bytes) as usize;
        if len > self.header.max_record_size as usize {
            return Err(JournalError::RecordTooLarge { offset, len });
        }

        let mut bytes = vec![0u8; len];
        let mut crc_bytes = [0u8; U32_SIZE];
        if read_up_to(&mut self.file, &mut bytes)? < len
            || read_up_to(&mut self.file, &mut crc_bytes)? < U32_SIZE
        {
            return Err(JournalError::UnexpectedEof { offset });
        }

        let mut hasher = Crc32::new();
        hasher.update(&len_bytes);
        hasher.update(&bytes);
        if hasher.finalize() != u32::from_le_bytes(crc_bytes) {
            return Err(JournalError::ChecksumMismatch { offset });
        }

        self.offset += (U32_SIZE + len + U32_SIZE) as u64;
        Ok(Some(serde_json::from_slice(&bytes)?))
    }
}

impl Iterator for JournalReader {
    type Item = Result<Event, JournalError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_record() {
            Ok(Some(event)) => Some(Ok(event)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                warn!(error = %e, "journal: stopped at corrupt record");
                Some(Err(e))
            }
        }
    }
}

/// Reads as many bytes as are available, up to `buf.len()`.
fn read_up_to(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Everything readable from a journal.
#[derive(Debug)]
pub struct JournalContents {
    pub events: Vec<Event>,
    /// The torn or corrupt record reading stopped at, if any.
    pub corruption: Option<JournalError>,
}

/// Reads every intact event from the journal at `path`.
pub fn read_journal(path: impl AsRef<Path>) -> Result<JournalContents, JournalError> {
    let mut events = Vec::new();
    let mut corruption = None;
    for item in JournalReader::open(path)? {
        match item {
            Ok(event) => events.push(event),
            Err(e) => corruption = Some(e),
        }
    }
    Ok(JournalContents { events, corruption })
}
