//! Commit journal.
//!
//! Every successful commit is appended here as one [`ChangeSet`] before it is
//! applied in memory. On open the journal is replayed over the last
//! snapshot. A torn or corrupt tail entry (crash mid-append) ends replay and
//! is cut off so later appends start from a clean boundary.

use crate::error::{PersistenceError, Result};
use crate::types::{ObjectId, StoredObject, Timestamp};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Magic bytes for the journal file.
const JOURNAL_MAGIC: &[u8; 4] = b"JNL\0";

/// Current journal format version.
const JOURNAL_VERSION: u8 = 1;

/// Header size (magic + version).
const HEADER_SIZE: u64 = 5;

/// Upper bound on one encoded entry. Larger change sets are refused on append
/// and larger frames are treated as corruption on replay.
const MAX_ENTRY_SIZE: usize = 256 * 1024 * 1024;

/// The durable record of one commit.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    /// Monotonic commit number, never reset by checkpoints.
    pub sequence: u64,
    pub inserted: Vec<(ObjectId, StoredObject)>,
    pub updated: Vec<(ObjectId, StoredObject)>,
    pub deleted: Vec<ObjectId>,
    /// Next object id to hand out once this commit is applied.
    pub next_id: u64,
    pub timestamp: Timestamp,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }
}

struct JournalFile {
    file: File,
    /// Offset just past the last good entry.
    len: u64,
    entries: u64,
}

/// Append-only journal of change sets.
pub struct Journal {
    path: PathBuf,
    inner: Mutex<JournalFile>,
}

impl Journal {
    /// Open or create the journal, returning it with every intact entry.
    pub fn open(path: impl AsRef<Path>) -> Result<(Self, Vec<ChangeSet>)> {
        let path = path.as_ref().to_path_buf();

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        let size = file.metadata()?.len();
        let (entries, len) = if size == 0 {
            file.write_all(JOURNAL_MAGIC)?;
            file.write_all(&[JOURNAL_VERSION])?;
            file.sync_all()?;
            (Vec::new(), HEADER_SIZE)
        } else {
            Self::read_all(&mut file, size)?
        };

        if len < size {
            warn!(
                path = %path.display(),
                good_bytes = len,
                file_bytes = size,
                "discarding torn journal tail"
            );
            file.set_len(len)?;
            file.sync_all()?;
        }

        let journal = Self {
            path,
            inner: Mutex::new(JournalFile {
                file,
                len,
                entries: entries.len() as u64,
            }),
        };

        Ok((journal, entries))
    }

    /// Append one change set and fsync it.
    ///
    /// On failure the file is cut back to the previous boundary.
    pub fn append(&self, change_set: &ChangeSet) -> Result<()> {
        let encoded = rmp_serde::to_vec(change_set)?;
        let len = Self::entry_len(encoded.len())?;

        let mut frame = Vec::with_capacity(encoded.len() + 8);
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(&encoded);
        frame.extend_from_slice(&crc32fast::hash(&encoded).to_le_bytes());

        let mut inner = self.inner.lock();
        let offset = inner.len;

        let written = Self::write_frame(&mut inner.file, offset, &frame);
        if let Err(e) = written {
            let _ = inner.file.set_len(offset);
            return Err(e);
        }

        inner.len = offset + frame.len() as u64;
        inner.entries += 1;
        Ok(())
    }

    /// Length prefix for an encoded entry of `len` bytes.
    fn entry_len(len: usize) -> Result<u32> {
        if len > MAX_ENTRY_SIZE {
            return Err(PersistenceError::Serialization(format!(
                "change set of {} bytes exceeds the {} byte journal entry limit",
                len, MAX_ENTRY_SIZE
            ))
            .into());
        }
        Ok(len as u32)
    }

    /// Drop every entry (after a checkpoint has captured them).
    pub fn reset(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.file.set_len(HEADER_SIZE)?;
        inner.file.sync_all()?;
        inner.len = HEADER_SIZE;
        inner.entries = 0;
        Ok(())
    }

    /// Number of entries since the last reset.
    pub fn entry_count(&self) -> u64 {
        self.inner.lock().entries
    }

    /// Current journal size in bytes.
    pub fn size(&self) -> u64 {
        self.inner.lock().len
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_frame(file: &mut File, offset: u64, frame: &[u8]) -> Result<()> {
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(frame)?;
        file.sync_data()?;
        Ok(())
    }

    /// Read the header and all intact entries; returns them with the offset
    /// just past the last good one.
    fn read_all(file: &mut File, size: u64) -> Result<(Vec<ChangeSet>, u64)> {
        file.seek(SeekFrom::Start(0))?;
        let mut reader = BufReader::new(&mut *file);

        let mut magic = [0u8; 4];
        reader
            .read_exact(&mut magic)
            .map_err(|_| PersistenceError::InvalidFormat("Journal header truncated".into()))?;
        if &magic != JOURNAL_MAGIC {
            return Err(PersistenceError::InvalidFormat("Invalid journal magic".into()).into());
        }

        let mut version = [0u8; 1];
        reader
            .read_exact(&mut version)
            .map_err(|_| PersistenceError::InvalidFormat("Journal header truncated".into()))?;
        if version[0] != JOURNAL_VERSION {
            return Err(PersistenceError::InvalidFormat(format!(
                "Unsupported journal version: {}",
                version[0]
            ))
            .into());
        }

        let mut entries = Vec::new();
        let mut offset = HEADER_SIZE;
        while offset < size {
            match Self::read_entry(&mut reader) {
                Ok((entry, frame_len)) => {
                    entries.push(entry);
                    offset += frame_len;
                }
                Err(e) => {
                    warn!(offset, error = %e, "journal replay stopped");
                    break;
                }
            }
        }

        Ok((entries, offset))
    }

    fn read_entry(reader: &mut impl Read) -> Result<(ChangeSet, u64)> {
        let mut len_bytes = [0u8; 4];
        reader.read_exact(&mut len_bytes)?;
        let len = u32::from_le_bytes(len_bytes) as usize;

        if len > MAX_ENTRY_SIZE {
            return Err(PersistenceError::Corruption("Journal entry too large".into()).into());
        }

        let mut encoded = vec![0u8; len];
        reader.read_exact(&mut encoded)?;

        let mut checksum_bytes = [0u8; 4];
        reader.read_exact(&mut checksum_bytes)?;
        let stored_checksum = u32::from_le_bytes(checksum_bytes);

        let computed_checksum = crc32fast::hash(&encoded);
        if stored_checksum != computed_checksum {
            return Err(PersistenceError::ChecksumMismatch {
                expected: stored_checksum,
                got: computed_checksum,
            }
            .into());
        }

        let entry = rmp_serde::from_slice(&encoded)?;
        Ok((entry, (len + 8) as u64))
    }
}
