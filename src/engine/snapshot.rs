//! Full snapshot of committed objects.

use crate::error::{PersistenceError, Result};
use crate::types::{ObjectId, StoredObject};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;

/// Magic bytes for snapshot files.
const SNAPSHOT_MAGIC: &[u8; 4] = b"OBJ\0";

/// Current snapshot format version.
const SNAPSHOT_VERSION: u8 = 1;

/// Magic, version and length prefix, plus the trailing checksum.
const FRAMING_SIZE: u64 = 4 + 1 + 8 + 4;

/// Everything committed as of `last_sequence`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Sequence of the last change set folded into this snapshot.
    pub last_sequence: u64,
    pub next_id: u64,
    pub objects: Vec<(ObjectId, StoredObject)>,
}

impl Snapshot {
    /// Write atomically: temp file, fsync, rename.
    pub fn save(&self, path: &Path) -> Result<()> {
        let tmp_path = path.with_extension("tmp");

        let encoded = rmp_serde::to_vec(self)?;

        {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp_path)?;

            file.write_all(SNAPSHOT_MAGIC)?;
            file.write_all(&[SNAPSHOT_VERSION])?;
            file.write_all(&(encoded.len() as u64).to_le_bytes())?;
            file.write_all(&encoded)?;
            file.write_all(&crc32fast::hash(&encoded).to_le_bytes())?;
            file.sync_all()?;
        }

        fs::rename(&tmp_path, path)?;
        Ok(())
    }

    /// Load a snapshot; a missing file is an empty store.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self {
                next_id: 1,
                ..Default::default()
            });
        }

        let mut file = File::open(path)?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != SNAPSHOT_MAGIC {
            return Err(PersistenceError::InvalidFormat("Invalid snapshot magic".into()).into());
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != SNAPSHOT_VERSION {
            return Err(PersistenceError::InvalidFormat(format!(
                "Unsupported snapshot version: {}",
                version[0]
            ))
            .into());
        }

        let mut len_bytes = [0u8; 8];
        file.read_exact(&mut len_bytes)?;
        let len = u64::from_le_bytes(len_bytes);

        let available = file.metadata()?.len().saturating_sub(FRAMING_SIZE);
        if len > available {
            return Err(PersistenceError::Corruption(format!(
                "snapshot claims {} bytes but only {} are present",
                len, available
            ))
            .into());
        }

        let mut encoded = vec![0u8; len as usize];
        file.read_exact(&mut encoded)?;

        let mut checksum_bytes = [0u8; 4];
        file.read_exact(&mut checksum_bytes)?;
        let expected = u32::from_le_bytes(checksum_bytes);
        let got = crc32fast::hash(&encoded);
        if expected != got {
            return Err(PersistenceError::ChecksumMismatch { expected, got }.into());
        }

        Ok(rmp_serde::from_slice(&encoded)?)
    }
}
