//! On-disk session snapshot for revive.
//!
//! A terminated session can be resumed by a later process if its identity
//! and counters were saved.  The snapshot is a fixed 28-byte record:
//!
//! ```text
//!  0        16       20         24         28
//!  ├── sid ──┼─ sttl ─┼ next_seq ┼ last_ack ┤   (u32 fields little-endian)
//! ```

use std::fs;
use std::io::{Read, Write};
use std::path::Path;

use thiserror::Error;

use crate::packet::SessionId;

/// Exact on-disk size of a [`SessionRecord`].
pub const RECORD_LEN: usize = 28;

/// Snapshot of the session state needed to revive it later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionRecord {
    /// Session identifier assigned by the central.
    pub sid: SessionId,
    /// Session time-to-live in milliseconds as last advertised.
    pub sttl: u32,
    /// Sequence number the revived session will assign next.
    pub next_seq: u32,
    /// Greatest acknowledgment number the session had received.
    pub last_ack: u32,
}

impl SessionRecord {
    /// Write the record to `path` in a single 28-byte write.
    pub fn save(&self, path: &Path) -> Result<(), PersistError> {
        let mut buf = Vec::with_capacity(RECORD_LEN);
        buf.extend_from_slice(self.sid.as_bytes());
        buf.extend_from_slice(&self.sttl.to_le_bytes());
        buf.extend_from_slice(&self.next_seq.to_le_bytes());
        buf.extend_from_slice(&self.last_ack.to_le_bytes());

        let mut file = fs::File::create(path)?;
        file.write_all(&buf)?;
        Ok(())
    }

    /// Read a record back; the file must hold at least 28 bytes.
    pub fn load(path: &Path) -> Result<Self, PersistError> {
        let mut file = fs::File::open(path)?;
        let mut buf = [0u8; RECORD_LEN];
        file.read_exact(&mut buf).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                PersistError::ShortRecord
            } else {
                PersistError::Io(e)
            }
        })?;

        let mut sid = [0u8; 16];
        sid.copy_from_slice(&buf[0..16]);
        Ok(Self {
            sid: SessionId(sid),
            sttl: u32::from_le_bytes(buf[16..20].try_into().unwrap()),
            next_seq: u32::from_le_bytes(buf[20..24].try_into().unwrap()),
            last_ack: u32::from_le_bytes(buf[24..28].try_into().unwrap()),
        })
    }
}

/// Errors from saving or loading a session snapshot.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("snapshot I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot file shorter than {RECORD_LEN} bytes")]
    ShortRecord,
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
