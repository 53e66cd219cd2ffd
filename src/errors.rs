use std::io;

use crate::types::Snapshot;

/// Errors surfaced by WAL operations.
///
/// Corruption and mismatch variants are fatal to the call: the handle is
/// considered poisoned and the caller should close it. I/O errors pass
/// through unchanged.
#[derive(Debug)]
#[derive(thiserror::Error)]
pub enum WalError {
    #[error("wal: directory already exists: {0}")]
    AlreadyExists(String),

    #[error("wal: conflicting metadata found")]
    MetadataConflict,

    #[error("wal: file not found")]
    FileNotFound,

    #[error("wal: crc mismatch: record says {expected:08x}, computed {got:08x}")]
    CrcMismatch { expected: u32, got: u32 },

    #[error("wal: snapshot mismatch: want {want}, got {got}")]
    SnapshotMismatch { want: Snapshot, got: Snapshot },

    #[error("wal: snapshot not found")]
    SnapshotNotFound,

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl WalError {
    /// A short read or a torn record, distinguished from corruption so the
    /// orchestrator can absorb it at the tail of the newest segment.
    pub(crate) fn is_torn_tail(&self) -> bool {
        matches!(self, WalError::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof)
    }
}

/// Error indicating that a segment file name is not in the
/// `<seq>-<first-index>.wal` form.
#[derive(Debug, Clone, PartialEq, Eq)]
#[derive(thiserror::Error)]
#[error("invalid WAL segment file name: {bad_file_name}: {reason}")]
pub struct InvalidSegmentFileName {
    pub bad_file_name: String,
    pub reason: String,
}

impl InvalidSegmentFileName {
    pub fn new(bad_file_name: impl ToString, reason: impl ToString) -> Self {
        Self {
            bad_file_name: bad_file_name.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl From<InvalidSegmentFileName> for io::Error {
    fn from(value: InvalidSegmentFileName) -> Self {
        io::Error::new(io::ErrorKind::InvalidInput, value.to_string())
    }
}

impl From<InvalidSegmentFileName> for WalError {
    fn from(value: InvalidSegmentFileName) -> Self {
        WalError::Io(value.into())
    }
}
