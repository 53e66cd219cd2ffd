use std::path::PathBuf;
use std::time::Duration;

use crate::segment::name::segment_file_name;

/// Which backend stores the bytes of a segment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BackendKind {
    /// A preallocated conventional file, made durable with `fdatasync`.
    #[default]
    File,
    /// A durable byte-addressable log pool: a completed flush is already
    /// durable, so the sync barrier has nothing left to do.
    Pool,
}

/// Configuration for a WAL handle.
///
/// Optional parameters are `Option<T>` in this struct, and default values
/// are evaluated when a getter method is called. Every value is per-handle;
/// tests pass a smaller segment size explicitly instead of mutating any
/// process-wide state.
#[derive(Clone, Debug, Default)]
pub struct Config {
    /// Base directory holding the WAL segment files.
    pub dir: String,

    /// Preallocated size of each segment file; reaching it triggers a cut.
    pub segment_size_bytes: Option<u64>,

    /// Size of the read buffer used when replaying segments.
    pub read_buffer_size: Option<usize>,

    /// Threshold in milliseconds above which a slow sync is logged.
    pub warn_sync_millis: Option<u64>,

    /// Segment backend to write through.
    pub backend: Option<BackendKind>,
}

impl Config {
    /// Creates a new Config with the specified directory and default values
    /// for other fields.
    pub fn new(dir: impl ToString) -> Self {
        Self {
            dir: dir.to_string(),
            ..Default::default()
        }
    }

    /// Returns the preallocated segment size in bytes (defaults to 64MB).
    pub fn segment_size_bytes(&self) -> u64 {
        self.segment_size_bytes.unwrap_or(64 * 1024 * 1024)
    }

    /// Returns the size of the replay read buffer in bytes (defaults to 1MB).
    pub fn read_buffer_size(&self) -> usize {
        self.read_buffer_size.unwrap_or(1024 * 1024)
    }

    /// Returns the duration above which a sync is reported as slow
    /// (defaults to 1 second).
    pub fn warn_sync_duration(&self) -> Duration {
        Duration::from_millis(self.warn_sync_millis.unwrap_or(1_000))
    }

    /// Returns the configured segment backend (defaults to a classic file).
    pub fn backend(&self) -> BackendKind {
        self.backend.unwrap_or_default()
    }

    pub(crate) fn dir_path(&self) -> PathBuf {
        PathBuf::from(&self.dir)
    }

    /// The staging directory used while `create` initializes the WAL.
    pub(crate) fn tmp_dir_path(&self) -> PathBuf {
        PathBuf::from(format!("{}.tmp", self.dir))
    }

    /// Returns the full path of the segment with the given sequence number
    /// and first entry index.
    pub(crate) fn segment_path(&self, seq: u64, first_index: u64) -> PathBuf {
        self.dir_path().join(segment_file_name(seq, first_index))
    }
}
