pub(crate) mod file_segment;
pub(crate) mod name;
pub(crate) mod pipeline;
pub(crate) mod pool_segment;

use std::fmt;
use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::path::Path;

use fs2::FileExt;
use log::warn;

use crate::config::BackendKind;
use file_segment::FileSegment;
use pool_segment::PoolSegment;

/// Uniform capability set over one preallocated append-only segment.
///
/// Offsets are logical: bytes staged in the append buffer count towards
/// `offset`. Higher layers never branch on which implementation they hold.
pub(crate) trait SegmentBackend: fmt::Debug + Send {
    /// Buffered write at the tail.
    fn append(&mut self, data: &[u8]) -> Result<(), io::Error>;

    /// Pushes buffered bytes down one level.
    fn flush(&mut self) -> Result<(), io::Error>;

    /// Durable barrier. Implies `flush`.
    fn sync(&mut self) -> Result<(), io::Error>;

    /// Current logical tail offset.
    fn offset(&self) -> u64;

    /// Shrinks the segment to `off` bytes.
    fn truncate(&mut self, off: u64) -> Result<(), io::Error>;

    /// Durably overwrites everything from the current offset to the end of
    /// the segment with zeros, preserving the offset.
    fn zero_to_end(&mut self) -> Result<(), io::Error>;
}

/// Builds the configured backend over `f`, positioned at `off`.
pub(crate) fn new_backend(
    kind: BackendKind,
    f: File,
    off: u64,
) -> Result<Box<dyn SegmentBackend>, io::Error> {
    Ok(match kind {
        BackendKind::File => Box::new(FileSegment::new(f, off)?),
        BackendKind::Pool => Box::new(PoolSegment::new(f, off)),
    })
}

/// Best-effort physical preallocation, falling back to sparse extension
/// when the filesystem does not support allocation.
pub(crate) fn preallocate(f: &File, size: u64) -> Result<(), io::Error> {
    if let Err(e) = f.allocate(size) {
        warn!("segment preallocation failed, extending sparsely: {}", e);
        f.set_len(size)?;
    }
    Ok(())
}

/// Forward reader over a segment's bytes. Both backends share the on-disk
/// layout, so replay always reads through a plain file descriptor.
pub(crate) fn open_read(path: &Path) -> Result<File, io::Error> {
    OpenOptions::new().read(true).open(path)
}
