use std::fs::File;
use std::io;
use std::os::unix::fs::FileExt;

use crate::segment::SegmentBackend;

/// A durable byte-addressable log pool segment.
///
/// Models a persistent-memory style pool over positioned writes: the
/// region is fixed-size, appends land at an explicit head pointer, and a
/// completed `flush` is already durable, so `sync` has nothing left to do.
#[derive(Debug)]
pub(crate) struct PoolSegment {
    f: File,
    /// Head pointer: offset where the next flushed byte lands.
    head: u64,
    buf: Vec<u8>,
}

impl PoolSegment {
    pub(crate) fn new(f: File, head: u64) -> Self {
        Self {
            f,
            head,
            buf: Vec::new(),
        }
    }
}

impl SegmentBackend for PoolSegment {
    fn append(&mut self, data: &[u8]) -> Result<(), io::Error> {
        self.buf.extend_from_slice(data);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), io::Error> {
        if self.buf.is_empty() {
            return Ok(());
        }
        self.f.write_all_at(&self.buf, self.head)?;
        self.head += self.buf.len() as u64;
        self.buf.clear();
        Ok(())
    }

    fn sync(&mut self) -> Result<(), io::Error> {
        // Flushing is the durability point of the pool.
        self.flush()
    }

    fn offset(&self) -> u64 {
        self.head + self.buf.len() as u64
    }

    fn truncate(&mut self, off: u64) -> Result<(), io::Error> {
        self.flush()?;
        self.f.set_len(off)?;
        self.head = off;
        Ok(())
    }

    fn zero_to_end(&mut self) -> Result<(), io::Error> {
        self.flush()?;

        let len = self.f.metadata()?.len();
        let zeros = [0u8; 8192];

        let mut off = self.head;
        while off < len {
            let n = ((len - off) as usize).min(zeros.len());
            self.f.write_all_at(&zeros[..n], off)?;
            off += n as u64;
        }

        Ok(())
    }
}
