use std::fs::File;
use std::io;
use std::io::Seek;
use std::io::SeekFrom;
use std::io::Write;

use crate::segment::preallocate;
use crate::segment::SegmentBackend;

/// Appends are pushed to the file once this much is buffered.
const FLUSH_THRESHOLD: usize = 32 * 1024;

/// A preallocated conventional file segment.
#[derive(Debug)]
pub(crate) struct FileSegment {
    f: File,
    /// Physical write position of `f`; buffered bytes are not included.
    pos: u64,
    buf: Vec<u8>,
}

impl FileSegment {
    pub(crate) fn new(mut f: File, off: u64) -> Result<Self, io::Error> {
        f.seek(SeekFrom::Start(off))?;
        Ok(Self {
            f,
            pos: off,
            buf: Vec::new(),
        })
    }
}

impl SegmentBackend for FileSegment {
    fn append(&mut self, data: &[u8]) -> Result<(), io::Error> {
        self.buf.extend_from_slice(data);
        if self.buf.len() >= FLUSH_THRESHOLD {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), io::Error> {
        if self.buf.is_empty() {
            return Ok(());
        }
        self.f.write_all(&self.buf)?;
        self.pos += self.buf.len() as u64;
        self.buf.clear();
        Ok(())
    }

    fn sync(&mut self) -> Result<(), io::Error> {
        self.flush()?;
        self.f.sync_data()
    }

    fn offset(&self) -> u64 {
        self.pos + self.buf.len() as u64
    }

    fn truncate(&mut self, off: u64) -> Result<(), io::Error> {
        self.flush()?;
        self.f.set_len(off)?;
        self.f.seek(SeekFrom::Start(off))?;
        self.pos = off;
        Ok(())
    }

    fn zero_to_end(&mut self) -> Result<(), io::Error> {
        self.flush()?;

        let len = self.f.metadata()?.len();

        // Shrink then re-extend: the region past the offset reads back as
        // zeros without writing them out.
        self.f.set_len(self.pos)?;
        preallocate(&self.f, len)?;

        self.f.seek(SeekFrom::Start(self.pos))?;
        self.f.sync_data()
    }
}
