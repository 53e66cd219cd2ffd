//! Consensus payload types persisted inside WAL records.
//!
//! All integers are encoded little-endian. The WAL itself treats these
//! payloads as opaque data bytes for checksumming; only replay and the
//! sync policy look inside them.

use std::fmt;
use std::io;

use byteorder::LittleEndian;
use byteorder::ReadBytesExt;
use byteorder::WriteBytesExt;

/// A single raft log entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Entry {
    pub term: u64,
    pub index: u64,
    pub data: Vec<u8>,
}

impl Entry {
    pub fn new(term: u64, index: u64, data: impl Into<Vec<u8>>) -> Self {
        Self {
            term,
            index,
            data: data.into(),
        }
    }
}

impl codeq::Encode for Entry {
    fn encode<W: io::Write>(&self, mut w: W) -> Result<usize, io::Error> {
        w.write_u64::<LittleEndian>(self.term)?;
        w.write_u64::<LittleEndian>(self.index)?;
        w.write_u32::<LittleEndian>(self.data.len() as u32)?;
        w.write_all(&self.data)?;
        Ok(8 + 8 + 4 + self.data.len())
    }
}

impl codeq::Decode for Entry {
    fn decode<R: io::Read>(mut r: R) -> Result<Self, io::Error> {
        let term = r.read_u64::<LittleEndian>()?;
        let index = r.read_u64::<LittleEndian>()?;
        let len = r.read_u32::<LittleEndian>()? as usize;
        let mut data = vec![0u8; len];
        r.read_exact(&mut data)?;
        Ok(Self { term, index, data })
    }
}

/// Opaque consensus durability state: term, vote and commit index.
///
/// The WAL preserves only the most recent one observed during replay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HardState {
    pub term: u64,
    pub vote: u64,
    pub commit: u64,
}

impl HardState {
    /// An all-zero hard state carries no information and is never written.
    pub fn is_empty(&self) -> bool {
        *self == HardState::default()
    }
}

impl fmt::Display for HardState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "(term={}, vote={}, commit={})",
            self.term, self.vote, self.commit
        )
    }
}

impl codeq::Encode for HardState {
    fn encode<W: io::Write>(&self, mut w: W) -> Result<usize, io::Error> {
        w.write_u64::<LittleEndian>(self.term)?;
        w.write_u64::<LittleEndian>(self.vote)?;
        w.write_u64::<LittleEndian>(self.commit)?;
        Ok(24)
    }
}

impl codeq::Decode for HardState {
    fn decode<R: io::Read>(mut r: R) -> Result<Self, io::Error> {
        let term = r.read_u64::<LittleEndian>()?;
        let vote = r.read_u64::<LittleEndian>()?;
        let commit = r.read_u64::<LittleEndian>()?;
        Ok(Self { term, vote, commit })
    }
}

/// A snapshot marker: the (index, term) of an external snapshot.
///
/// Not the snapshot data itself; replay starts from the position this
/// marker names.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub index: u64,
    pub term: u64,
}

impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(index={}, term={})", self.index, self.term)
    }
}

impl codeq::Encode for Snapshot {
    fn encode<W: io::Write>(&self, mut w: W) -> Result<usize, io::Error> {
        w.write_u64::<LittleEndian>(self.index)?;
        w.write_u64::<LittleEndian>(self.term)?;
        Ok(16)
    }
}

impl codeq::Decode for Snapshot {
    fn decode<R: io::Read>(mut r: R) -> Result<Self, io::Error> {
        let index = r.read_u64::<LittleEndian>()?;
        let term = r.read_u64::<LittleEndian>()?;
        Ok(Self { index, term })
    }
}

/// Whether a save must be durable before it returns.
///
/// A non-empty hard state always syncs. Entries alone sync only when the
/// term advanced past the last persisted hard state; until then raft does
/// not require them on disk.
pub(crate) fn must_sync(state: &HardState, prev: &HardState, entries: usize) -> bool {
    !state.is_empty() || (entries > 0 && state.term > prev.term)
}
