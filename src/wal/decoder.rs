use std::fs::File;
use std::io;
use std::io::Read;

use codeq::Decode;

use crate::errors::WalError;
use crate::wal::record::decode_frame_size;
use crate::wal::record::Record;
use crate::wal::record::RecordType;
use crate::wal::record::FRAME_HEADER_SIZE;

/// Writes shorter than one disk sector are assumed atomic by the torn
/// write check.
const MIN_SECTOR_SIZE: u64 = 512;

/// Multi-segment forward decoder with a chained running CRC.
///
/// Reads the logical concatenation of the given segments, advancing to the
/// next one when the current segment runs out of records. A zero length
/// field marks the zeroed preallocated region, the end of a segment's
/// records.
#[derive(Debug)]
pub(crate) struct Decoder {
    /// One buffered reader per selected segment, oldest first.
    readers: Vec<io::BufReader<File>>,

    /// Index of the segment currently being decoded.
    cur: usize,

    crc: u32,

    /// Offset just past the last fully decoded frame in the current
    /// segment; recovery zeroes everything after it.
    last_valid_off: u64,
}

impl Decoder {
    pub(crate) fn new(files: Vec<File>, buf_size: usize) -> Self {
        let readers = files
            .into_iter()
            .map(|f| io::BufReader::with_capacity(buf_size, f))
            .collect();

        Self {
            readers,
            cur: 0,
            crc: 0,
            last_valid_off: 0,
        }
    }

    /// Decodes the next record; `Ok(None)` at the clean end of the log.
    ///
    /// A frame cut short mid-write surfaces as an `UnexpectedEof` I/O
    /// error; a record whose bytes fail the CRC surfaces as `CrcMismatch`,
    /// unless the damage sits in an all-zero sector of the newest segment,
    /// which is a torn write rather than corruption.
    pub(crate) fn decode(&mut self) -> Result<Option<Record>, WalError> {
        loop {
            if self.cur >= self.readers.len() {
                return Ok(None);
            }

            let Some(len_field) = self.read_len_field()? else {
                // End of this segment's records; continue with the next.
                self.cur += 1;
                if self.cur < self.readers.len() {
                    self.last_valid_off = 0;
                }
                continue;
            };

            let (payload_len, pad) = decode_frame_size(len_field);

            let mut payload = vec![0u8; (payload_len + pad) as usize];
            self.readers[self.cur]
                .read_exact(&mut payload)
                .map_err(WalError::Io)?;

            let rec = match Record::decode(&payload[..payload_len as usize]) {
                Ok(rec) => rec,
                Err(e) => {
                    if self.is_torn_frame(&payload) {
                        return Err(torn_frame_error());
                    }
                    return Err(WalError::Io(e));
                }
            };

            if rec.rtype == RecordType::Crc {
                if !rec.data.is_empty() {
                    return Err(WalError::Io(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "crc record carries payload bytes",
                    )));
                }
            } else {
                self.crc = crc32c::crc32c_append(self.crc, &rec.data);
                if rec.crc != self.crc {
                    if self.is_torn_frame(&payload) {
                        return Err(torn_frame_error());
                    }
                    return Err(WalError::CrcMismatch {
                        expected: rec.crc,
                        got: self.crc,
                    });
                }
            }

            self.last_valid_off += FRAME_HEADER_SIZE + payload_len + pad;
            return Ok(Some(rec));
        }
    }

    /// Reads the 8-byte length field. `None` when the segment ends
    /// cleanly: no bytes left, or a zero field from the preallocated
    /// region.
    fn read_len_field(&mut self) -> Result<Option<i64>, WalError> {
        let mut buf = [0u8; 8];
        let mut n = 0;

        while n < 8 {
            match self.readers[self.cur].read(&mut buf[n..]) {
                Ok(0) => break,
                Ok(r) => n += r,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(WalError::Io(e)),
            }
        }

        if n == 0 {
            return Ok(None);
        }
        if n < 8 {
            return Err(WalError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "short record length field",
            )));
        }

        let len_field = i64::from_le_bytes(buf);
        if len_field == 0 {
            return Ok(None);
        }

        Ok(Some(len_field))
    }

    /// A frame spanning an all-zero disk sector was torn by a crash before
    /// that sector was written. Only the newest segment can legitimately
    /// contain one.
    fn is_torn_frame(&self, payload: &[u8]) -> bool {
        if self.cur + 1 != self.readers.len() {
            return false;
        }

        // File offset where this frame's payload begins.
        let mut file_off = self.last_valid_off + FRAME_HEADER_SIZE;

        let mut cur = 0usize;
        while cur < payload.len() {
            let chunk = (MIN_SECTOR_SIZE - file_off % MIN_SECTOR_SIZE) as usize;
            let chunk = chunk.min(payload.len() - cur);

            if payload[cur..cur + chunk].iter().all(|b| *b == 0) {
                return true;
            }

            file_off += chunk as u64;
            cur += chunk;
        }

        false
    }

    pub(crate) fn running_crc(&self) -> u32 {
        self.crc
    }

    /// Resets the running CRC to a `Crc` record's value: the splice that
    /// carries the chain across a segment boundary.
    pub(crate) fn update_crc(&mut self, crc: u32) {
        self.crc = crc;
    }

    /// Offset in the current segment just past the last valid frame.
    pub(crate) fn last_offset(&self) -> u64 {
        self.last_valid_off
    }

    /// True once decoding has reached the newest segment.
    pub(crate) fn on_last_segment(&self) -> bool {
        self.cur + 1 >= self.readers.len()
    }
}

fn torn_frame_error() -> WalError {
    WalError::Io(io::Error::new(
        io::ErrorKind::UnexpectedEof,
        "torn record at segment tail",
    ))
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::io::Seek;
    use std::io::SeekFrom;
    use std::io::Write;

    use crate::config::BackendKind;
    use crate::errors::WalError;
    use crate::segment::new_backend;
    use crate::wal::decoder::Decoder;
    use crate::wal::encoder::Encoder;
    use crate::wal::record::RecordType;

    fn reopened(f: &std::fs::File) -> Result<std::fs::File, io::Error> {
        let mut r = f.try_clone()?;
        r.seek(SeekFrom::Start(0))?;
        Ok(r)
    }

    #[test]
    fn test_roundtrip_one_segment() -> Result<(), io::Error> {
        let f = tempfile::tempfile()?;

        let backend = new_backend(BackendKind::File, f.try_clone()?, 0)?;
        let mut enc = Encoder::new(backend, 0);
        enc.encode_crc()?;
        enc.encode(RecordType::Metadata, b"meta")?;
        enc.encode(RecordType::Entry, b"entry-bytes")?;
        enc.flush()?;

        let mut dec = Decoder::new(vec![reopened(&f)?], 4096);

        let rec = dec.decode().unwrap().unwrap();
        assert_eq!(RecordType::Crc, rec.rtype);
        assert_eq!(0, rec.crc);

        let rec = dec.decode().unwrap().unwrap();
        assert_eq!(RecordType::Metadata, rec.rtype);
        assert_eq!(b"meta".to_vec(), rec.data);

        let rec = dec.decode().unwrap().unwrap();
        assert_eq!(RecordType::Entry, rec.rtype);
        assert_eq!(b"entry-bytes".to_vec(), rec.data);

        assert!(dec.decode().unwrap().is_none());
        assert_eq!(enc.crc_sum(), dec.running_crc());
        assert_eq!(enc.offset(), dec.last_offset());

        Ok(())
    }

    #[test]
    fn test_crc_chains_across_segments() -> Result<(), io::Error> {
        let f1 = tempfile::tempfile()?;
        let f2 = tempfile::tempfile()?;

        let backend = new_backend(BackendKind::File, f1.try_clone()?, 0)?;
        let mut enc = Encoder::new(backend, 0);
        enc.encode_crc()?;
        enc.encode(RecordType::Entry, b"first")?;
        enc.flush()?;

        let prev_crc = enc.crc_sum();

        let backend = new_backend(BackendKind::File, f2.try_clone()?, 0)?;
        let mut enc2 = Encoder::new(backend, prev_crc);
        enc2.encode_crc()?;
        enc2.encode(RecordType::Entry, b"second")?;
        enc2.flush()?;

        let mut dec = Decoder::new(vec![reopened(&f1)?, reopened(&f2)?], 4096);

        let mut records = Vec::new();
        loop {
            let rec = match dec.decode() {
                Ok(Some(rec)) => rec,
                Ok(None) => break,
                Err(e) => panic!("decode failed: {}", e),
            };

            if rec.rtype == RecordType::Crc {
                // The leading record of each segment must carry the chain.
                assert_eq!(dec.running_crc(), rec.crc);
                dec.update_crc(rec.crc);
            }
            records.push(rec);
        }

        assert_eq!(4, records.len());
        assert_eq!(prev_crc, records[2].crc);
        assert_eq!(enc2.crc_sum(), dec.running_crc());

        Ok(())
    }

    #[test]
    fn test_short_frame_is_unexpected_eof() -> Result<(), io::Error> {
        let mut f = tempfile::tempfile()?;

        let backend = new_backend(BackendKind::File, f.try_clone()?, 0)?;
        let mut enc = Encoder::new(backend, 0);
        enc.encode_crc()?;
        enc.encode(RecordType::Entry, b"0123456789")?;
        enc.flush()?;

        f.set_len(enc.offset() - 3)?;
        f.seek(SeekFrom::Start(0))?;

        let mut dec = Decoder::new(vec![f.try_clone()?], 4096);
        let crc_off = {
            dec.decode().unwrap().unwrap();
            dec.last_offset()
        };

        let res = dec.decode();
        assert!(matches!(&res, Err(e) if e.is_torn_tail()));

        // The last valid offset still points past the crc record.
        assert_eq!(crc_off, dec.last_offset());

        Ok(())
    }

    #[test]
    fn test_corrupt_byte_is_crc_mismatch() -> Result<(), io::Error> {
        let mut f = tempfile::tempfile()?;

        let backend = new_backend(BackendKind::File, f.try_clone()?, 0)?;
        let mut enc = Encoder::new(backend, 0);
        enc.encode_crc()?;
        enc.encode(RecordType::Entry, b"payload-bytes")?;
        enc.flush()?;

        // Flip one data byte of the entry record: frame header (8) of the
        // crc frame, its payload (5) and pad (3), then the entry frame
        // header (8) and record header (5).
        f.seek(SeekFrom::Start(16 + 8 + 5))?;
        f.write_all(b"P")?;
        f.seek(SeekFrom::Start(0))?;

        let mut dec = Decoder::new(vec![f.try_clone()?], 4096);
        dec.decode().unwrap();

        let res = dec.decode();
        assert!(matches!(res, Err(WalError::CrcMismatch { .. })));

        Ok(())
    }
}
