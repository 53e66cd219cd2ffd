use std::io;

use byteorder::LittleEndian;
use byteorder::WriteBytesExt;
use codeq::Encode;

use crate::segment::SegmentBackend;
use crate::wal::record::encode_frame_size;
use crate::wal::record::Record;
use crate::wal::record::RecordType;

const PAD_ZEROS: [u8; 8] = [0; 8];

/// Framing writer with a running CRC over the active segment.
#[derive(Debug)]
pub(crate) struct Encoder {
    backend: Box<dyn SegmentBackend>,
    crc: u32,
}

impl Encoder {
    /// `prev_crc` seeds the running CRC: the previous segment's tail CRC,
    /// or the decoder's final CRC on the read-to-append mode switch.
    pub(crate) fn new(backend: Box<dyn SegmentBackend>, prev_crc: u32) -> Self {
        Self {
            backend,
            crc: prev_crc,
        }
    }

    /// Frames one record and stages it to the segment backend.
    pub(crate) fn encode(&mut self, rtype: RecordType, data: &[u8]) -> Result<(), io::Error> {
        self.crc = crc32c::crc32c_append(self.crc, data);
        let rec = Record::new(rtype, self.crc, data.to_vec());

        let (len_field, pad) = encode_frame_size(rec.payload_size());

        let mut frame = Vec::with_capacity(8 + rec.payload_size() + pad);
        frame.write_u64::<LittleEndian>(len_field)?;
        rec.encode(&mut frame)?;
        frame.extend_from_slice(&PAD_ZEROS[..pad]);

        self.backend.append(&frame)
    }

    /// Writes a segment's leading record carrying the chained CRC.
    ///
    /// Its data is empty, so the stamped `crc` field is exactly the seed
    /// this encoder was constructed with.
    pub(crate) fn encode_crc(&mut self) -> Result<(), io::Error> {
        self.encode(RecordType::Crc, &[])
    }

    /// The running CRC, needed to seed the next segment's encoder.
    pub(crate) fn crc_sum(&self) -> u32 {
        self.crc
    }

    /// Logical tail offset of the segment, buffered bytes included.
    pub(crate) fn offset(&self) -> u64 {
        self.backend.offset()
    }

    pub(crate) fn flush(&mut self) -> Result<(), io::Error> {
        self.backend.flush()
    }

    pub(crate) fn sync(&mut self) -> Result<(), io::Error> {
        self.backend.sync()
    }

    pub(crate) fn truncate(&mut self, off: u64) -> Result<(), io::Error> {
        self.backend.truncate(off)
    }
}
