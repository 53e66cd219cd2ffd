//! The on-disk record frame: the unit of CRC and framing.
//!
//! A frame is an 8-byte little-endian length field, the record payload,
//! and 0–7 zero pad bytes bringing the frame to an 8-byte multiple. The
//! low 56 bits of the length field carry the payload length; a non-zero
//! pad count is stored in the high byte together with a sentinel bit, so
//! a padded frame reads back negative as an i64.

use std::io;

use byteorder::LittleEndian;
use byteorder::ReadBytesExt;
use byteorder::WriteBytesExt;

/// Length of the frame header, the 8-byte length field.
pub(crate) const FRAME_HEADER_SIZE: u64 = 8;

/// On-disk record types. The numeric codes are part of the wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum RecordType {
    Metadata = 1,
    Entry = 2,
    State = 3,
    Crc = 4,
    Snapshot = 5,
}

impl RecordType {
    pub(crate) fn from_u8(b: u8) -> Result<Self, io::Error> {
        Ok(match b {
            1 => Self::Metadata,
            2 => Self::Entry,
            3 => Self::State,
            4 => Self::Crc,
            5 => Self::Snapshot,
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("unexpected record type {}", b),
                ));
            }
        })
    }
}

/// One WAL record.
///
/// `crc` is the running CRC32C after folding this record's data bytes; for
/// the leading `Crc` record of a segment it is the previous segment's tail
/// CRC and `data` is empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Record {
    pub(crate) rtype: RecordType,
    pub(crate) crc: u32,
    pub(crate) data: Vec<u8>,
}

impl Record {
    pub(crate) fn new(rtype: RecordType, crc: u32, data: Vec<u8>) -> Self {
        Self { rtype, crc, data }
    }

    /// Serialized payload size: the frame's length field counts this.
    pub(crate) fn payload_size(&self) -> usize {
        1 + 4 + self.data.len()
    }
}

impl codeq::Encode for Record {
    fn encode<W: io::Write>(&self, mut w: W) -> Result<usize, io::Error> {
        w.write_u8(self.rtype as u8)?;
        w.write_u32::<LittleEndian>(self.crc)?;
        w.write_all(&self.data)?;
        Ok(self.payload_size())
    }
}

impl codeq::Decode for Record {
    /// Decodes a record from one frame's payload. The payload boundary
    /// delimits `data`, so the reader must end with it.
    fn decode<R: io::Read>(mut r: R) -> Result<Self, io::Error> {
        let rtype = RecordType::from_u8(r.read_u8()?)?;
        let crc = r.read_u32::<LittleEndian>()?;
        let mut data = Vec::new();
        r.read_to_end(&mut data)?;
        Ok(Self { rtype, crc, data })
    }
}

/// Encodes a payload length into the frame length field and pad count.
pub(crate) fn encode_frame_size(payload_len: usize) -> (u64, usize) {
    let mut len_field = payload_len as u64;
    let pad = (8 - payload_len % 8) % 8;
    if pad != 0 {
        len_field |= (0x80 | pad as u64) << 56;
    }
    (len_field, pad)
}

/// Decodes the frame length field into payload length and pad count.
pub(crate) fn decode_frame_size(len_field: i64) -> (u64, u64) {
    let payload_len = (len_field as u64) & !(0xffu64 << 56);
    let pad = if len_field < 0 {
        ((len_field as u64) >> 56) & 0x7
    } else {
        0
    };
    (payload_len, pad)
}

#[cfg(test)]
mod tests {
    use std::io;

    use crate::testing::test_codec;
    use crate::wal::record::decode_frame_size;
    use crate::wal::record::encode_frame_size;
    use crate::wal::record::Record;
    use crate::wal::record::RecordType;

    #[test]
    fn test_record_codec() -> Result<(), io::Error> {
        let rec = Record::new(RecordType::Metadata, 0x0403_0201, vec![0xab, 0xcd]);

        let b = vec![
            1, // type
            0x01, 0x02, 0x03, 0x04, // crc, little-endian
            0xab, 0xcd, // data
        ];

        test_codec(&b, &rec)
    }

    #[test]
    fn test_record_codec_empty_data() -> Result<(), io::Error> {
        let rec = Record::new(RecordType::Crc, 7, vec![]);

        let b = vec![
            4, // type
            7, 0, 0, 0, // crc
        ];

        test_codec(&b, &rec)
    }

    #[test]
    fn test_record_type_from_u8() {
        assert_eq!(RecordType::Metadata, RecordType::from_u8(1).unwrap());
        assert_eq!(RecordType::Entry, RecordType::from_u8(2).unwrap());
        assert_eq!(RecordType::State, RecordType::from_u8(3).unwrap());
        assert_eq!(RecordType::Crc, RecordType::from_u8(4).unwrap());
        assert_eq!(RecordType::Snapshot, RecordType::from_u8(5).unwrap());
        assert!(RecordType::from_u8(0).is_err());
        assert!(RecordType::from_u8(6).is_err());
    }

    #[test]
    fn test_frame_size_aligned() {
        let (len_field, pad) = encode_frame_size(16);
        assert_eq!(16, len_field);
        assert_eq!(0, pad);

        assert_eq!((16, 0), decode_frame_size(len_field as i64));
    }

    #[test]
    fn test_frame_size_padded() {
        let (len_field, pad) = encode_frame_size(5);
        assert_eq!(3, pad);
        assert_eq!(5 | (0x83u64 << 56), len_field);

        // The sentinel bit makes the field negative.
        assert!((len_field as i64) < 0);
        assert_eq!((5, 3), decode_frame_size(len_field as i64));
    }

    #[test]
    fn test_frame_size_roundtrip() {
        for payload_len in 0..64usize {
            let (len_field, pad) = encode_frame_size(payload_len);
            assert_eq!((payload_len + pad) % 8, 0);

            let (got_len, got_pad) = decode_frame_size(len_field as i64);
            assert_eq!(payload_len as u64, got_len);
            assert_eq!(pad as u64, got_pad);
        }
    }
}
