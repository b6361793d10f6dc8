//! Capture-file (libpcap savefile) encoding
//!
//! A file is a 24-byte global header followed by records, each a 16-byte header
//! (seconds, sub-second, captured length, original length) and `caplen` bytes of frame
//! data. Files are written little-endian with microsecond timestamps; both byte orders and
//! the nanosecond variant are accepted on read.

use bytes::{Buf, BufMut, BytesMut};
use wirecap_core::Timestamp;

use crate::engine::{EngineError, EngineResult, RecordHeader};

/// Magic of microsecond-resolution files
pub const MAGIC_MICROS: u32 = 0xa1b2_c3d4;
/// Magic of nanosecond-resolution files
pub const MAGIC_NANOS: u32 = 0xa1b2_3c4d;

pub const VERSION_MAJOR: u16 = 2;
pub const VERSION_MINOR: u16 = 4;

pub const FILE_HEADER_LEN: usize = 24;
pub const RECORD_HEADER_LEN: usize = 16;

/// Largest record accepted regardless of the file's declared snapshot length
const MAX_RECORD_LEN: u32 = 262_144;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
    Big,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Micros,
    Nanos,
}

/// Global header of a capture file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub version_major: u16,
    pub version_minor: u16,
    /// GMT to local correction, always 0 in practice
    pub thiszone: i32,
    pub sigfigs: u32,
    pub snaplen: u32,
    pub linktype: i32,
    pub order: ByteOrder,
    pub resolution: Resolution,
}

impl FileHeader {
    /// Header for a new little-endian, microsecond-resolution file
    pub fn new(linktype: i32, snaplen: u32) -> Self {
        Self {
            version_major: VERSION_MAJOR,
            version_minor: VERSION_MINOR,
            thiszone: 0,
            sigfigs: 0,
            snaplen,
            linktype,
            order: ByteOrder::Little,
            resolution: Resolution::Micros,
        }
    }

    pub fn decode(bytes: &[u8]) -> EngineResult<Self> {
        if bytes.len() < FILE_HEADER_LEN {
            return Err(EngineError::new("truncated dump file header"));
        }

        let mut buf = bytes;
        let magic = buf.get_u32_le();
        let (order, resolution) = match magic {
            MAGIC_MICROS => (ByteOrder::Little, Resolution::Micros),
            MAGIC_NANOS => (ByteOrder::Little, Resolution::Nanos),
            m if m == MAGIC_MICROS.swap_bytes() => (ByteOrder::Big, Resolution::Micros),
            m if m == MAGIC_NANOS.swap_bytes() => (ByteOrder::Big, Resolution::Nanos),
            _ => return Err(EngineError::new("bad dump file format")),
        };

        let header = match order {
            ByteOrder::Little => Self {
                version_major: buf.get_u16_le(),
                version_minor: buf.get_u16_le(),
                thiszone: buf.get_i32_le(),
                sigfigs: buf.get_u32_le(),
                snaplen: buf.get_u32_le(),
                linktype: buf.get_i32_le(),
                order,
                resolution,
            },
            ByteOrder::Big => Self {
                version_major: buf.get_u16(),
                version_minor: buf.get_u16(),
                thiszone: buf.get_i32(),
                sigfigs: buf.get_u32(),
                snaplen: buf.get_u32(),
                linktype: buf.get_i32(),
                order,
                resolution,
            },
        };

        if header.version_major != VERSION_MAJOR {
            return Err(EngineError::new(format!(
                "archive is version {}.{}",
                header.version_major, header.version_minor
            )));
        }

        Ok(header)
    }

    pub fn encode(&self, out: &mut BytesMut) {
        let magic = match self.resolution {
            Resolution::Micros => MAGIC_MICROS,
            Resolution::Nanos => MAGIC_NANOS,
        };
        match self.order {
            ByteOrder::Little => {
                out.put_u32_le(magic);
                out.put_u16_le(self.version_major);
                out.put_u16_le(self.version_minor);
                out.put_i32_le(self.thiszone);
                out.put_u32_le(self.sigfigs);
                out.put_u32_le(self.snaplen);
                out.put_i32_le(self.linktype);
            }
            ByteOrder::Big => {
                out.put_u32(magic);
                out.put_u16(self.version_major);
                out.put_u16(self.version_minor);
                out.put_i32(self.thiszone);
                out.put_u32(self.sigfigs);
                out.put_u32(self.snaplen);
                out.put_i32(self.linktype);
            }
        }
    }

    /// Decode a record header; nanosecond timestamps are truncated to microseconds
    pub fn decode_record(&self, bytes: &[u8]) -> EngineResult<RecordHeader> {
        if bytes.len() < RECORD_HEADER_LEN {
            return Err(EngineError::new("truncated dump file; record header cut short"));
        }

        let mut buf = bytes;
        let (secs, frac, caplen, len) = match self.order {
            ByteOrder::Little => (
                buf.get_u32_le(),
                buf.get_u32_le(),
                buf.get_u32_le(),
                buf.get_u32_le(),
            ),
            ByteOrder::Big => (buf.get_u32(), buf.get_u32(), buf.get_u32(), buf.get_u32()),
        };

        if caplen > MAX_RECORD_LEN {
            return Err(EngineError::new(format!(
                "invalid packet capture length {}, bigger than maximum of {}",
                caplen, MAX_RECORD_LEN
            )));
        }

        let micros = match self.resolution {
            Resolution::Micros => frac,
            Resolution::Nanos => frac / 1_000,
        };

        Ok(RecordHeader {
            timestamp: Timestamp::new(secs as i64, micros),
            caplen,
            len,
        })
    }

    pub fn encode_record(&self, header: &RecordHeader, out: &mut BytesMut) {
        let secs = header.timestamp.secs() as u32;
        let frac = match self.resolution {
            Resolution::Micros => header.timestamp.micros(),
            Resolution::Nanos => header.timestamp.micros() * 1_000,
        };
        match self.order {
            ByteOrder::Little => {
                out.put_u32_le(secs);
                out.put_u32_le(frac);
                out.put_u32_le(header.caplen);
                out.put_u32_le(header.len);
            }
            ByteOrder::Big => {
                out.put_u32(secs);
                out.put_u32(frac);
                out.put_u32(header.caplen);
                out.put_u32(header.len);
            }
        }
    }
}
