use std::io::{Cursor, Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::errcorrupt;
use crate::error::Result;

/// Fixed size of the log header at the start of every WAL file. The bytes
/// past the encoded fields are reserved and stay zeroed.
pub const HEADER_SIZE: usize = 64;

const MAGIC: &[u8; 8] = b"BKTDB\x00WL";
const VERSION: u32 = 1;

/// WAL file header: magic, format version and the number of entries the
/// log held at the last flush.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Header {
    pub magic: [u8; 8],
    pub version: u32,
    pub entry_count: u64,
}

impl Default for Header {
    fn default() -> Self {
        Self::new()
    }
}

impl Header {
    pub fn new() -> Self {
        Header {
            magic: *MAGIC,
            version: VERSION,
            entry_count: 0,
        }
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        let mut cursor = Cursor::new(&mut buf[..]);
        // The fields always fit the fixed buffer.
        cursor.write_all(&self.magic).ok();
        cursor.write_u32::<BigEndian>(self.version).ok();
        cursor.write_u64::<BigEndian>(self.entry_count).ok();
        buf
    }

    /// Decodes and validates a header block. Unknown magic or a version
    /// this build does not understand is corruption.
    pub fn decode(buf: &[u8; HEADER_SIZE]) -> Result<Self> {
        let mut cursor = Cursor::new(&buf[..]);

        let mut magic = [0u8; 8];
        cursor.read_exact(&mut magic)?;
        if magic != *MAGIC {
            return errcorrupt!("bad wal magic {magic:?}");
        }

        let version = cursor.read_u32::<BigEndian>()?;
        if version != VERSION {
            return errcorrupt!("unsupported wal version {version}");
        }

        Ok(Header {
            magic,
            version,
            entry_count: cursor.read_u64::<BigEndian>()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode() {
        let header = Header {
            entry_count: 666,
            ..Header::new()
        };

        let decoded = Header::decode(&header.encode()).expect("Failed to decode header");
        assert_eq!(decoded, header);
        assert_eq!(decoded.entry_count, 666);
    }

    #[test]
    fn test_reserved_tail_stays_zeroed() {
        let encoded = Header {
            entry_count: u64::MAX,
            ..Header::new()
        }
        .encode();

        assert!(encoded[20..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_rejects_wrong_magic() {
        let mut encoded = Header::new().encode();
        encoded[0] ^= 0xff;
        assert!(Header::decode(&encoded).is_err());
    }

    #[test]
    fn test_rejects_future_version() {
        let mut encoded = Header::new().encode();
        // Bump the low byte of the big-endian version field.
        encoded[11] += 1;
        assert!(Header::decode(&encoded).is_err());
    }
}
