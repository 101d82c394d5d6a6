//! KV record wire codec.
//!
//! A record is a single contiguous little-endian blob:
//!
//! ```text
//! +-----------+-------+-----------+-------+
//! |key_len:u32| key   |val_len:u32| value |
//! +-----------+-------+-----------+-------+
//! |  4 bytes  |var len|  4 bytes  |var len|
//! +-----------+-------+-----------+-------+
//! ```
//!
//! Records are immutable once appended to a segment and are not
//! self-delimiting on disk; only the index knows their bounds. The one
//! exception is [`scan_tail`], which walks a segment from the start to
//! recover the write cursor of the last open segment after a restart.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};

use crate::errcorrupt;
use crate::error::Result;

/// A key-value record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: Vec<u8>,
    pub val: Vec<u8>,
}

impl Record {
    pub fn new(key: &[u8], val: &[u8]) -> Self {
        Self {
            key: key.to_vec(),
            val: val.to_vec(),
        }
    }

    /// Number of bytes the encoded record occupies.
    pub fn encoded_len(&self) -> usize {
        8 + self.key.len() + self.val.len()
    }

    /// Encodes the record into one contiguous blob.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        // Writing into a Vec cannot fail.
        buf.write_u32::<LittleEndian>(self.key.len() as u32).ok();
        buf.extend_from_slice(&self.key);
        buf.write_u32::<LittleEndian>(self.val.len() as u32).ok();
        buf.extend_from_slice(&self.val);
        buf
    }

    /// Decodes a record from a buffer that must contain exactly one record.
    ///
    /// The index hands out `(offset, size)` pairs, so a length mismatch
    /// means the slot and the segment disagree about what is stored there.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut reader = buf;

        let key_len = reader.read_u32::<LittleEndian>()? as usize;
        if key_len == 0 {
            return errcorrupt!("record has empty key");
        }
        if key_len > reader.len() {
            return errcorrupt!("record key length {} exceeds buffer", key_len);
        }
        let mut key = vec![0u8; key_len];
        reader.read_exact(&mut key)?;

        let val_len = reader.read_u32::<LittleEndian>()? as usize;
        if val_len != reader.len() {
            return errcorrupt!(
                "record value length {} does not match remaining {} bytes",
                val_len,
                reader.len()
            );
        }
        let mut val = vec![0u8; val_len];
        reader.read_exact(&mut val)?;

        Ok(Self { key, val })
    }
}

/// Walks concatenated records from the start of a segment file and returns
/// the `(offset, count)` pair of the last complete record boundary.
///
/// Segment files are truncated ahead of the write cursor, so the scan stops
/// at the zeroed tail (a zero key length can never open a valid record) or
/// at a truncated record left by a crash mid-write.
pub fn scan_tail(file: &File) -> Result<(u64, u64)> {
    let file_len = file.metadata()?.len();
    let mut reader = BufReader::new(file.try_clone()?);
    // The cloned handle shares its cursor with the original.
    reader.seek(SeekFrom::Start(0))?;

    let mut offset = 0u64;
    let mut count = 0u64;

    loop {
        let key_len = match reader.read_u32::<LittleEndian>() {
            Ok(0) => break,
            Ok(len) => u64::from(len),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        };
        // A length that runs past the file is not a record boundary.
        if offset + 4 + key_len + 4 > file_len {
            break;
        }
        reader.seek_relative(key_len as i64)?;

        let val_len = match reader.read_u32::<LittleEndian>() {
            Ok(len) => u64::from(len),
            Err(_) => break,
        };
        if offset + 8 + key_len + val_len > file_len {
            break;
        }
        reader.seek_relative(val_len as i64)?;

        offset += 8 + key_len + val_len;
        count += 1;
    }

    Ok((offset, count))
}
