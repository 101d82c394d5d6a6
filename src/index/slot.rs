use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::errcorrupt;
use crate::error::Result;

/// On-disk stride of one slot. The encoded fields occupy the first 22
/// bytes; the remaining 4 are reserved.
pub const SLOT_SIZE: usize = 26;

/// Byte offset of the tombstone flag within a slot. Point deletes write a
/// single byte here.
pub const DELETED_OFFSET: u64 = 5;

/// What kind of value the slot's record holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DataType {
    Kv = 0,
    Hash = 1,
}

impl TryFrom<u8> for DataType {
    type Error = crate::Error;

    fn try_from(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(DataType::Kv),
            1 => Ok(DataType::Hash),
            other => errcorrupt!("unknown slot data type {other}"),
        }
    }
}

/// A fixed-width index entry addressed by `hash mod capacity`.
///
/// Big-endian layout:
///
/// ```text
/// +--------+-----------+---------+------------+--------+----------+----------+
/// |hash:u32|data_type:u8|deleted:u8|bucket_id:u32|size:u32|offset:u64| reserved |
/// +--------+-----------+---------+------------+--------+----------+----------+
/// | 4 bytes|  1 byte   | 1 byte  |  4 bytes   | 4 bytes| 8 bytes  | 4 bytes  |
/// +--------+-----------+---------+------------+--------+----------+----------+
/// ```
///
/// A slot is empty while `hash == 0 && deleted == 0`, live once written,
/// and tombstoned when `deleted == 1`. For this test to be sound, the index
/// never writes a hash-zero slot into the primary array; keys with a zero
/// digest are kept in the collision overflow instead.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Slot {
    pub hash: u32,
    pub data_type: DataType,
    pub deleted: bool,
    pub bucket_id: u32,
    pub size: u32,
    pub offset: u64,
}

impl Slot {
    /// A live KV slot.
    pub fn new(hash: u32, bucket_id: u32, size: u32, offset: u64) -> Self {
        Self {
            hash,
            data_type: DataType::Kv,
            deleted: false,
            bucket_id,
            size,
            offset,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.hash == 0 && !self.deleted
    }

    pub fn encode(&self) -> [u8; SLOT_SIZE] {
        let mut buf = [0u8; SLOT_SIZE];
        // Writing into a fixed, correctly-sized buffer cannot fail.
        (&mut buf[0..4]).write_u32::<BigEndian>(self.hash).ok();
        buf[4] = self.data_type as u8;
        buf[5] = u8::from(self.deleted);
        (&mut buf[6..10]).write_u32::<BigEndian>(self.bucket_id).ok();
        (&mut buf[10..14]).write_u32::<BigEndian>(self.size).ok();
        (&mut buf[14..22]).write_u64::<BigEndian>(self.offset).ok();
        buf
    }

    pub fn decode(buf: &[u8; SLOT_SIZE]) -> Result<Self> {
        let hash = (&buf[0..4]).read_u32::<BigEndian>()?;
        let data_type = DataType::try_from(buf[4])?;
        let deleted = match buf[5] {
            0 => false,
            1 => true,
            other => return errcorrupt!("invalid tombstone byte {other}"),
        };
        let bucket_id = (&buf[6..10]).read_u32::<BigEndian>()?;
        let size = (&buf[10..14]).read_u32::<BigEndian>()?;
        let offset = (&buf[14..22]).read_u64::<BigEndian>()?;

        Ok(Self {
            hash,
            data_type,
            deleted,
            bucket_id,
            size,
            offset,
        })
    }
}
