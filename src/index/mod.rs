//! The hash-addressed on-disk index.
//!
//! One fixed-size slot array maps each key, through its FNV-1a hash, to
//! the `(bucket_id, offset, size)` triple locating the record inside a
//! segment. The array never grows; keys whose slot is claimed by another
//! hash overflow into an in-memory collision list.

pub mod file;
pub mod slot;

pub use file::IndexFile;
pub use slot::{DataType, Slot, SLOT_SIZE};
