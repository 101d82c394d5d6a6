//! Memory-mapping helper.
//!
//! A small collaborator for code that wants page-cache-backed access to a
//! file. Segments and the index use positional file IO instead; nothing in
//! the core write path depends on this module.

use std::fs::File;

use memmap2::MmapMut;

use crate::errinput;
use crate::error::Result;

/// A writable memory mapping over a file, with a simple write cursor.
pub struct Mmap {
    file: File,
    map: MmapMut,
    offset: usize,
}

impl std::fmt::Debug for Mmap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mmap")
            .field("len", &self.map.len())
            .field("offset", &self.offset)
            .finish()
    }
}

impl Mmap {
    /// Maps `file` for reading and writing. A `len` of zero maps the file
    /// at its current size; otherwise the file is grown to `len` first.
    pub fn open(file: File, len: u64) -> Result<Self> {
        let len = if len == 0 { file.metadata()?.len() } else { len };
        if len == 0 {
            return errinput!("cannot map an empty file");
        }
        if file.metadata()?.len() < len {
            file.set_len(len)?;
        }

        let map = unsafe { MmapMut::map_mut(&file)? };
        Ok(Self {
            file,
            map,
            offset: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.len() == 0
    }

    /// Current write cursor.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Copies `bytes` at the write cursor and advances it. Returns how many
    /// bytes fit before the end of the mapping.
    pub fn write(&mut self, bytes: &[u8]) -> usize {
        let n = bytes.len().min(self.map.len() - self.offset);
        self.map[self.offset..self.offset + n].copy_from_slice(&bytes[..n]);
        self.offset += n;
        n
    }

    /// Borrows `n` bytes of the mapping starting at `offset`.
    pub fn read(&self, offset: usize, n: usize) -> Result<&[u8]> {
        if offset + n > self.map.len() {
            return errinput!(
                "read of {}..{} past mapping of {} bytes",
                offset,
                offset + n,
                self.map.len()
            );
        }
        Ok(&self.map[offset..offset + n])
    }

    /// Flushes dirty pages to disk.
    pub fn sync(&self) -> Result<()> {
        Ok(self.map.flush()?)
    }

    /// Grows or shrinks the underlying file and remaps it. The write
    /// cursor is preserved when it still fits, else clamped to the end.
    pub fn resize(&mut self, len: u64) -> Result<()> {
        if len == 0 {
            return errinput!("cannot resize mapping to zero");
        }
        self.map.flush()?;
        self.file.set_len(len)?;
        self.map = unsafe { MmapMut::map_mut(&self.file)? };
        self.offset = self.offset.min(self.map.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn open_mmap(len: u64) -> (Mmap, NamedTempFile) {
        let tmp = NamedTempFile::new().expect("Failed to create temporary file");
        let file = tmp.reopen().expect("Failed to reopen temporary file");
        let map = Mmap::open(file, len).expect("Failed to map file");
        (map, tmp)
    }

    #[test]
    fn test_write_and_read() {
        let (mut map, _file) = open_mmap(64);
        assert_eq!(map.len(), 64);

        assert_eq!(map.write(b"hello"), 5);
        assert_eq!(map.write(b"world"), 5);
        assert_eq!(map.offset(), 10);

        assert_eq!(map.read(0, 10).unwrap(), b"helloworld");
        assert_eq!(map.read(5, 5).unwrap(), b"world");
    }

    #[test]
    fn test_write_clamped_at_end() {
        let (mut map, _file) = open_mmap(4);
        assert_eq!(map.write(b"hello"), 4);
        assert_eq!(map.read(0, 4).unwrap(), b"hell");
    }

    #[test]
    fn test_read_past_end() {
        let (map, _file) = open_mmap(8);
        assert!(map.read(4, 8).is_err());
    }

    #[test]
    fn test_resize_preserves_data() {
        let (mut map, _file) = open_mmap(8);
        map.write(b"hello");

        map.resize(32).expect("Failed to resize mapping");
        assert_eq!(map.len(), 32);
        assert_eq!(map.read(0, 5).unwrap(), b"hello");

        // The cursor continues where it left off.
        map.write(b" more");
        assert_eq!(map.read(0, 10).unwrap(), b"hello more");
    }

    #[test]
    fn test_empty_file_rejected() {
        let tmp = NamedTempFile::new().unwrap();
        let file = tmp.reopen().unwrap();
        assert!(Mmap::open(file, 0).is_err());
    }

    #[test]
    fn test_sync() {
        let (mut map, _file) = open_mmap(16);
        map.write(b"durable");
        map.sync().expect("Failed to sync mapping");
    }
}
