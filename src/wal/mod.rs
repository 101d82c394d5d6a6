//! Write-ahead-log sketch.
//!
//! A standalone append log for callers that want to stage mutations before
//! applying them to a collection. It is not wired into the write path: the
//! core's durability contract is explicit `sync` only.
//!
//! # File Format
//!
//! ```text
//! +-------------------+
//! | Header (64 bytes) |
//! +-------------------+
//! | Entry 1           |
//! +-------------------+
//! | ...               |
//! +-------------------+
//! ```
//!
//! Each entry is a checksummed frame, big-endian:
//!
//! ```text
//! +-----------+---------------------------------------+----------+
//! | len: u32  | key_len:u32 val_len:u32 | key | value | crc32:u32|
//! +-----------+---------------------------------------+----------+
//! ```
//!
//! The CRC32 (ISCSI) covers the payload between the length prefix and the
//! checksum. Delete operations log `val_len = 0` with no value bytes.

pub mod header;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use crc::{Crc, CRC_32_ISCSI};
use header::{Header, HEADER_SIZE};

use std::fs::File;
use std::io::{BufReader, BufWriter, Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use crate::error::Result;
use crate::{errcorrupt, pio};

/// A logged mutation: key plus optional value (`None` logs a delete).
type WalEntry = (Vec<u8>, Option<Vec<u8>>);

pub const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

pub struct Wal {
    file: File,
    writer: Mutex<BufWriter<File>>,
    header: RwLock<Header>,
    path: PathBuf,
}

impl std::fmt::Debug for Wal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wal").field("path", &self.path).finish()
    }
}

impl Wal {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::options()
            .create(true)
            .read(true)
            .write(true)
            .open(path)?;

        // The header is read and written positionally so the append cursor
        // below never moves off the end of the log.
        let header = if file.metadata()?.len() == 0 {
            let header = Header::new();
            pio::write_all_at(&file, &header.encode(), 0)?;
            file.sync_all()?;
            header
        } else {
            let mut buf = [0u8; HEADER_SIZE];
            pio::read_exact_at(&file, &mut buf, 0)?;
            Header::decode(&buf)?
        };

        let mut append_to = file.try_clone()?;
        append_to.seek(SeekFrom::End(0))?;
        let writer = BufWriter::with_capacity(DEFAULT_BUFFER_SIZE, append_to);

        Ok(Self {
            file,
            writer: Mutex::new(writer),
            header: RwLock::new(header),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Numeric ID of the WAL file, derived from its `<id>.wal` file name.
    pub fn id(&self) -> Result<u64> {
        self.path
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(|name| name.split('.').next())
            .and_then(|num| num.parse::<u64>().ok())
            .ok_or_else(|| crate::Error::InvalidInput(format!("bad wal file name {:?}", self.path)))
    }

    /// Current size of the WAL file in bytes.
    pub fn size(&self) -> u64 {
        self.file.metadata().map_or(0, |meta| meta.len())
    }

    /// Entries recorded as of the last flush.
    pub fn entry_count(&self) -> u64 {
        self.header.read().map(|h| h.entry_count).unwrap_or(0)
    }

    /// Appends a key-value pair; `None` logs a delete.
    pub fn append(&self, key: &[u8], value: Option<&[u8]>) -> Result<()> {
        let mut payload = Vec::new();
        payload.write_u32::<BigEndian>(key.len() as u32)?;
        payload.write_u32::<BigEndian>(value.map_or(0, |v| v.len()) as u32)?;
        payload.extend_from_slice(key);
        if let Some(v) = value {
            payload.extend_from_slice(v);
        }

        let checksum = CRC32.checksum(&payload);

        let mut writer = self.writer.lock()?;
        writer.write_u32::<BigEndian>(payload.len() as u32)?;
        writer.write_all(&payload)?;
        writer.write_u32::<BigEndian>(checksum)?;

        self.header.write()?.entry_count += 1;

        Ok(())
    }

    /// Flushes buffered entries, persists the header and fsyncs.
    pub fn flush(&self) -> Result<()> {
        self.writer.lock()?.flush()?;

        let header_bytes = self.header.read()?.encode();
        pio::write_all_at(&self.file, &header_bytes, 0)?;
        self.file.sync_all()?;

        Ok(())
    }

    /// Replays the WAL from the start. Flush first to observe buffered
    /// appends.
    pub fn replay(&self) -> Result<ReplayIterator> {
        ReplayIterator::new(&self.path)
    }

    /// Deletes the log file.
    pub fn remove(self) -> Result<()> {
        let path = self.path.clone();
        drop(self);
        Ok(std::fs::remove_file(path)?)
    }
}

pub struct ReplayIterator {
    reader: BufReader<File>,
}

impl ReplayIterator {
    pub fn new(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        reader.seek(SeekFrom::Start(HEADER_SIZE as u64))?;

        Ok(ReplayIterator { reader })
    }

    fn read<R: Read>(reader: &mut R) -> Result<Option<WalEntry>> {
        let frame_len = match reader.read_u32::<BigEndian>() {
            Ok(len) => len as usize,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let mut payload = vec![0u8; frame_len];
        if let Err(e) = reader.read_exact(&mut payload) {
            return errcorrupt!("truncated wal payload: {e}");
        }

        let stored_crc = match reader.read_u32::<BigEndian>() {
            Ok(crc) => crc,
            Err(e) => return errcorrupt!("missing wal checksum: {e}"),
        };

        if CRC32.checksum(&payload) != stored_crc {
            return errcorrupt!("wal checksum mismatch");
        }

        let mut cursor = Cursor::new(&payload);
        let key_len = cursor.read_u32::<BigEndian>()? as usize;
        let value_len = cursor.read_u32::<BigEndian>()? as usize;

        let mut key = vec![0u8; key_len];
        if let Err(e) = cursor.read_exact(&mut key) {
            return errcorrupt!("truncated wal key: {e}");
        }

        let value = if value_len > 0 {
            let mut value = vec![0u8; value_len];
            if let Err(e) = cursor.read_exact(&mut value) {
                return errcorrupt!("truncated wal value: {e}");
            }
            Some(value)
        } else {
            None
        };

        Ok(Some((key, value)))
    }
}

impl Iterator for ReplayIterator {
    type Item = Result<WalEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        match ReplayIterator::read(&mut self.reader) {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::header::HEADER_SIZE;
    use super::Wal;
    use crate::Error;
    use std::io::{Seek, SeekFrom, Write};
    use tempfile::TempDir;

    fn create_wal(dir: &TempDir) -> Wal {
        Wal::open(&dir.path().join("1.wal")).expect("Failed to open WAL")
    }

    #[test]
    fn test_append_and_flush() {
        let dir = TempDir::new().unwrap();
        let wal = create_wal(&dir);

        wal.append(b"key1", Some(b"value1")).expect("Failed to append");
        wal.append(b"key2", Some(b"value2")).expect("Failed to append");
        wal.append(b"key3", None).expect("Failed to append");
        wal.flush().expect("Failed to flush");

        assert_eq!(wal.entry_count(), 3);
        assert_eq!(wal.id().unwrap(), 1);
    }

    #[test]
    fn test_replay() {
        let dir = TempDir::new().unwrap();
        let wal = create_wal(&dir);

        wal.append(b"key1", Some(b"value1")).unwrap();
        wal.append(b"key2", Some(b"value2")).unwrap();
        wal.flush().unwrap();

        let entries: Vec<_> = wal
            .replay()
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .expect("Replay failed");

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], (b"key1".to_vec(), Some(b"value1".to_vec())));
        assert_eq!(entries[1], (b"key2".to_vec(), Some(b"value2".to_vec())));
    }

    #[test]
    fn test_append_after_flush() {
        let dir = TempDir::new().unwrap();
        let wal = create_wal(&dir);

        wal.append(b"key1", Some(b"value1")).unwrap();
        wal.flush().unwrap();
        wal.append(b"key2", Some(b"value2")).unwrap();
        wal.flush().unwrap();

        let entries: Vec<_> = wal
            .replay()
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .expect("Replay failed");

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1], (b"key2".to_vec(), Some(b"value2".to_vec())));
    }

    #[test]
    fn test_empty_replay() {
        let dir = TempDir::new().unwrap();
        let wal = create_wal(&dir);

        assert_eq!(wal.replay().unwrap().count(), 0);
    }

    #[test]
    fn test_delete_entries_replay_without_value() {
        let dir = TempDir::new().unwrap();
        let wal = create_wal(&dir);

        wal.append(b"key1", None).unwrap();
        wal.append(b"key2", None).unwrap();
        wal.flush().unwrap();

        let entries: Vec<_> = wal
            .replay()
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .expect("Replay failed");

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], (b"key1".to_vec(), None));
        assert_eq!(entries[1], (b"key2".to_vec(), None));
    }

    #[test]
    fn test_corruption_detected_on_replay() {
        let dir = TempDir::new().unwrap();
        let wal = create_wal(&dir);

        wal.append(b"key1", Some(b"value1")).unwrap();
        wal.append(b"key2", Some(b"value2")).unwrap();
        wal.flush().unwrap();

        // Scribble over the middle of the first entry.
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .open(wal.path())
            .unwrap();
        file.seek(SeekFrom::Start(HEADER_SIZE as u64 + 5)).unwrap();
        file.write_all(b"garbage").unwrap();
        file.sync_all().unwrap();

        let mut saw_corruption = false;
        for entry in wal.replay().unwrap() {
            match entry {
                Err(Error::Corrupt(_)) => {
                    saw_corruption = true;
                    break;
                }
                Err(e) => panic!("Unexpected error during replay: {e:?}"),
                Ok(_) => {}
            }
        }
        assert!(saw_corruption, "Corruption not detected during replay");
    }

    #[test]
    fn test_header_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("1.wal");
        {
            let wal = Wal::open(&path).unwrap();
            wal.append(b"key1", Some(b"value1")).unwrap();
            wal.flush().unwrap();
        }

        let wal = Wal::open(&path).unwrap();
        assert_eq!(wal.entry_count(), 1);
    }

    #[test]
    fn test_concurrent_replays() {
        use std::sync::Arc;
        use std::thread;

        let dir = TempDir::new().unwrap();
        let wal = create_wal(&dir);

        for i in 0..100 {
            let key = format!("key{i}");
            let value = format!("value{i}");
            wal.append(key.as_bytes(), Some(value.as_bytes()))
                .expect("Failed to append");
        }
        wal.flush().expect("Failed to flush");

        let wal = Arc::new(wal);
        let mut handles = vec![];
        for _ in 0..3 {
            let wal = Arc::clone(&wal);
            handles.push(thread::spawn(move || {
                wal.replay().expect("Failed to replay").count()
            }));
        }

        for handle in handles {
            assert_eq!(handle.join().unwrap(), 100);
        }
    }
}
