use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::RwLock;

use crate::config::Config;
use crate::error::Result;
use crate::record::scan_tail;
use crate::{errcorrupt, errinput, pio, Error};

/// A bucket segment: one append-only data file.
///
/// Writes reserve their byte range with a single atomic fetch-add, so
/// producers never contend on the hot path. The only exclusive section is
/// the file resize, which doubles the backing file in place when a reserved
/// range crosses the current size limit.
///
/// A segment is `Active` until it has admitted `max_keys` writes, after
/// which it is sealed: sealed segments reject writes but serve reads for
/// as long as the collection lives.
pub struct Bucket {
    /// Segment ID, monotonic within a collection, starting at 1.
    pub id: u32,

    path: PathBuf,
    file: File,

    /// Write cursor. The pre-increment value of each fetch-add is the
    /// position the producer owns.
    offset: AtomicU64,

    /// Current byte length of the backing file. Doubles on overflow.
    size_limit: AtomicU64,

    /// Number of admitted writes, bumped before the offset reservation so
    /// an over-quota write never consumes file space.
    keys_count: AtomicU64,
    keys_limit: u64,

    /// How many times the file has doubled. Diagnostic only.
    resize_count: AtomicU32,

    sealed: AtomicBool,

    /// Held shared for the duration of a positional write, exclusive only
    /// while truncating the file to its doubled size.
    resize_lock: RwLock<()>,
}

impl std::fmt::Debug for Bucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bucket")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("offset", &self.offset.load(Ordering::Relaxed))
            .field("size_limit", &self.size_limit.load(Ordering::Relaxed))
            .field("keys_count", &self.keys_count.load(Ordering::Relaxed))
            .field("keys_limit", &self.keys_limit)
            .finish()
    }
}

impl Bucket {
    /// Opens a segment file, creating it when absent.
    ///
    /// A fresh file is truncated to the configured initial size. An existing
    /// file is scanned from the start to recover the write cursor and key
    /// count, and the size limit is re-derived by doubling the initial size
    /// until it covers the on-disk length.
    pub fn open(path: &Path, id: u32, config: &Config) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)?;

        let (offset, keys_count) = scan_tail(&file)?;
        let disk_len = file.metadata()?.len();

        let mut size_limit = config.max_size;
        let mut resize_count = 0u32;
        while size_limit < disk_len.max(offset) {
            size_limit *= 2;
            resize_count += 1;
        }
        if disk_len < size_limit {
            file.set_len(size_limit)?;
        }

        let sealed = keys_count >= config.max_keys;

        Ok(Self {
            id,
            path: path.to_path_buf(),
            file,
            offset: AtomicU64::new(offset),
            size_limit: AtomicU64::new(size_limit),
            keys_count: AtomicU64::new(keys_count),
            keys_limit: config.max_keys,
            resize_count: AtomicU32::new(resize_count),
            sealed: AtomicBool::new(sealed),
            resize_lock: RwLock::new(()),
        })
    }

    /// Appends `data` and returns `(offset, size, bucket_id)`.
    ///
    /// Fails with [`Error::KeyLimitReached`] once the segment has admitted
    /// its key quota; the caller is expected to roll to the next segment
    /// and retry there.
    pub fn write(&self, data: &[u8]) -> Result<(u64, u32, u32)> {
        if data.is_empty() {
            return errinput!("refusing zero-length write");
        }
        if self.sealed.load(Ordering::Acquire) {
            return Err(Error::KeyLimitReached);
        }

        // Admission first: an over-quota reservation must not move the
        // write cursor.
        let count = self.keys_count.fetch_add(1, Ordering::SeqCst) + 1;
        if count > self.keys_limit {
            self.sealed.store(true, Ordering::Release);
            return Err(Error::KeyLimitReached);
        }

        let len = data.len() as u64;
        let end = self.offset.fetch_add(len, Ordering::SeqCst) + len;
        let write_offset = end - len;

        if end >= self.size_limit.load(Ordering::Acquire) {
            let _exclusive = self.resize_lock.write()?;
            // Another producer may have resized while we waited.
            while end >= self.size_limit.load(Ordering::Acquire) {
                self.resize()?;
            }
        }

        // Shared: a concurrent resize must not truncate under our feet.
        let _shared = self.resize_lock.read()?;
        pio::write_all_at(&self.file, data, write_offset)?;

        Ok((write_offset, data.len() as u32, self.id))
    }

    /// Doubles the backing file. Caller holds the exclusive resize lock.
    fn resize(&self) -> Result<()> {
        let doubled = self.size_limit.load(Ordering::Acquire) * 2;
        self.file.set_len(doubled)?;
        self.size_limit.store(doubled, Ordering::Release);
        self.resize_count.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(bucket = self.id, size = doubled, "resized segment file");
        Ok(())
    }

    /// Reads `size` bytes at `offset`.
    ///
    /// Only ranges below the write cursor hold data; the index write
    /// happens after the data write, so any slot a reader observes points
    /// at a completed reservation.
    pub fn read(&self, offset: u64, size: u32) -> Result<Vec<u8>> {
        let end = offset + u64::from(size);
        if end > self.offset.load(Ordering::Acquire) {
            return errcorrupt!(
                "read of {}..{} past segment {} write cursor",
                offset,
                end,
                self.id
            );
        }
        let mut data = vec![0u8; size as usize];
        pio::read_exact_at(&self.file, &mut data, offset)?;
        Ok(data)
    }

    /// Flushes segment data to disk.
    pub fn sync(&self) -> Result<()> {
        Ok(self.file.sync_data()?)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn offset(&self) -> u64 {
        self.offset.load(Ordering::Acquire)
    }

    pub fn size_limit(&self) -> u64 {
        self.size_limit.load(Ordering::Acquire)
    }

    pub fn keys_count(&self) -> u64 {
        self.keys_count.load(Ordering::Acquire).min(self.keys_limit)
    }

    pub fn resize_count(&self) -> u32 {
        self.resize_count.load(Ordering::Relaxed)
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
            || self.keys_count.load(Ordering::Acquire) >= self.keys_limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use tempfile::TempDir;

    fn open_bucket(dir: &TempDir, config: &Config) -> Bucket {
        Bucket::open(&dir.path().join("1.bucket"), 1, config).expect("Failed to open bucket")
    }

    #[test]
    fn test_write_and_read() {
        let dir = TempDir::new().unwrap();
        let config = Config::new().max_keys(10).max_size(4096);
        let bucket = open_bucket(&dir, &config);

        let (offset, size, id) = bucket.write(b"value1").expect("Failed to write");
        assert_eq!(offset, 0);
        assert_eq!(size, 6);
        assert_eq!(id, 1);

        let data = bucket.read(offset, size).expect("Failed to read");
        assert_eq!(data, b"value1");
    }

    #[test]
    fn test_rejects_empty_write() {
        let dir = TempDir::new().unwrap();
        let config = Config::new().max_keys(10).max_size(4096);
        let bucket = open_bucket(&dir, &config);

        assert!(matches!(bucket.write(b""), Err(Error::InvalidInput(_))));
        assert_eq!(bucket.keys_count(), 0);
    }

    #[test]
    fn test_resize_doubles_until_cursor_fits() {
        let dir = TempDir::new().unwrap();
        let config = Config::new().max_keys(100).max_size(5);
        let bucket = open_bucket(&dir, &config);

        for _ in 0..10 {
            bucket.write(b"value").expect("Failed to write");
        }

        // 5 -> 10 -> 20 -> 40 -> 80.
        assert_eq!(bucket.offset(), 50);
        assert_eq!(bucket.size_limit(), 80);
        assert_eq!(bucket.resize_count(), 4);
    }

    #[test]
    fn test_key_limit_seals_segment() {
        let dir = TempDir::new().unwrap();
        let config = Config::new().max_keys(3).max_size(4096);
        let bucket = open_bucket(&dir, &config);

        for _ in 0..3 {
            bucket.write(b"value").expect("Failed to write");
        }
        assert!(bucket.is_sealed());
        assert!(matches!(bucket.write(b"value"), Err(Error::KeyLimitReached)));

        // The rejected write consumed no file space.
        assert_eq!(bucket.offset(), 15);
        // Sealed segments still serve reads.
        assert_eq!(bucket.read(0, 5).unwrap(), b"value");
    }

    #[test]
    fn test_read_past_cursor_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let config = Config::new().max_keys(10).max_size(4096);
        let bucket = open_bucket(&dir, &config);

        bucket.write(b"value1").expect("Failed to write");
        assert!(matches!(bucket.read(0, 100), Err(Error::Corrupt(_))));
    }

    #[test]
    fn test_reopen_recovers_counters() {
        let dir = TempDir::new().unwrap();
        let config = Config::new().max_keys(100).max_size(5);
        let path = dir.path().join("1.bucket");

        let mut expected_offset = 0;
        {
            let bucket = Bucket::open(&path, 1, &config).unwrap();
            for i in 0..10 {
                let record = crate::record::Record::new(format!("key_{i}").as_bytes(), b"value");
                let (offset, _, _) = bucket.write(&record.encode()).unwrap();
                assert!(offset >= expected_offset);
                expected_offset = bucket.offset();
            }
        }

        let bucket = Bucket::open(&path, 1, &config).unwrap();
        assert_eq!(bucket.offset(), expected_offset);
        assert_eq!(bucket.keys_count(), 10);
        // Doublings are re-derived from the on-disk length.
        assert_eq!(bucket.size_limit(), bucket.file.metadata().unwrap().len());
    }

    #[test]
    fn test_concurrent_writes_disjoint_offsets() {
        let dir = TempDir::new().unwrap();
        let config = Config::new().max_keys(100_000).max_size(64);
        let bucket = Arc::new(open_bucket(&dir, &config));

        let mut handles = vec![];
        for t in 0..8 {
            let bucket = Arc::clone(&bucket);
            handles.push(thread::spawn(move || {
                let mut spans = vec![];
                for i in 0..500 {
                    let data = format!("thread{t}_value{i}");
                    let (offset, size, _) = bucket.write(data.as_bytes()).expect("Failed to write");
                    spans.push((offset, size, data));
                }
                spans
            }));
        }

        let mut spans: Vec<(u64, u32, String)> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();

        spans.sort_by_key(|(offset, _, _)| *offset);
        for pair in spans.windows(2) {
            assert!(pair[0].0 + u64::from(pair[0].1) <= pair[1].0);
        }
        for (offset, size, data) in &spans {
            assert_eq!(bucket.read(*offset, *size).unwrap(), data.as_bytes());
        }
    }
}
