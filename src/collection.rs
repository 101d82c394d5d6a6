use std::fs;
use std::path::{Path, PathBuf};

use crate::bucket::BucketSet;
use crate::config::Config;
use crate::error::Result;
use crate::flock::FileLock;
use crate::index::IndexFile;
use crate::record::Record;
use crate::{errinput, Error};

const LOCK_FILE: &str = "bucketdb.lock";

/// A collection: the user-facing namespace composed of one bucket set and
/// one index file.
///
/// ```text
///            set(key, value)                 get(key)
///                  |                            |
///                  v                            v
///          +--------------+             +--------------+
///          |   encode     |             |  index slot  |
///          |   record     |             | (bucket_id,  |
///          +------+-------+             | offset,size) |
///                 |                     +------+-------+
///                 v                            |
///          +--------------+                    v
///          | last bucket  |             +--------------+
///          |  append      |             |  bucket read |
///          +------+-------+             |  + decode    |
///                 |                     +--------------+
///                 v
///          +--------------+
///          |  index slot  |
///          |   write      |
///          +--------------+
/// ```
///
/// Writes are not atomic across the record and its slot: a crash between
/// the two leaves an unindexed record in the segment, which readers never
/// observe because every read goes through the index.
pub struct Collection {
    root: PathBuf,
    buckets: BucketSet,
    index: IndexFile,
    config: Config,
    _lock: FileLock,
}

impl std::fmt::Debug for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("root", &self.root)
            .field("last_bucket", &self.buckets.last_id())
            .field("index_capacity", &self.index.capacity())
            .finish()
    }
}

impl Collection {
    /// Opens the collection rooted at `root`, creating the directory tree
    /// on first use. The root is locked against other processes for the
    /// lifetime of the collection.
    pub fn open(root: impl AsRef<Path>, config: Config) -> Result<Self> {
        config.validate()?;

        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        let lock = FileLock::lock(root.join(LOCK_FILE))?;

        let buckets = BucketSet::open(&root, config.clone())?;
        let index = IndexFile::open(&root, config.index_capacity)?;
        tracing::info!(
            root = %root.display(),
            last_bucket = buckets.last_id(),
            "opened collection"
        );

        Ok(Self {
            root,
            buckets,
            index,
            config,
            _lock: lock,
        })
    }

    /// Stores a key-value pair and returns the record's `(offset, size)`
    /// within its segment.
    ///
    /// When the active segment has admitted its key quota the write rolls
    /// to the next segment and retries exactly once.
    pub fn set(&self, key: &[u8], val: &[u8]) -> Result<(u64, u32)> {
        if key.is_empty() {
            return errinput!("empty key");
        }
        let data = Record::new(key, val).encode();

        let mut bucket = self.buckets.last()?;
        let written = match bucket.write(&data) {
            Err(Error::KeyLimitReached) => {
                self.buckets.put(&bucket);
                bucket = self.buckets.roll()?;
                bucket.write(&data)
            }
            other => other,
        };

        let written = match written {
            Ok(written) => written,
            Err(e) => {
                self.buckets.put(&bucket);
                return Err(e);
            }
        };

        let (offset, size, bucket_id) = written;
        let indexed = self.index.set(key, size, offset, bucket_id);
        self.buckets.put(&bucket);
        indexed?;

        Ok((offset, size))
    }

    /// Fetches the value stored under `key`.
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        let slot = self.index.get(key)?;

        let bucket = self.buckets.get(slot.bucket_id)?;
        let raw = bucket.read(slot.offset, slot.size);
        self.buckets.put(&bucket);

        let record = Record::decode(&raw?)?;
        if record.key != key {
            // The slot's hash matched but the record belongs to another
            // key: a full 32-bit hash collision.
            return Err(Error::NotFound);
        }
        Ok(record.val)
    }

    /// Tombstones `key` in the index. The record's bytes stay in their
    /// segment until the collection is deleted.
    pub fn del(&self, key: &[u8]) -> Result<()> {
        self.index.del(key)
    }

    /// Replaces the value stored under `key`. The previous record becomes
    /// unreferenced garbage in its segment.
    pub fn update(&self, key: &[u8], val: &[u8]) -> Result<()> {
        self.set(key, val).map(|_| ())
    }

    /// Flushes the active segment and the index to disk.
    pub fn sync(&self) -> Result<()> {
        let bucket = self.buckets.last()?;
        let synced = bucket.sync();
        self.buckets.put(&bucket);
        synced?;
        self.index.sync()
    }

    /// Builds the index warm cache from up to `budget_bytes` of the slot
    /// array. Returns how many live slots were cached.
    pub fn warm_index(&self, budget_bytes: u64) -> Result<u64> {
        self.index.load_indexes(budget_bytes)
    }

    /// Closes idle non-active segments. Returns how many were closed.
    pub fn sweep_buckets(&self) -> Result<usize> {
        self.buckets.sweep()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Number of keys that overflowed their primary index slot.
    pub fn collision_count(&self) -> u64 {
        self.index.collision_count()
    }

    #[cfg(test)]
    pub(crate) fn buckets(&self) -> &BucketSet {
        &self.buckets
    }
}
