use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use crossbeam_skiplist::SkipMap;

use crate::error::Result;
use crate::hasher::hash_key;
use crate::{errinput, pio, Error};

use super::slot::{Slot, DELETED_OFFSET, SLOT_SIZE};

/// Number of striped slot locks. Slot writes hash to a stripe by slot
/// position, so writers to distinct regions of the table rarely contend.
const STRIPES: usize = 64;

/// The filename of the slot array within a collection root.
const INDEX_FILE: &str = "index.idx";

/// The on-disk hash table mapping keys to record locations.
///
/// The file is a flat array of `capacity` slots addressed by
/// `hash mod capacity` and is pre-truncated to its full size at open, so a
/// key's slot position is deterministic for the lifetime of the file.
///
/// Slots are wider than a single atomic write unit, so slot updates
/// serialize on a striped lock; reads are lock-free and either observe the
/// previous slot or the new one. Tombstoning is a one-byte positional
/// write and takes no lock at all.
///
/// Keys whose slot is already claimed by a different hash overflow into an
/// in-memory collision list, rebuilt on restart by [`IndexFile::load_indexes`].
pub struct IndexFile {
    path: PathBuf,
    file: File,
    capacity: u64,

    /// Warm cache of live slots, keyed by key hash. Consulted before the
    /// file once [`IndexFile::load_indexes`] has run.
    cache: SkipMap<u32, Slot>,

    /// Overflow entries whose primary slot is claimed by a different hash.
    collisions: SkipMap<u32, Slot>,
    collision_count: AtomicU64,

    stripes: Vec<Mutex<()>>,
    warm: AtomicBool,
}

impl std::fmt::Debug for IndexFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexFile")
            .field("path", &self.path)
            .field("capacity", &self.capacity)
            .field("collisions", &self.collision_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl IndexFile {
    /// Opens (or creates) the index file under `dir` with the given fixed
    /// slot capacity.
    pub fn open(dir: &Path, capacity: u64) -> Result<Self> {
        if capacity == 0 {
            return errinput!("index capacity must be non-zero");
        }

        let path = dir.join(INDEX_FILE);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)?;

        let len = capacity * SLOT_SIZE as u64;
        if file.metadata()?.len() < len {
            file.set_len(len)?;
        }

        Ok(Self {
            path,
            file,
            capacity,
            cache: SkipMap::new(),
            collisions: SkipMap::new(),
            collision_count: AtomicU64::new(0),
            stripes: (0..STRIPES).map(|_| Mutex::new(())).collect(),
            warm: AtomicBool::new(false),
        })
    }

    fn position(&self, hash: u32) -> u64 {
        (u64::from(hash) % self.capacity) * SLOT_SIZE as u64
    }

    fn stripe(&self, pos: u64) -> &Mutex<()> {
        &self.stripes[(pos / SLOT_SIZE as u64) as usize % STRIPES]
    }

    fn read_slot(&self, pos: u64) -> Result<Slot> {
        let mut buf = [0u8; SLOT_SIZE];
        pio::read_exact_at(&self.file, &mut buf, pos)?;
        Slot::decode(&buf)
    }

    /// Writes the slot for `key` pointing at `(bucket_id, offset, size)`.
    ///
    /// When the primary slot is live under a different hash the entry goes
    /// to the collision overflow instead.
    pub fn set(&self, key: &[u8], size: u32, offset: u64, bucket_id: u32) -> Result<()> {
        self.set_hashed(hash_key(key), size, offset, bucket_id)
    }

    fn set_hashed(&self, hash: u32, size: u32, offset: u64, bucket_id: u32) -> Result<()> {
        let pos = self.position(hash);
        let slot = Slot::new(hash, bucket_id, size, offset);

        let _slot_guard = self.stripe(pos).lock()?;

        // A written hash-zero slot would read back as vacant, so those keys
        // always live in the overflow. Everything else claims its primary
        // slot unless a different live hash already holds it.
        let overflow = if hash == 0 {
            true
        } else {
            let current = self.read_slot(pos)?;
            !current.is_empty() && !current.deleted && current.hash != hash
        };

        if overflow {
            if self.collisions.get(&hash).is_none() {
                self.collision_count.fetch_add(1, Ordering::Relaxed);
            }
            self.collisions.insert(hash, slot);
        } else {
            pio::write_all_at(&self.file, &slot.encode(), pos)?;
        }

        if self.warm.load(Ordering::Acquire) {
            self.cache.insert(hash, slot);
        }
        Ok(())
    }

    /// Looks up the slot for `key`.
    ///
    /// A slot whose stored hash does not match the key's hash belongs to a
    /// different key and falls through to the collision overflow; a miss
    /// there is [`Error::NotFound`]. Tombstoned slots are [`Error::Deleted`].
    pub fn get(&self, key: &[u8]) -> Result<Slot> {
        self.get_hashed(hash_key(key))
    }

    fn get_hashed(&self, hash: u32) -> Result<Slot> {
        if self.warm.load(Ordering::Acquire) {
            if let Some(entry) = self.cache.get(&hash) {
                return Ok(*entry.value());
            }
        }

        // Hash-zero keys never occupy a primary slot.
        if hash != 0 {
            let slot = self.read_slot(self.position(hash))?;
            if !slot.is_empty() && slot.hash == hash {
                if slot.deleted {
                    return Err(Error::Deleted);
                }
                return Ok(slot);
            }
        }

        if let Some(entry) = self.collisions.get(&hash) {
            let slot = *entry.value();
            if slot.deleted {
                return Err(Error::Deleted);
            }
            return Ok(slot);
        }

        Err(Error::NotFound)
    }

    /// Tombstones the slot for `key` with a single-byte positional write.
    /// Deleting a key that was never set is a no-op.
    pub fn del(&self, key: &[u8]) -> Result<()> {
        self.del_hashed(hash_key(key))
    }

    fn del_hashed(&self, hash: u32) -> Result<()> {
        self.cache.remove(&hash);

        if hash != 0 {
            let pos = self.position(hash);
            let slot = self.read_slot(pos)?;
            if !slot.is_empty() && slot.hash == hash {
                pio::write_all_at(&self.file, &[1], pos + DELETED_OFFSET)?;
                return Ok(());
            }
        }

        if let Some(entry) = self.collisions.get(&hash) {
            let mut slot = *entry.value();
            slot.deleted = true;
            self.collisions.insert(hash, slot);
        }
        Ok(())
    }

    /// Warm cache builder: sequentially reads up to `budget_bytes` of the
    /// slot array and caches every live slot found. Returns how many slots
    /// were loaded.
    pub fn load_indexes(&self, budget_bytes: u64) -> Result<u64> {
        let file_len = self.capacity * SLOT_SIZE as u64;
        let limit = file_len.min(budget_bytes) / SLOT_SIZE as u64 * SLOT_SIZE as u64;

        let mut reader = BufReader::with_capacity(256 * 1024, self.file.try_clone()?);
        reader.seek(SeekFrom::Start(0))?;

        let mut buf = [0u8; SLOT_SIZE];
        let mut pos = 0u64;
        let mut loaded = 0u64;
        while pos < limit {
            reader.read_exact(&mut buf)?;
            let slot = Slot::decode(&buf)?;
            if !slot.is_empty() && !slot.deleted {
                self.cache.insert(slot.hash, slot);
                loaded += 1;
            }
            pos += SLOT_SIZE as u64;
        }

        self.warm.store(true, Ordering::Release);
        tracing::debug!(loaded, budget = budget_bytes, "warmed index cache");
        Ok(loaded)
    }

    /// Flushes slot writes to disk.
    pub fn sync(&self) -> Result<()> {
        Ok(self.file.sync_data()?)
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Number of keys living in the collision overflow.
    pub fn collision_count(&self) -> u64 {
        self.collision_count.load(Ordering::Relaxed)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
