use std::collections::HashMap;
use std::fs;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use crate::config::Config;
use crate::error::Result;
use crate::Error;

use super::segment::Bucket;

/// A reference-counted grant on an open segment.
///
/// The registry holds one base reference per cached segment; every
/// [`BucketSet::last`]/[`BucketSet::get`] adds one on top and every
/// [`BucketSet::put`] removes it again. A segment can only be evicted once
/// the count has drained back to the base.
pub struct Handle {
    bucket: Bucket,
    ref_count: AtomicI64,
}

impl Handle {
    fn new(bucket: Bucket) -> Self {
        Self {
            bucket,
            ref_count: AtomicI64::new(1),
        }
    }

    pub fn ref_count(&self) -> i64 {
        self.ref_count.load(Ordering::Acquire)
    }
}

impl Deref for Handle {
    type Target = Bucket;

    fn deref(&self) -> &Bucket {
        &self.bucket
    }
}

/// The collection-scoped registry of bucket segments.
///
/// Segment files are sharded into numeric sub-directories holding at most
/// `max_per_dir` files each: segment `id` lives at
/// `<root>/<ceil(id / max_per_dir)>/<id>.bucket`.
///
/// `last`, `get` and `put` stay on the lock-free path (atomic pointer load
/// plus a ref-count bump); only rollover and lazy opens serialize on an
/// internal mutex.
pub struct BucketSet {
    root: PathBuf,
    config: Config,

    items: RwLock<HashMap<u32, Arc<Handle>>>,

    /// ID of the active segment. Swapped atomically on roll; readers that
    /// grabbed the previous segment keep using it safely through their
    /// handle until they put it back.
    last_id: AtomicU32,

    /// Serializes rollover and lazy opens.
    open_lock: Mutex<()>,
}

impl BucketSet {
    /// Opens the segment registry under `root`.
    ///
    /// Scans for the numerically largest sub-directory and the largest
    /// `<id>.bucket` within it, and opens that file as the active segment.
    /// An empty tree starts at `1/1.bucket`.
    pub fn open(root: &Path, config: Config) -> Result<Self> {
        fs::create_dir_all(root)?;

        let (id, path) = match last_segment(root)? {
            Some(found) => found,
            None => (1, segment_path(root, 1, config.max_per_dir)),
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let bucket = Bucket::open(&path, id, &config)?;
        tracing::debug!(bucket = id, path = %path.display(), "opened last segment");

        let mut items = HashMap::new();
        items.insert(id, Arc::new(Handle::new(bucket)));

        Ok(Self {
            root: root.to_path_buf(),
            config,
            items: RwLock::new(items),
            last_id: AtomicU32::new(id),
            open_lock: Mutex::new(()),
        })
    }

    /// Returns a handle to the active segment.
    pub fn last(&self) -> Result<Arc<Handle>> {
        let id = self.last_id.load(Ordering::Acquire);
        let items = self.items.read()?;
        // The active segment is always cached.
        let handle = items.get(&id).cloned().ok_or(Error::NotFound)?;
        handle.ref_count.fetch_add(1, Ordering::AcqRel);
        Ok(handle)
    }

    /// Returns a handle to the segment with the given ID, opening its file
    /// lazily when it is not cached.
    pub fn get(&self, id: u32) -> Result<Arc<Handle>> {
        {
            let items = self.items.read()?;
            if let Some(handle) = items.get(&id) {
                handle.ref_count.fetch_add(1, Ordering::AcqRel);
                return Ok(Arc::clone(handle));
            }
        }

        let _serialized = self.open_lock.lock()?;
        // Lost the race to another opener.
        {
            let items = self.items.read()?;
            if let Some(handle) = items.get(&id) {
                handle.ref_count.fetch_add(1, Ordering::AcqRel);
                return Ok(Arc::clone(handle));
            }
        }

        let path = segment_path(&self.root, id, self.config.max_per_dir);
        if !path.exists() {
            return Err(Error::NotFound);
        }
        let bucket = Bucket::open(&path, id, &self.config)?;
        let handle = Arc::new(Handle::new(bucket));
        handle.ref_count.fetch_add(1, Ordering::AcqRel);
        self.items.write()?.insert(id, Arc::clone(&handle));
        Ok(handle)
    }

    /// Returns a handle obtained from `last`/`get`/`roll`.
    pub fn put(&self, handle: &Handle) {
        handle.ref_count.fetch_sub(1, Ordering::AcqRel);
    }

    /// Seals off the active segment and publishes its successor with
    /// `id + 1`, creating the sharded sub-directory as needed.
    ///
    /// Concurrent rollers serialize here; losers observe that the active
    /// segment is no longer sealed and return it instead of stacking
    /// empty segments.
    pub fn roll(&self) -> Result<Arc<Handle>> {
        let _serialized = self.open_lock.lock()?;

        let current = self.last()?;
        if !current.is_sealed() {
            return Ok(current);
        }
        self.put(&current);

        let id = self.last_id.load(Ordering::Acquire) + 1;
        let dir = self.root.join(dir_id(id, self.config.max_per_dir).to_string());
        fs::create_dir_all(&dir)?;

        let path = dir.join(format!("{id}.bucket"));
        let bucket = Bucket::open(&path, id, &self.config)?;
        let handle = Arc::new(Handle::new(bucket));
        handle.ref_count.fetch_add(1, Ordering::AcqRel);

        self.items.write()?.insert(id, Arc::clone(&handle));
        self.last_id.store(id, Ordering::Release);
        tracing::info!(bucket = id, "rolled to new segment");

        Ok(handle)
    }

    /// Evicts the segment when nothing references it and it is not the
    /// active one. Returns whether the segment was closed.
    pub fn release(&self, id: u32) -> Result<bool> {
        if id == self.last_id.load(Ordering::Acquire) {
            return Ok(false);
        }
        let mut items = self.items.write()?;
        // Holding the write lock excludes concurrent ref-count bumps,
        // which all happen under the read lock.
        match items.get(&id) {
            Some(handle) if handle.ref_count() == 1 => {
                items.remove(&id);
                tracing::debug!(bucket = id, "closed idle segment");
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Maintenance pass: closes every cached segment that has drained its
    /// references, keeping the active one. Returns how many were closed.
    pub fn sweep(&self) -> Result<usize> {
        let ids: Vec<u32> = self.items.read()?.keys().copied().collect();
        let mut closed = 0;
        for id in ids {
            if self.release(id)? {
                closed += 1;
            }
        }
        Ok(closed)
    }

    /// ID of the active segment.
    pub fn last_id(&self) -> u32 {
        self.last_id.load(Ordering::Acquire)
    }

    /// Number of cached segments.
    pub fn len(&self) -> usize {
        self.items.read().map(|items| items.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Sub-directory a segment belongs to: `ceil(id / max_per_dir)`.
fn dir_id(id: u32, max_per_dir: u32) -> u32 {
    id.div_ceil(max_per_dir)
}

/// Canonical path of a segment file under the sharding rule.
fn segment_path(root: &Path, id: u32, max_per_dir: u32) -> PathBuf {
    root.join(dir_id(id, max_per_dir).to_string())
        .join(format!("{id}.bucket"))
}

/// Finds the most recent segment on disk: the numerically largest
/// sub-directory, then the numerically largest `<id>.bucket` within it.
fn last_segment(root: &Path) -> Result<Option<(u32, PathBuf)>> {
    let mut max_dir: Option<u32> = None;
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        if let Some(id) = entry.file_name().to_str().and_then(|n| n.parse().ok()) {
            max_dir = max_dir.max(Some(id));
        }
    }
    let Some(dir) = max_dir else {
        return Ok(None);
    };

    let dir_path = root.join(dir.to_string());
    let mut max_file: Option<u32> = None;
    for entry in fs::read_dir(&dir_path)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if let Some(id) = name
            .strip_suffix(".bucket")
            .and_then(|stem| stem.parse().ok())
        {
            max_file = max_file.max(Some(id));
        }
    }

    Ok(max_file.map(|id| (id, dir_path.join(format!("{id}.bucket")))))
}
