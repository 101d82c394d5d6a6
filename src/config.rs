use crate::errinput;
use crate::error::Result;

/// Configuration for a collection.
///
/// All four limits shape the on-disk layout and are fixed for the lifetime
/// of the collection directory they created.
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum number of keys a bucket segment admits before it is sealed
    /// and writes roll over to the next segment.
    pub max_keys: u64,

    /// Initial byte size of a fresh segment file. The file doubles in place
    /// whenever the write cursor reaches its current size.
    pub max_size: u64,

    /// Number of segment files grouped per sub-directory.
    pub max_per_dir: u32,

    /// Fixed slot count of the index file, set once at creation.
    pub index_capacity: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_keys: 10_000,
            max_size: 4 * 1024 * 1024, // 4MB
            max_per_dir: 100,
            index_capacity: 100_000,
        }
    }
}

impl Config {
    /// Create a config with default limits.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the per-segment key limit.
    pub fn max_keys(mut self, max_keys: u64) -> Self {
        self.max_keys = max_keys;
        self
    }

    /// Set the initial segment file size.
    pub fn max_size(mut self, max_size: u64) -> Self {
        self.max_size = max_size;
        self
    }

    /// Set the number of segments per sub-directory.
    pub fn max_per_dir(mut self, max_per_dir: u32) -> Self {
        self.max_per_dir = max_per_dir;
        self
    }

    /// Set the index slot count.
    pub fn index_capacity(mut self, index_capacity: u64) -> Self {
        self.index_capacity = index_capacity;
        self
    }

    /// Rejects configurations the store cannot operate under.
    pub fn validate(&self) -> Result<()> {
        if self.max_keys == 0 {
            return errinput!("max_keys must be non-zero");
        }
        if self.max_size == 0 {
            return errinput!("max_size must be non-zero");
        }
        if self.max_per_dir == 0 {
            return errinput!("max_per_dir must be non-zero");
        }
        if self.index_capacity == 0 {
            return errinput!("index_capacity must be non-zero");
        }
        Ok(())
    }
}
