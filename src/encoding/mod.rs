//! Typed value encoding.
//!
//! The store itself moves raw bytes; this module is the convenience layer
//! for callers that keep structured values in a collection. Anything
//! serde-serializable encodes through bincode via the [`Value`] trait.

pub mod bincode;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

/// Trait for encoding values for storage.
///
/// Values don't need to preserve ordering, so the compact bincode
/// representation is used.
pub trait Value: Serialize + DeserializeOwned {
    /// Encode the value to bytes.
    fn encode(&self) -> Result<Vec<u8>> {
        bincode::serialize(self)
    }

    /// Decode bytes back to the original value type.
    fn decode(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes)
    }
}

impl<T> Value for T where T: Serialize + DeserializeOwned {}
