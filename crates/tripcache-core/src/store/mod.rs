//! Persistent key-value storage for cache snapshots.
//!
//! Every operation is async and may fail with a `StoreError`. Callers treat a
//! failure as "no cache available"; nothing in this crate retries a store call.
//!
//! Implementations:
//! - `MemoryStore`: process-local map, also used as the test double
//! - `FileStore`: one JSON document per key in a cache directory

pub mod file;
pub mod memory;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

pub use file::FileStore;
pub use memory::MemoryStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode or decode cache entry: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn get(&self, key: &str) -> StoreResult<Option<Value>>;

    async fn set(&self, key: &str, value: Value) -> StoreResult<()>;

    /// Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> StoreResult<()>;

    async fn entries(&self) -> StoreResult<Vec<(String, Value)>>;
}
