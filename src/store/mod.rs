//! Coordination store abstraction.
//!
//! A hierarchical key-value service records which containers realise which
//! topology instances, so repeated invocations can reason about what is
//! already alive. The store is the only cross-process shared state; an
//! absent key always reads as "not started" and is never an error.

mod etcd;

pub use etcd::EtcdStore;

use crate::error::Result;
use async_trait::async_trait;

/// Operations the orchestrator needs from the coordination store.
///
/// Writes are last-writer-wins at single keys; no transactions are
/// required because every invariant tolerates "the key is absent".
#[async_trait]
pub trait CoordStore: Send + Sync {
    /// Reads one key. `None` means the key does not exist.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Writes one key, returning the previous value if there was one.
    /// Entries carry a TTL long enough to be effectively permanent.
    async fn put(&self, key: &str, value: &str) -> Result<Option<String>>;

    /// Deletes one key, returning the previous value if there was one.
    /// Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<Option<String>>;

    /// Deletes a key and everything below it.
    async fn delete_all(&self, key: &str) -> Result<()>;

    /// Lists the child names directly under a key. `None` means the key
    /// does not exist.
    async fn children(&self, key: &str) -> Result<Option<Vec<String>>>;
}
