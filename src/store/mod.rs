//! Job store adapter layer.
//!
//! The queue client only ever talks to the store through the [`JobStore`]
//! trait, which exposes the handful of list/hash/set/TTL primitives the queue
//! needs. Two backends implement it:
//!
//! - [`RedisJobStore`]: the production backend, shared by every worker process
//! - [`MemoryJobStore`]: an in-process backend with the same semantics, used by
//!   tests and single-process tooling
//!
//! Encoding between typed records and flat string hashes lives in [`codec`];
//! key naming lives in [`KeySpace`].
//!
//! # Key Layout
//!
//! ```text
//! {prefix}:queue:high        list of task ids (LPUSH in, BRPOP out)
//! {prefix}:queue:normal
//! {prefix}:queue:low
//! {prefix}:task:{id}         hash, one per task (TTL)
//! {prefix}:execution:{id}    hash, one per execution (TTL)
//! {prefix}:running           set of claimed task ids
//! ```

pub mod codec;
pub mod memory;
pub mod redis;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::StoreError;
use crate::scheduler::task::Priority;

pub use self::memory::MemoryJobStore;
pub use self::redis::RedisJobStore;

/// Primitive operations of the shared job store.
///
/// Lists behave like Redis lists: `push_lane` prepends and `pop_lanes` pops
/// from the opposite end, which makes each list a FIFO.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Checks that the store is reachable.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Prepends `member` to the list at `key`.
    async fn push_lane(&self, key: &str, member: &str) -> Result<(), StoreError>;

    /// Pops the oldest member of the first non-empty list in `keys`, blocking
    /// up to `timeout` for one to become available.
    ///
    /// Keys are checked in the order given. Returns the key the member was
    /// popped from alongside the member, or `None` on timeout.
    async fn pop_lanes(
        &self,
        keys: &[String],
        timeout: Duration,
    ) -> Result<Option<(String, String)>, StoreError>;

    /// Removes every occurrence of `member` from the list at `key`, returning
    /// how many were removed.
    async fn remove_from_list(&self, key: &str, member: &str) -> Result<usize, StoreError>;

    /// Length of the list at `key` (0 if it does not exist).
    async fn list_len(&self, key: &str) -> Result<usize, StoreError>;

    /// Overwrites the given fields of the hash at `key`.
    async fn hash_set(&self, key: &str, fields: &[(&str, String)]) -> Result<(), StoreError>;

    /// Overwrites the given fields and (re)sets the key's TTL.
    async fn hash_set_with_ttl(
        &self,
        key: &str,
        fields: &[(&str, String)],
        ttl: Duration,
    ) -> Result<(), StoreError> {
        self.hash_set(key, fields).await?;
        self.expire(key, ttl).await
    }

    /// Returns every field of the hash at `key` (empty if it does not exist).
    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError>;

    /// Sets a TTL on `key`.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError>;

    async fn set_add(&self, key: &str, member: &str) -> Result<(), StoreError>;

    async fn set_remove(&self, key: &str, member: &str) -> Result<(), StoreError>;

    async fn set_len(&self, key: &str) -> Result<usize, StoreError>;
}

/// Key naming under a common prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpace {
    prefix: String,
}

impl KeySpace {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// List key for a priority lane.
    pub fn lane(&self, priority: Priority) -> String {
        format!("{}:queue:{}", self.prefix, priority.lane())
    }

    /// All lane keys, highest priority first.
    pub fn lanes(&self) -> Vec<String> {
        Priority::ALL.iter().map(|p| self.lane(*p)).collect()
    }

    pub fn task(&self, task_id: Uuid) -> String {
        format!("{}:task:{}", self.prefix, task_id)
    }

    pub fn execution(&self, execution_id: Uuid) -> String {
        format!("{}:execution:{}", self.prefix, execution_id)
    }

    /// Set of task ids currently claimed by a worker.
    pub fn running(&self) -> String {
        format!("{}:running", self.prefix)
    }
}
