//! In-memory job store.
//!
//! Mirrors the Redis primitives the queue relies on (LPUSH/BRPOP lanes, LREM,
//! HSET/HGETALL, SADD/SREM/SCARD, EXPIRE) inside one process. Blocking pops
//! park on a `Notify` that every push wakes. TTLs are enforced lazily, on the
//! next access to the store.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use super::JobStore;
use crate::error::StoreError;

#[derive(Default)]
struct MemoryState {
    lists: HashMap<String, VecDeque<String>>,
    hashes: HashMap<String, HashMap<String, String>>,
    sets: HashMap<String, HashSet<String>>,
    expiry: HashMap<String, Instant>,
}

impl MemoryState {
    fn purge_expired(&mut self) {
        let now = Instant::now();
        let expired: Vec<String> = self
            .expiry
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(key, _)| key.clone())
            .collect();

        for key in expired {
            self.expiry.remove(&key);
            self.lists.remove(&key);
            self.hashes.remove(&key);
            self.sets.remove(&key);
        }
    }

    fn exists(&self, key: &str) -> bool {
        self.lists.contains_key(key) || self.hashes.contains_key(key) || self.sets.contains_key(key)
    }
}

/// Process-local [`JobStore`].
pub struct MemoryJobStore {
    state: Mutex<MemoryState>,
    notify: Notify,
    available: AtomicBool,
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            notify: Notify::new(),
            available: AtomicBool::new(true),
        }
    }

    /// Simulates the store going down (`false`) or coming back (`true`).
    ///
    /// While unavailable every operation fails with `StoreError::Unavailable`.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable)
        }
    }

    async fn lock(&self) -> Result<tokio::sync::MutexGuard<'_, MemoryState>, StoreError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        state.purge_expired();
        Ok(state)
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.check_available()
    }

    async fn push_lane(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut state = self.lock().await?;
        state
            .lists
            .entry(key.to_string())
            .or_default()
            .push_front(member.to_string());
        drop(state);

        self.notify.notify_waiters();
        Ok(())
    }

    async fn pop_lanes(
        &self,
        keys: &[String],
        timeout: Duration,
    ) -> Result<Option<(String, String)>, StoreError> {
        let deadline = Instant::now() + timeout;

        loop {
            let mut state = self.lock().await?;
            for key in keys {
                let Some(list) = state.lists.get_mut(key) else {
                    continue;
                };
                if let Some(member) = list.pop_back() {
                    if list.is_empty() {
                        state.lists.remove(key);
                    }
                    return Ok(Some((key.clone(), member)));
                }
            }

            // Register interest before releasing the lock so a push that lands
            // in between still wakes us.
            let notified = self.notify.notified();
            drop(state);

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn remove_from_list(&self, key: &str, member: &str) -> Result<usize, StoreError> {
        let mut state = self.lock().await?;
        let Some(list) = state.lists.get_mut(key) else {
            return Ok(0);
        };

        let before = list.len();
        list.retain(|m| m != member);
        let removed = before - list.len();
        if list.is_empty() {
            state.lists.remove(key);
        }
        Ok(removed)
    }

    async fn list_len(&self, key: &str) -> Result<usize, StoreError> {
        let state = self.lock().await?;
        Ok(state.lists.get(key).map_or(0, VecDeque::len))
    }

    async fn hash_set(&self, key: &str, fields: &[(&str, String)]) -> Result<(), StoreError> {
        let mut state = self.lock().await?;
        let hash = state.hashes.entry(key.to_string()).or_default();
        for (field, value) in fields {
            hash.insert((*field).to_string(), value.clone());
        }
        Ok(())
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let state = self.lock().await?;
        Ok(state.hashes.get(key).cloned().unwrap_or_default())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut state = self.lock().await?;
        if state.exists(key) {
            state.expiry.insert(key.to_string(), Instant::now() + ttl);
        }
        Ok(())
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut state = self.lock().await?;
        state
            .sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut state = self.lock().await?;
        if let Some(set) = state.sets.get_mut(key) {
            set.remove(member);
            if set.is_empty() {
                state.sets.remove(key);
            }
        }
        Ok(())
    }

    async fn set_len(&self, key: &str) -> Result<usize, StoreError> {
        let state = self.lock().await?;
        Ok(state.sets.get(key).map_or(0, HashSet::len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_lane_is_fifo() {
        let store = MemoryJobStore::new();
        store.push_lane("q", "a").await.expect("push");
        store.push_lane("q", "b").await.expect("push");
        store.push_lane("q", "c").await.expect("push");

        let lanes = keys(&["q"]);
        let mut popped = Vec::new();
        while let Some((_, member)) = store
            .pop_lanes(&lanes, Duration::from_millis(10))
            .await
            .expect("pop")
        {
            popped.push(member);
        }
        assert_eq!(popped, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_pop_checks_keys_in_order() {
        let store = MemoryJobStore::new();
        store.push_lane("low", "x").await.expect("push");
        store.push_lane("high", "y").await.expect("push");

        let popped = store
            .pop_lanes(&keys(&["high", "low"]), Duration::from_millis(10))
            .await
            .expect("pop");
        assert_eq!(popped, Some(("high".to_string(), "y".to_string())));
    }

    #[tokio::test]
    async fn test_pop_times_out() {
        let store = MemoryJobStore::new();
        let started = Instant::now();
        let popped = store
            .pop_lanes(&keys(&["q"]), Duration::from_millis(50))
            .await
            .expect("pop");

        assert!(popped.is_none());
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_blocked_pop_wakes_on_push() {
        let store = Arc::new(MemoryJobStore::new());
        let waiter = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                store
                    .pop_lanes(&keys(&["q"]), Duration::from_secs(5))
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        store.push_lane("q", "late").await.expect("push");

        let popped = waiter.await.expect("join").expect("pop");
        assert_eq!(popped, Some(("q".to_string(), "late".to_string())));
    }

    #[tokio::test]
    async fn test_remove_from_list_counts() {
        let store = MemoryJobStore::new();
        store.push_lane("q", "a").await.expect("push");
        store.push_lane("q", "b").await.expect("push");

        assert_eq!(store.remove_from_list("q", "a").await.expect("lrem"), 1);
        assert_eq!(store.remove_from_list("q", "a").await.expect("lrem"), 0);
        assert_eq!(store.list_len("q").await.expect("llen"), 1);
    }

    #[tokio::test]
    async fn test_hash_and_ttl() {
        let store = MemoryJobStore::new();
        store
            .hash_set_with_ttl(
                "h",
                &[("status", "pending".to_string())],
                Duration::from_millis(30),
            )
            .await
            .expect("hset");

        let fields = store.hash_get_all("h").await.expect("hgetall");
        assert_eq!(fields.get("status").map(String::as_str), Some("pending"));

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(store.hash_get_all("h").await.expect("hgetall").is_empty());
    }

    #[tokio::test]
    async fn test_set_ops() {
        let store = MemoryJobStore::new();
        store.set_add("s", "a").await.expect("sadd");
        store.set_add("s", "a").await.expect("sadd");
        store.set_add("s", "b").await.expect("sadd");
        assert_eq!(store.set_len("s").await.expect("scard"), 2);

        store.set_remove("s", "a").await.expect("srem");
        assert_eq!(store.set_len("s").await.expect("scard"), 1);
    }

    #[tokio::test]
    async fn test_unavailable_store() {
        let store = MemoryJobStore::new();
        store.set_available(false);

        assert!(matches!(store.ping().await, Err(StoreError::Unavailable)));
        assert!(matches!(
            store.push_lane("q", "a").await,
            Err(StoreError::Unavailable)
        ));

        store.set_available(true);
        assert!(store.ping().await.is_ok());
    }
}
