//! In-memory store implementation.
//!
//! Thread-safe backend for tests and development. Blocking pops are backed
//! by a [`Notify`] so waiting dequeuers wake on every push without polling.
//! Data is not persisted across restarts.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::Notify;

use super::{Op, Store, StoreError, Tx};

/// In-memory store backend.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    pushed: Notify,
}

#[derive(Default)]
struct Inner {
    lists: HashMap<String, VecDeque<String>>,
    zsets: HashMap<String, Vec<(i64, String)>>,
    hashes: HashMap<String, HashMap<String, Vec<u8>>>,
    expiries: HashMap<String, Instant>,
}

impl Inner {
    fn apply_op(&mut self, op: Op) {
        match op {
            Op::ListPush { key, member } => {
                self.lists.entry(key).or_default().push_back(member);
            }
            Op::ZsetAdd { key, score, member } => {
                let set = self.zsets.entry(key).or_default();
                set.retain(|(_, m)| *m != member);
                set.push((score, member));
            }
            Op::ZsetRemove { key, member } => {
                if let Some(set) = self.zsets.get_mut(&key) {
                    set.retain(|(_, m)| *m != member);
                }
            }
            Op::HashSet { key, fields } => {
                let hash = self.hashes.entry(key).or_default();
                for (field, value) in fields {
                    hash.insert(field, value);
                }
            }
            Op::Expire { key, seconds } => {
                let deadline = Instant::now() + Duration::from_secs(seconds.max(0) as u64);
                self.expiries.insert(key, deadline);
            }
            Op::Delete { key } => {
                self.hashes.remove(&key);
                self.lists.remove(&key);
                self.zsets.remove(&key);
                self.expiries.remove(&key);
            }
        }
    }

    /// Drop a hash whose retention TTL has passed.
    fn purge_expired(&mut self, key: &str) {
        if let Some(deadline) = self.expiries.get(key) {
            if *deadline <= Instant::now() {
                self.expiries.remove(key);
                self.hashes.remove(key);
            }
        }
    }
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Score of a sorted-set member, if present. Test and tooling helper.
    pub fn zset_score(&self, key: &str, member: &str) -> Result<Option<i64>, StoreError> {
        let inner = self.inner.lock().map_err(|_| StoreError::LockPoisoned)?;
        Ok(inner.zsets.get(key).and_then(|set| {
            set.iter()
                .find(|(_, m)| m == member)
                .map(|(score, _)| *score)
        }))
    }

    /// Number of members in a list. Test and tooling helper.
    pub fn list_len(&self, key: &str) -> Result<usize, StoreError> {
        let inner = self.inner.lock().map_err(|_| StoreError::LockPoisoned)?;
        Ok(inner.lists.get(key).map_or(0, VecDeque::len))
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn list_push(&self, key: &str, member: &str) -> Result<(), StoreError> {
        {
            let mut inner = self.inner.lock().map_err(|_| StoreError::LockPoisoned)?;
            inner
                .lists
                .entry(key.to_string())
                .or_default()
                .push_back(member.to_string());
        }
        self.pushed.notify_waiters();
        Ok(())
    }

    async fn list_pop_any(&self, keys: &[String]) -> Result<(String, String), StoreError> {
        loop {
            // Register for wakeups before checking, so a push that lands
            // between the check and the await is not missed.
            let notified = self.pushed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut inner = self.inner.lock().map_err(|_| StoreError::LockPoisoned)?;
                for key in keys {
                    if let Some(list) = inner.lists.get_mut(key) {
                        if let Some(member) = list.pop_front() {
                            return Ok((key.clone(), member));
                        }
                    }
                }
            }

            notified.await;
        }
    }

    async fn zset_range_by_score(&self, key: &str, max: i64) -> Result<Vec<String>, StoreError> {
        let inner = self.inner.lock().map_err(|_| StoreError::LockPoisoned)?;
        let mut due: Vec<(i64, String)> = inner
            .zsets
            .get(key)
            .map(|set| {
                set.iter()
                    .filter(|(score, _)| *score <= max)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        due.sort();
        Ok(due.into_iter().map(|(_, member)| member).collect())
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let mut inner = self.inner.lock().map_err(|_| StoreError::LockPoisoned)?;
        inner.purge_expired(key);
        Ok(inner
            .hashes
            .get(key)
            .and_then(|hash| hash.get(field))
            .cloned())
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, Vec<u8>>, StoreError> {
        let mut inner = self.inner.lock().map_err(|_| StoreError::LockPoisoned)?;
        inner.purge_expired(key);
        Ok(inner.hashes.get(key).cloned().unwrap_or_default())
    }

    async fn apply(&self, tx: Tx) -> Result<(), StoreError> {
        let mut wake_poppers = false;
        {
            let mut inner = self.inner.lock().map_err(|_| StoreError::LockPoisoned)?;
            for op in tx.ops() {
                if matches!(op, Op::ListPush { .. }) {
                    wake_poppers = true;
                }
                inner.apply_op(op.clone());
            }
        }
        if wake_poppers {
            self.pushed.notify_waiters();
        }
        Ok(())
    }
}
