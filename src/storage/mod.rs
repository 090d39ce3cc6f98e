//! Storage abstraction over the backing store.
//!
//! The store exposes Redis-shaped primitives: per-queue lists with an atomic
//! blocking pop across multiple keys, score-ordered sets, per-job hashes,
//! per-key expiry, and all-or-nothing batching of write operations. Backends
//! are pluggable behind the [`Store`] trait (in-memory for tests, Redis for
//! production).

mod memory;
mod redis;

pub use memory::MemoryStore;
pub use self::redis::RedisStore;

use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

/// Errors raised by store operations.
///
/// Store unavailability is not caught anywhere inside the crate; it
/// propagates and fails the current worker process fast.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing connection failed or the server rejected a command.
    #[error("store connection error: {0}")]
    Connection(String),

    /// Store lock was poisoned (in-memory backend).
    #[error("store lock poisoned")]
    LockPoisoned,

    /// A stored value was not valid for its expected shape.
    #[error("malformed stored value: {0}")]
    MalformedValue(String),
}

/// A single write operation inside an atomic batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    /// Push a member to the tail of a list.
    ListPush { key: String, member: String },
    /// Add (or move) a member in a sorted set at the given score.
    ZsetAdd {
        key: String,
        score: i64,
        member: String,
    },
    /// Remove a member from a sorted set.
    ZsetRemove { key: String, member: String },
    /// Set multiple fields of a hash.
    HashSet {
        key: String,
        fields: Vec<(String, Vec<u8>)>,
    },
    /// Set a time-to-live on a key, in seconds.
    Expire { key: String, seconds: i64 },
    /// Delete a key outright.
    Delete { key: String },
}

/// An all-or-nothing batch of write operations.
///
/// Multi-step mutations (enqueue, finish, reschedule, retire) accumulate
/// their ops in one `Tx` and commit it with [`Store::apply`], so partial
/// states are never observed by another worker or a refreshing reader.
#[derive(Debug, Default)]
pub struct Tx {
    ops: Vec<Op>,
}

impl Tx {
    /// Create an empty transaction.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a list push.
    pub fn list_push(&mut self, key: impl Into<String>, member: impl Into<String>) {
        self.ops.push(Op::ListPush {
            key: key.into(),
            member: member.into(),
        });
    }

    /// Queue a sorted-set add at `score`.
    pub fn zset_add(&mut self, key: impl Into<String>, score: i64, member: impl Into<String>) {
        self.ops.push(Op::ZsetAdd {
            key: key.into(),
            score,
            member: member.into(),
        });
    }

    /// Queue a sorted-set member removal.
    pub fn zset_remove(&mut self, key: impl Into<String>, member: impl Into<String>) {
        self.ops.push(Op::ZsetRemove {
            key: key.into(),
            member: member.into(),
        });
    }

    /// Queue a multi-field hash write.
    pub fn hash_set(&mut self, key: impl Into<String>, fields: Vec<(String, Vec<u8>)>) {
        self.ops.push(Op::HashSet {
            key: key.into(),
            fields,
        });
    }

    /// Queue a key expiry.
    pub fn expire(&mut self, key: impl Into<String>, seconds: i64) {
        self.ops.push(Op::Expire {
            key: key.into(),
            seconds,
        });
    }

    /// Queue a key deletion.
    pub fn delete(&mut self, key: impl Into<String>) {
        self.ops.push(Op::Delete { key: key.into() });
    }

    /// Whether any operations were queued.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// The queued operations, in order.
    pub fn ops(&self) -> &[Op] {
        &self.ops
    }
}

/// Backing-store contract.
///
/// Reads are individual operations; writes go through [`Store::apply`] as an
/// atomic batch. `list_pop_any` is the sole mutual-exclusion mechanism for
/// immediate jobs: at most one caller receives a given popped member.
#[async_trait]
pub trait Store: Send + Sync {
    /// Push a member to the tail of a list.
    async fn list_push(&self, key: &str, member: &str) -> Result<(), StoreError>;

    /// Block until any of `keys` has a member, then atomically pop exactly
    /// one from whichever becomes ready first, returning `(key, member)`.
    /// Blocks indefinitely and yields the task while waiting.
    async fn list_pop_any(&self, keys: &[String]) -> Result<(String, String), StoreError>;

    /// Members of a sorted set with score at most `max`, ascending.
    /// Does not remove them.
    async fn zset_range_by_score(&self, key: &str, max: i64) -> Result<Vec<String>, StoreError>;

    /// A single hash field, or `None` when the key or field is absent.
    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// All fields of a hash; empty when the key is absent.
    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, Vec<u8>>, StoreError>;

    /// Apply a batch of write operations atomically.
    async fn apply(&self, tx: Tx) -> Result<(), StoreError>;
}
