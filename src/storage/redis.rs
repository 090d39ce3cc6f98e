//! Redis store implementation.
//!
//! The production backend. Immediate queues map to lists (`RPUSH`/`BLPOP`),
//! scheduled sets to sorted sets (`ZADD`/`ZRANGEBYSCORE`/`ZREM`), job records
//! to hashes (`HSET`/`HGETALL`), retention to `EXPIRE`, and [`Tx`] batches to
//! an atomic `MULTI`/`EXEC` pipeline.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;

use super::{Op, Store, StoreError, Tx};

/// Redis-backed store.
///
/// Holds a reconnecting multiplexed connection; cheap to clone per
/// operation. Note that `list_pop_any` issues `BLPOP` with no timeout, so a
/// worker's connection stays parked server-side until work arrives.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Connect to a Redis server, e.g. `redis://127.0.0.1:6379/`.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(connection_err)?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(connection_err)?;
        Ok(Self { conn })
    }
}

fn connection_err(err: redis::RedisError) -> StoreError {
    StoreError::Connection(err.to_string())
}

#[async_trait]
impl Store for RedisStore {
    async fn list_push(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.rpush::<_, _, ()>(key, member)
            .await
            .map_err(connection_err)
    }

    async fn list_pop_any(&self, keys: &[String]) -> Result<(String, String), StoreError> {
        let mut conn = self.conn.clone();
        // Zero timeout: block server-side until one of the keys has a member.
        conn.blpop::<_, (String, String)>(keys, 0.0)
            .await
            .map_err(connection_err)
    }

    async fn zset_range_by_score(&self, key: &str, max: i64) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        conn.zrangebyscore::<_, _, _, Vec<String>>(key, "-inf", max)
            .await
            .map_err(connection_err)
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let mut conn = self.conn.clone();
        conn.hget::<_, _, Option<Vec<u8>>>(key, field)
            .await
            .map_err(connection_err)
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, Vec<u8>>, StoreError> {
        let mut conn = self.conn.clone();
        conn.hgetall::<_, HashMap<String, Vec<u8>>>(key)
            .await
            .map_err(connection_err)
    }

    async fn apply(&self, tx: Tx) -> Result<(), StoreError> {
        if tx.is_empty() {
            return Ok(());
        }

        let mut pipe = redis::pipe();
        pipe.atomic();
        for op in tx.ops() {
            match op {
                Op::ListPush { key, member } => {
                    pipe.rpush(key, member).ignore();
                }
                Op::ZsetAdd { key, score, member } => {
                    pipe.zadd(key, member, *score).ignore();
                }
                Op::ZsetRemove { key, member } => {
                    pipe.zrem(key, member).ignore();
                }
                Op::HashSet { key, fields } => {
                    pipe.hset_multiple(key, fields).ignore();
                }
                Op::Expire { key, seconds } => {
                    pipe.expire(key, *seconds).ignore();
                }
                Op::Delete { key } => {
                    pipe.del(key).ignore();
                }
            }
        }

        let mut conn = self.conn.clone();
        pipe.query_async::<_, ()>(&mut conn)
            .await
            .map_err(connection_err)
    }
}
