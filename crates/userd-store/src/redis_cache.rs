// ABOUTME: Redis-backed Cache storing each user record as JSON under a namespaced key.
// ABOUTME: Every Redis or decode failure maps to CacheError::Unavailable so reads fall back to the store.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use ulid::Ulid;
use userd_core::{Cache, CacheError, Record};

/// Key under which a user record is cached.
pub fn user_key(id: Ulid) -> String {
    format!("userd:user:{id}")
}

#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
}

impl fmt::Debug for RedisCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisCache")
            .field("connection", &"ConnectionManager")
            .finish()
    }
}

impl RedisCache {
    pub async fn connect(redis_url: &str) -> Result<Self, CacheError> {
        tracing::info!("connecting to redis cache at {}", redis_url);

        let client = redis::Client::open(redis_url)
            .map_err(|e| CacheError::Unavailable(format!("invalid redis url: {e}")))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| CacheError::Unavailable(format!("failed to connect to redis: {e}")))?;

        Ok(Self { conn })
    }
}

fn unavailable(op: &str, err: redis::RedisError) -> CacheError {
    CacheError::Unavailable(format!("redis {op} failed: {err}"))
}

#[async_trait]
impl Cache for RedisCache {
    async fn get(&self, id: Ulid) -> Result<Option<Record>, CacheError> {
        let mut conn = self.conn.clone();
        let data: Option<String> = conn
            .get(user_key(id))
            .await
            .map_err(|e| unavailable("GET", e))?;

        data.map(|json| {
            serde_json::from_str(&json)
                .map_err(|e| CacheError::Unavailable(format!("undecodable cache entry: {e}")))
        })
        .transpose()
    }

    async fn set(&self, id: Ulid, record: &Record, ttl: Option<Duration>) -> Result<(), CacheError> {
        let json = serde_json::to_string(record)
            .map_err(|e| CacheError::Unavailable(format!("failed to encode record: {e}")))?;
        let mut conn = self.conn.clone();

        match ttl {
            Some(ttl) => conn
                .set_ex::<_, _, ()>(user_key(id), json, ttl.as_secs().max(1))
                .await
                .map_err(|e| unavailable("SETEX", e)),
            None => conn
                .set::<_, _, ()>(user_key(id), json)
                .await
                .map_err(|e| unavailable("SET", e)),
        }
    }

    async fn invalidate(&self, id: Ulid) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(user_key(id))
            .await
            .map_err(|e| unavailable("DEL", e))
    }
}
