use ::redis::aio::ConnectionManager;
use ::redis::{AsyncCommands, Client};
use async_trait::async_trait;

use super::{CacheBackend, CacheError};

const NAME: &str = "redis";

/// Directly addressed Redis server, used as the primary fan-out backend.
pub struct RedisBackend {
    conn: ConnectionManager,
}

impl RedisBackend {
    /// Connect to `url` (e.g. `redis://:password@host:6379`).
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client = Client::open(url).map_err(|e| CacheError::backend(NAME, e))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| CacheError::backend(NAME, e))?;

        tracing::info!("Connected to Redis fan-out cache");
        Ok(Self { conn })
    }
}

#[async_trait]
impl CacheBackend for RedisBackend {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn lpush(&self, key: &str, value: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .lpush(key, value)
            .await
            .map_err(|e| CacheError::backend(NAME, e))?;
        Ok(())
    }

    async fn ltrim(&self, key: &str, start: isize, stop: isize) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .ltrim(key, start, stop)
            .await
            .map_err(|e| CacheError::backend(NAME, e))?;
        Ok(())
    }

    async fn lrange(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<String>, CacheError> {
        let mut conn = self.conn.clone();
        conn.lrange(key, start, stop)
            .await
            .map_err(|e| CacheError::backend(NAME, e))
    }
}
