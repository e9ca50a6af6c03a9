//! Redis-backed [`BufferStore`].
//!
//! Each bucket's buffer is a Redis list at `<namespace>:<app>:<bucket>`.
//! Values are appended with `RPUSH` inside `MULTI`/`EXEC`, popped with `LPOP`
//! and measured with `LLEN`.

use bb8_redis::{
    RedisConnectionManager,
    bb8::{Pool, PooledConnection},
    redis::{self, AsyncCommands},
};
use core::{ops::RangeInclusive, time::Duration};
use seqd_core::{BucketKey, Error, Result, store::BufferStore};

/// Idle pooled connections are closed after this long.
const IDLE_TIMEOUT: Duration = Duration::from_secs(240);

pub struct RedisBuffer {
    pool: Pool<RedisConnectionManager>,
    namespace: String,
}

impl RedisBuffer {
    /// Builds a pool of at most `pool_size` connections to `url`.
    ///
    /// Connections are opened lazily and validated with `PING` on every
    /// checkout, so an unreachable Redis only surfaces on first use.
    pub async fn connect(url: &str, pool_size: u32, namespace: impl Into<String>) -> Result<Self> {
        let manager = RedisConnectionManager::new(url).map_err(Error::fast_store)?;
        let pool = Pool::builder()
            .max_size(pool_size)
            .idle_timeout(Some(IDLE_TIMEOUT))
            .test_on_check_out(true)
            .build(manager)
            .await
            .map_err(Error::fast_store)?;

        Ok(Self {
            pool,
            namespace: namespace.into(),
        })
    }

    async fn connection(&self) -> Result<PooledConnection<'_, RedisConnectionManager>> {
        self.pool.get().await.map_err(Error::fast_store)
    }

    fn key(&self, key: &BucketKey) -> String {
        key.namespaced(&self.namespace)
    }
}

impl BufferStore for RedisBuffer {
    async fn pop_front(&self, key: &BucketKey) -> Result<Option<u64>> {
        let mut conn = self.connection().await?;
        let value: Option<u64> = conn
            .lpop(self.key(key), None)
            .await
            .map_err(Error::fast_store)?;
        Ok(value)
    }

    async fn depth(&self, key: &BucketKey) -> Result<usize> {
        let mut conn = self.connection().await?;
        let depth: usize = conn.llen(self.key(key)).await.map_err(Error::fast_store)?;
        Ok(depth)
    }

    async fn push_range(&self, key: &BucketKey, range: RangeInclusive<u64>) -> Result<()> {
        let values: Vec<u64> = range.collect();
        if values.is_empty() {
            return Ok(());
        }

        let mut pipe = redis::pipe();
        pipe.atomic().rpush(self.key(key), values).ignore();

        let mut conn = self.connection().await?;
        let () = pipe
            .query_async(&mut *conn)
            .await
            .map_err(Error::fast_store)?;
        Ok(())
    }
}
