//! MySQL-backed [`CounterStore`].
//!
//! Expects one table (default `seq`) keyed by `(app, bucket)`:
//!
//! ```sql
//! CREATE TABLE `seq` (
//!     `app`    VARCHAR(64)     NOT NULL,
//!     `bucket` VARCHAR(64)     NOT NULL,
//!     `seq`    BIGINT UNSIGNED NOT NULL DEFAULT 0,
//!     PRIMARY KEY (`app`, `bucket`)
//! ) ENGINE = InnoDB;
//! ```
//!
//! The table is not created or migrated by the service.
//!
//! An increment is a single upsert that stores the new value through
//! `LAST_INSERT_ID(expr)`. MySQL reports that value back in the statement's
//! OK packet, so the add and the read happen in one round trip on one
//! connection, atomically with respect to concurrent increments of the same
//! row.

use seqd_core::{BucketKey, Error, Result, store::CounterStore};
use sqlx::mysql::{MySqlPool, MySqlPoolOptions};

pub struct MysqlCounter {
    pool: MySqlPool,
    increment_sql: String,
}

impl MysqlCounter {
    /// Opens a pool of at most `pool_size` connections to `dsn`.
    ///
    /// Fails if no connection can be established.
    pub async fn connect(dsn: &str, pool_size: u32, table: &str) -> Result<Self> {
        let pool = MySqlPoolOptions::new()
            .max_connections(pool_size)
            .connect(dsn)
            .await
            .map_err(Error::durable_store)?;
        Ok(Self::with_pool(pool, table))
    }

    /// Wraps an existing pool. `table` must be a plain identifier; it is
    /// interpolated into the statement.
    pub fn with_pool(pool: MySqlPool, table: &str) -> Self {
        Self {
            pool,
            increment_sql: increment_statement(table),
        }
    }
}

fn increment_statement(table: &str) -> String {
    format!(
        "INSERT INTO `{table}` (`app`, `bucket`, `seq`) VALUES (?, ?, LAST_INSERT_ID(?)) \
         ON DUPLICATE KEY UPDATE `seq` = LAST_INSERT_ID(`seq` + ?)"
    )
}

impl CounterStore for MysqlCounter {
    async fn increment(&self, key: &BucketKey, step: u64) -> Result<u64> {
        let result = sqlx::query(&self.increment_sql)
            .bind(key.app())
            .bind(key.bucket())
            .bind(step)
            .bind(step)
            .execute(&self.pool)
            .await
            .map_err(Error::durable_store)?;
        Ok(result.last_insert_id())
    }
}
