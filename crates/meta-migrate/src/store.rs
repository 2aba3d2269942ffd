//! Lifecycle of the bookkeeping table.
//!
//! The existence check is cached per store, keyed by the database identifier
//! it was computed for. The lock is held across check-and-create so callers
//! sharing a store never race each other into the catalog.

use sqlx::sqlite::SqlitePool;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::dialect::{MigrationDialect, META_TABLE};
use crate::error::{MigrateError, Result};

/// Guarantees the bookkeeping table exists before it is read or written.
#[derive(Debug)]
pub struct MetaStore<D: MigrationDialect> {
    pool: SqlitePool,
    dialect: D,
    caching: bool,
    verified_for: Mutex<Option<String>>,
}

impl<D: MigrationDialect> MetaStore<D> {
    /// Creates a new store. With `caching` off every `ensure` hits the catalog.
    pub fn new(pool: SqlitePool, dialect: D, caching: bool) -> Self {
        Self {
            pool,
            dialect,
            caching,
            verified_for: Mutex::new(None),
        }
    }

    /// Ensures the bookkeeping table exists in `database`.
    pub async fn ensure(&self, database: &str) -> Result<()> {
        let mut verified_for = self.verified_for.lock().await;
        if self.caching && verified_for.as_deref() == Some(database) {
            return Ok(());
        }
        *verified_for = None;

        if self.table_exists().await? {
            debug!(
                database,
                dialect = self.dialect.name(),
                table = META_TABLE,
                "Bookkeeping table found"
            );
        } else {
            let sql = self.dialect.create_table_sql(META_TABLE);
            debug!(sql = %sql, "Executing SQL");
            sqlx::query(&sql)
                .execute(&self.pool)
                .await
                .map_err(|e| MigrateError::store("create bookkeeping table", e))?;
            info!(
                database,
                dialect = self.dialect.name(),
                table = META_TABLE,
                "Created bookkeeping table"
            );
        }

        if self.caching {
            *verified_for = Some(database.to_string());
        }
        Ok(())
    }

    /// Asks the catalog whether the bookkeeping table exists.
    pub async fn table_exists(&self) -> Result<bool> {
        let row: Option<(i64,)> = sqlx::query_as(&self.dialect.table_exists_sql())
            .bind(META_TABLE)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| MigrateError::store("check for bookkeeping table", e))?;
        Ok(row.is_some())
    }

    /// Forgets the cached check so the next `ensure` consults the catalog.
    pub async fn invalidate(&self) {
        *self.verified_for.lock().await = None;
    }

    /// Returns the database identifier the cache currently vouches for.
    pub async fn verified_for(&self) -> Option<String> {
        self.verified_for.lock().await.clone()
    }
}
