//! Migration history tracking.
//!
//! Single-row reads and writes on the `__meta` bookkeeping table. The table
//! is append-only: nothing here updates or deletes a record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::Sqlite;
use sqlx::Executor;

use crate::dialect::{MigrationDialect, META_TABLE};
use crate::error::{MigrateError, Result};

/// A record of an applied migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationRecord {
    /// Migration version.
    pub version: u8,
    /// Migration name.
    pub name: String,
    /// When the migration was applied.
    pub applied_at: DateTime<Utc>,
}

type RawRecord = (String, i64, String);

/// Reads and writes bookkeeping rows.
///
/// Every method accepts any SQLite executor so the same calls work against
/// a pool or inside an open transaction.
#[derive(Debug, Clone)]
pub struct MigrationHistory<D: MigrationDialect> {
    dialect: D,
}

impl<D: MigrationDialect> MigrationHistory<D> {
    /// Creates a new migration history accessor.
    pub fn new(dialect: D) -> Self {
        Self { dialect }
    }

    /// Records a migration as applied.
    ///
    /// Without `applied_at` the table's default (the current time, to the
    /// millisecond) is used.
    pub async fn insert<'c, E>(
        &self,
        executor: E,
        version: u8,
        name: &str,
        applied_at: Option<&DateTime<Utc>>,
    ) -> Result<()>
    where
        E: Executor<'c, Database = Sqlite>,
    {
        let result = match applied_at {
            Some(at) => {
                let sql = self.dialect.insert_sql(META_TABLE);
                sqlx::query(&sql)
                    .bind(i64::from(version))
                    .bind(name)
                    .bind(self.dialect.format_timestamp(at))
                    .execute(executor)
                    .await
            }
            None => {
                let sql = self.dialect.insert_default_time_sql(META_TABLE);
                sqlx::query(&sql)
                    .bind(i64::from(version))
                    .bind(name)
                    .execute(executor)
                    .await
            }
        };
        result.map_err(|e| MigrateError::store("record migration", e))?;
        Ok(())
    }

    /// Looks up the record for a version/name pair.
    pub async fn find<'c, E>(
        &self,
        executor: E,
        version: u8,
        name: &str,
    ) -> Result<Option<MigrationRecord>>
    where
        E: Executor<'c, Database = Sqlite>,
    {
        let sql = self.dialect.select_by_key_sql(META_TABLE);
        let row: Option<RawRecord> = sqlx::query_as(&sql)
            .bind(i64::from(version))
            .bind(name)
            .fetch_optional(executor)
            .await
            .map_err(|e| MigrateError::store("look up migration", e))?;

        row.map(|raw| self.decode(raw)).transpose()
    }

    /// Gets the most recently applied migration.
    pub async fn last<'c, E>(&self, executor: E) -> Result<Option<MigrationRecord>>
    where
        E: Executor<'c, Database = Sqlite>,
    {
        let sql = self.dialect.select_last_sql(META_TABLE);
        let row: Option<RawRecord> = sqlx::query_as(&sql)
            .fetch_optional(executor)
            .await
            .map_err(|e| MigrateError::store("read last migration", e))?;

        row.map(|raw| self.decode(raw)).transpose()
    }

    /// Gets all applied migrations, oldest first.
    pub async fn all<'c, E>(&self, executor: E) -> Result<Vec<MigrationRecord>>
    where
        E: Executor<'c, Database = Sqlite>,
    {
        let sql = self.dialect.select_all_sql(META_TABLE);
        let rows: Vec<RawRecord> = sqlx::query_as(&sql)
            .fetch_all(executor)
            .await
            .map_err(|e| MigrateError::store("read migration history", e))?;

        rows.into_iter().map(|raw| self.decode(raw)).collect()
    }

    /// Counts applied migrations.
    pub async fn count<'c, E>(&self, executor: E) -> Result<i64>
    where
        E: Executor<'c, Database = Sqlite>,
    {
        let sql = self.dialect.count_sql(META_TABLE);
        let row: (i64,) = sqlx::query_as(&sql)
            .fetch_one(executor)
            .await
            .map_err(|e| MigrateError::store("count migrations", e))?;
        Ok(row.0)
    }

    fn decode(&self, (applied, version, name): RawRecord) -> Result<MigrationRecord> {
        let applied_at = self.dialect.parse_timestamp(&applied).ok_or_else(|| {
            MigrateError::store(
                "decode migration record",
                sqlx::Error::Decode(format!("unreadable applied timestamp '{applied}'").into()),
            )
        })?;
        let version = u8::try_from(version).map_err(|_| {
            MigrateError::store(
                "decode migration record",
                sqlx::Error::Decode(format!("version {version} is out of range").into()),
            )
        })?;

        Ok(MigrationRecord {
            version,
            name,
            applied_at,
        })
    }
}
