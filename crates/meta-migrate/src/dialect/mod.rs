//! Database dialect implementations.
//!
//! Each dialect knows how to phrase the bookkeeping statements (catalog
//! lookup, table creation, inserts and lookups) for one database system.

mod sqlite;

pub use sqlite::SqliteDialect;

use chrono::{DateTime, Utc};

/// Name of the reserved bookkeeping table.
pub const META_TABLE: &str = "__meta";

/// Maximum length of a migration name, matching the `migration` column width.
pub const MAX_NAME_LEN: usize = 256;

/// Trait for database-specific bookkeeping SQL.
///
/// Every `SELECT` on the bookkeeping table returns the columns
/// `applied, version, migration` in that order.
pub trait MigrationDialect: Send + Sync {
    /// Returns the dialect name.
    fn name(&self) -> &'static str;

    /// Catalog query returning a row when the table bound as the only
    /// parameter exists.
    fn table_exists_sql(&self) -> String;

    /// Statement creating the bookkeeping table, including the
    /// `(version, migration)` uniqueness constraint.
    fn create_table_sql(&self, table: &str) -> String;

    /// Formats a timestamp the way the `applied` column stores it.
    fn format_timestamp(&self, at: &DateTime<Utc>) -> String;

    /// Parses a stored `applied` value.
    fn parse_timestamp(&self, raw: &str) -> Option<DateTime<Utc>>;

    /// Insert with an explicit `applied` timestamp (binds: version, name, applied).
    fn insert_sql(&self, table: &str) -> String {
        format!(
            "INSERT INTO {} (version, migration, applied) VALUES (?, ?, ?)",
            self.quote_identifier(table)
        )
    }

    /// Insert relying on the column default for `applied` (binds: version, name).
    fn insert_default_time_sql(&self, table: &str) -> String {
        format!(
            "INSERT INTO {} (version, migration) VALUES (?, ?)",
            self.quote_identifier(table)
        )
    }

    /// Lookup of a single record (binds: version, name).
    fn select_by_key_sql(&self, table: &str) -> String {
        format!(
            "SELECT applied, version, migration FROM {} WHERE version = ? AND migration = ?",
            self.quote_identifier(table)
        )
    }

    /// The most recently applied record.
    fn select_last_sql(&self, table: &str) -> String;

    /// All records, oldest first.
    fn select_all_sql(&self, table: &str) -> String;

    /// Number of records.
    fn count_sql(&self, table: &str) -> String {
        format!("SELECT COUNT(*) FROM {}", self.quote_identifier(table))
    }

    /// Quote an identifier (table name, column name, etc.).
    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name)
    }
}
