//! SQLite dialect for the bookkeeping table.
//!
//! SQLite has no native timestamp type, so `applied` is stored as text in a
//! fixed-width UTC format whose lexical order matches chronological order.
//! Times are written with nanosecond digits. The column default only knows
//! milliseconds and pads the rest with zeros to keep the same width.

use chrono::{DateTime, NaiveDateTime, Utc};

use super::{MigrationDialect, MAX_NAME_LEN};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.9f";

/// SQLite bookkeeping dialect.
#[derive(Debug, Clone, Default)]
pub struct SqliteDialect;

impl SqliteDialect {
    /// Creates a new SQLite dialect.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl MigrationDialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn table_exists_sql(&self) -> String {
        "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ? LIMIT 1".to_string()
    }

    fn create_table_sql(&self, table: &str) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n  \
             applied TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f000000', 'now')),\n  \
             version INTEGER NOT NULL CHECK (version BETWEEN 0 AND 255),\n  \
             migration VARCHAR({}) NOT NULL,\n  \
             UNIQUE (version, migration)\n)",
            self.quote_identifier(table),
            MAX_NAME_LEN
        )
    }

    fn format_timestamp(&self, at: &DateTime<Utc>) -> String {
        at.format(TIMESTAMP_FORMAT).to_string()
    }

    fn parse_timestamp(&self, raw: &str) -> Option<DateTime<Utc>> {
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
            .map(|dt| dt.and_utc())
            .or_else(|_| DateTime::parse_from_rfc3339(raw).map(|dt| dt.with_timezone(&Utc)))
            .ok()
    }

    fn select_last_sql(&self, table: &str) -> String {
        format!(
            "SELECT applied, version, migration FROM {} ORDER BY applied DESC, rowid DESC LIMIT 1",
            self.quote_identifier(table)
        )
    }

    fn select_all_sql(&self, table: &str) -> String {
        format!(
            "SELECT applied, version, migration FROM {} ORDER BY applied, rowid",
            self.quote_identifier(table)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn dialect() -> SqliteDialect {
        SqliteDialect::new()
    }

    #[test]
    fn test_name() {
        assert_eq!(dialect().name(), "sqlite");
    }

    #[test]
    fn test_create_table_has_unique_key() {
        let sql = dialect().create_table_sql("__meta");
        assert!(sql.contains("CREATE TABLE IF NOT EXISTS \"__meta\""));
        assert!(sql.contains("UNIQUE (version, migration)"));
        assert!(sql.contains("VARCHAR(256)"));
    }

    #[test]
    fn test_timestamp_format_sorts_lexically() {
        let d = dialect();
        let earlier = Utc.with_ymd_and_hms(2024, 1, 9, 23, 59, 59).unwrap();
        let later = Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap();
        assert!(d.format_timestamp(&earlier) < d.format_timestamp(&later));
        assert_eq!(d.format_timestamp(&later), "2024-01-10 00:00:00.000000000");
    }

    #[test]
    fn test_timestamp_keeps_sub_millisecond_precision() {
        let d = dialect();
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
            + chrono::Duration::nanoseconds(900_001);
        let text = d.format_timestamp(&at);
        assert_eq!(text, "2024-01-01 00:00:00.000900001");
        assert_eq!(d.parse_timestamp(&text), Some(at));

        let next = at + chrono::Duration::nanoseconds(1);
        assert!(text < d.format_timestamp(&next));
    }

    #[test]
    fn test_column_default_matches_width() {
        let d = dialect();
        let sql = d.create_table_sql("__meta");
        assert!(sql.contains("'%Y-%m-%d %H:%M:%f000000'"));

        // A defaulted value reads back as the same instant.
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(
            d.parse_timestamp("2024-01-01 00:00:00.123000000"),
            Some(at + chrono::Duration::milliseconds(123))
        );
    }

    #[test]
    fn test_parse_timestamp() {
        let d = dialect();
        let at = Utc.with_ymd_and_hms(2021, 6, 1, 12, 30, 0).unwrap();
        assert_eq!(d.parse_timestamp("2021-06-01 12:30:00.000"), Some(at));
        assert_eq!(d.parse_timestamp("2021-06-01 12:30:00"), Some(at));
        assert_eq!(d.parse_timestamp("2021-06-01T12:30:00+00:00"), Some(at));
        assert_eq!(d.parse_timestamp("yesterday"), None);
    }
}
