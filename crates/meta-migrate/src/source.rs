//! Loading candidate migrations from a directory of SQL files.
//!
//! Files are named `<version>_<YYYYMMDDHHMMSS>_<name>.sql`, for example
//! `003_20240105120000_add_admin_column.sql`. Underscores in the name part
//! become spaces. Files without the `.sql` extension are ignored.

use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use chrono::NaiveDateTime;
use regex::Regex;
use tracing::debug;

use crate::error::{MigrateError, Result};
use crate::migration::{CandidateMigration, MigrationScript};

fn file_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(\d{1,3})_(\d{14})_(.+)\.sql$").expect("migration file pattern is valid")
    })
}

/// Parses a migration file name into version, declared time and name.
pub fn parse_file_name(file_name: &str) -> Result<(u8, chrono::DateTime<chrono::Utc>, String)> {
    let invalid = |why: &str| {
        MigrateError::InvalidArgument(format!("migration file '{file_name}': {why}"))
    };

    let caps = file_name_pattern()
        .captures(file_name)
        .ok_or_else(|| invalid("expected <version>_<YYYYMMDDHHMMSS>_<name>.sql"))?;
    let version: u8 = caps[1]
        .parse()
        .map_err(|_| invalid("version must be between 0 and 255"))?;
    let declared_time = NaiveDateTime::parse_from_str(&caps[2], "%Y%m%d%H%M%S")
        .map_err(|_| invalid("timestamp is not a valid date"))?
        .and_utc();
    let name = caps[3].replace('_', " ");

    Ok((version, declared_time, name))
}

/// Reads every `.sql` file in `dir` as a candidate, sorted by version.
pub fn load_dir(dir: impl AsRef<Path>) -> Result<Vec<CandidateMigration>> {
    let dir = dir.as_ref();
    let entries = fs::read_dir(dir).map_err(|source| MigrateError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut batch = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| MigrateError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("sql") {
            continue;
        }
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };

        let (version, declared_time, name) = parse_file_name(file_name)?;
        let file = fs::File::open(&path).map_err(|source| MigrateError::Io {
            path: path.clone(),
            source,
        })?;
        let script = MigrationScript::from_reader(file).map_err(|source| MigrateError::Io {
            path: path.clone(),
            source,
        })?;

        debug!(path = %path.display(), version, name = %name, "Loaded migration");
        batch.push(CandidateMigration::new(version, name, declared_time, script));
    }

    batch.sort_by_key(|m| m.version);
    Ok(batch)
}
