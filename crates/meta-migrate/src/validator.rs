//! Ordering validation for migration batches.
//!
//! Validation only reads. A rejected batch leaves both the schema and the
//! bookkeeping table untouched.

use serde::{Deserialize, Serialize};

use crate::dialect::MAX_NAME_LEN;
use crate::error::{MigrateError, Result};
use crate::history::MigrationRecord;
use crate::migration::CandidateMigration;

/// How the first pending candidate is compared with the applied history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryRule {
    /// Both version and declared time must exceed the last applied record.
    #[default]
    Strict,
    /// Either a larger version or a later declared time is enough.
    Lenient,
}

/// Checks that a batch is well-formed and monotonically ordered.
///
/// `recorded[i]` tells whether candidate `i` already has a bookkeeping row.
/// Consecutive candidates must increase in both version and declared time.
/// The first candidate without a row is compared against `last` using `rule`.
pub fn validate(
    batch: &[CandidateMigration],
    recorded: &[bool],
    last: Option<&MigrationRecord>,
    rule: BoundaryRule,
) -> Result<()> {
    if batch.is_empty() {
        return Err(MigrateError::InvalidArgument(
            "an argument passed is empty".to_string(),
        ));
    }
    if recorded.len() != batch.len() {
        return Err(MigrateError::InvalidArgument(format!(
            "{} candidates but {} recorded flags",
            batch.len(),
            recorded.len()
        )));
    }
    for migration in batch {
        check_name(&migration.name)?;
    }

    for (index, pair) in batch.windows(2).enumerate() {
        let (prev, next) = (&pair[0], &pair[1]);
        if prev.version >= next.version {
            return Err(out_of_order(
                index + 1,
                next,
                format!(
                    "version {} does not follow version {}",
                    next.version, prev.version
                ),
            ));
        }
        if prev.declared_time >= next.declared_time {
            return Err(out_of_order(
                index + 1,
                next,
                format!(
                    "declared time {} is not after {}",
                    next.declared_time, prev.declared_time
                ),
            ));
        }
    }

    let Some(last) = last else {
        return Ok(());
    };
    let Some(index) = recorded.iter().position(|done| !done) else {
        return Ok(());
    };

    let first = &batch[index];
    let newer_version = last.version < first.version;
    let newer_time = last.applied_at < first.declared_time;
    let accepted = match rule {
        BoundaryRule::Strict => newer_version && newer_time,
        BoundaryRule::Lenient => newer_version || newer_time,
    };
    if !accepted {
        return Err(out_of_order(
            index,
            first,
            format!(
                "last applied migration is version {} ('{}') at {}",
                last.version, last.name, last.applied_at
            ),
        ));
    }

    Ok(())
}

/// Rejects names the bookkeeping table cannot hold.
pub fn check_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(MigrateError::InvalidArgument(
            "migration name is empty".to_string(),
        ));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(MigrateError::InvalidArgument(format!(
            "migration name exceeds {} characters",
            MAX_NAME_LEN
        )));
    }
    Ok(())
}

fn out_of_order(index: usize, migration: &CandidateMigration, reason: String) -> MigrateError {
    MigrateError::Order {
        index,
        version: migration.version,
        name: migration.name.clone(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::migration::MigrationScript;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap()
    }

    fn batch(versions: &[u8], days: &[i64]) -> Vec<CandidateMigration> {
        versions
            .iter()
            .zip(days)
            .map(|(v, d)| {
                CandidateMigration::new(
                    *v,
                    format!("migration {v}"),
                    base() + Duration::days(*d),
                    MigrationScript::new("SELECT 1"),
                )
            })
            .collect()
    }

    fn record(version: u8, days: i64) -> MigrationRecord {
        MigrationRecord {
            version,
            name: format!("migration {version}"),
            applied_at: base() + Duration::days(days),
        }
    }

    #[test]
    fn test_valid_batch_without_history() {
        let b = batch(&[0, 1, 2, 3], &[0, 1, 2, 3]);
        validate(&b, &[false; 4], None, BoundaryRule::Strict).unwrap();
    }

    #[test]
    fn test_empty_batch() {
        let err = validate(&[], &[], None, BoundaryRule::Strict).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_interior_version_out_of_order() {
        let b = batch(&[7, 1, 2, 3], &[0, 1, 2, 3]);
        let err = validate(&b, &[false; 4], None, BoundaryRule::Strict).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Order);
        assert_eq!(err.index(), Some(1));
    }

    #[test]
    fn test_interior_time_out_of_order() {
        let b = batch(&[0, 1, 2, 3], &[0, 5, 2, 3]);
        let err = validate(&b, &[false; 4], None, BoundaryRule::Strict).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Order);
        assert_eq!(err.index(), Some(2));
    }

    #[test]
    fn test_duplicate_inside_batch() {
        let b = batch(&[1, 1], &[0, 1]);
        let err = validate(&b, &[false; 2], None, BoundaryRule::Lenient).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Order);
    }

    #[test]
    fn test_boundary_strict_requires_both() {
        let b = batch(&[5, 6], &[10, 11]);
        let last = record(7, 1);
        let err = validate(&b, &[false; 2], Some(&last), BoundaryRule::Strict).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Order);
        assert_eq!(err.index(), Some(0));

        validate(&b, &[false; 2], Some(&last), BoundaryRule::Lenient).unwrap();
    }

    #[test]
    fn test_boundary_lenient_rejects_when_neither() {
        let b = batch(&[5, 6], &[10, 11]);
        let last = record(9, 20);
        let err = validate(&b, &[false; 2], Some(&last), BoundaryRule::Lenient).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Order);
    }

    #[test]
    fn test_boundary_skips_recorded_prefix() {
        let b = batch(&[0, 1, 2, 3], &[0, 1, 2, 3]);
        let last = record(1, 1);
        validate(&b, &[true, true, false, false], Some(&last), BoundaryRule::Strict).unwrap();
        validate(&b, &[true; 4], Some(&record(3, 3)), BoundaryRule::Strict).unwrap();
    }

    #[test]
    fn test_name_limits() {
        assert_eq!(check_name("").unwrap_err().kind(), ErrorKind::InvalidArgument);
        check_name(&"x".repeat(MAX_NAME_LEN)).unwrap();
        assert!(check_name(&"x".repeat(MAX_NAME_LEN + 1)).is_err());
    }
}
