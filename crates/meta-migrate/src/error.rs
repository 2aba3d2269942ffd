//! Error types for the migration system.

use std::fmt;
use std::path::PathBuf;

/// Stage of script handling at which a migration failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptPhase {
    /// The statement text could not be prepared.
    Prepare,
    /// The prepared statement failed while executing.
    Execute,
}

impl fmt::Display for ScriptPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Prepare => f.write_str("prepare"),
            Self::Execute => f.write_str("execute"),
        }
    }
}

/// Coarse classification of a [`MigrateError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or mismatched inputs.
    InvalidArgument,
    /// Versions or timestamps are not monotonically increasing.
    Order,
    /// The bookkeeping table could not be checked, created, read or written.
    Store,
    /// A migration script failed.
    Script(ScriptPhase),
}

/// Errors that can occur during migration operations.
#[derive(Debug, thiserror::Error)]
pub enum MigrateError {
    /// Inputs were empty, of uneven length, or otherwise malformed.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A candidate breaks the ordering of the batch or of the applied history.
    #[error("Migration {index} (version {version}, '{name}') is out of order: {reason}")]
    Order {
        /// Position of the offending candidate in its batch.
        index: usize,
        /// Version of the offending candidate.
        version: u8,
        /// Name of the offending candidate.
        name: String,
        /// What was violated.
        reason: String,
    },

    /// Bookkeeping table failure.
    #[error("Bookkeeping error while trying to {context}: {source}")]
    Store {
        /// What was being attempted.
        context: String,
        /// Underlying database error.
        #[source]
        source: sqlx::Error,
    },

    /// The migration script itself failed.
    #[error("Migration version {version} ('{name}') failed to {phase}: {source}")]
    Script {
        /// Version of the failing migration.
        version: u8,
        /// Name of the failing migration.
        name: String,
        /// Stage at which the script failed.
        phase: ScriptPhase,
        /// Underlying database error.
        #[source]
        source: sqlx::Error,
    },

    /// The script ran but its bookkeeping row could not be written.
    ///
    /// The script's effect on the schema is permanent; the bookkeeping table
    /// no longer reflects it and must be repaired by hand.
    #[error(
        "Migration version {version} ('{name}') was applied but could not be recorded: {source}"
    )]
    Untracked {
        /// Version of the applied migration.
        version: u8,
        /// Name of the applied migration.
        name: String,
        /// Underlying database error.
        #[source]
        source: sqlx::Error,
    },

    /// A migration inside a batch failed. Earlier migrations stay applied.
    #[error("Batch stopped at migration {index} (version {version}, '{name}'): {source}")]
    Batch {
        /// Position of the failing migration in its batch.
        index: usize,
        /// Version of the failing migration.
        version: u8,
        /// Name of the failing migration.
        name: String,
        /// What went wrong.
        #[source]
        source: Box<MigrateError>,
    },

    /// IO error (reading migration scripts).
    #[error("IO error reading '{path}': {source}")]
    Io {
        /// File being read.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

impl MigrateError {
    pub(crate) fn store(context: impl Into<String>, source: sqlx::Error) -> Self {
        Self::Store {
            context: context.into(),
            source,
        }
    }

    /// Returns the error class, looking through batch wrappers.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument(_) | Self::Io { .. } => ErrorKind::InvalidArgument,
            Self::Order { .. } => ErrorKind::Order,
            Self::Store { .. } | Self::Untracked { .. } => ErrorKind::Store,
            Self::Script { phase, .. } => ErrorKind::Script(*phase),
            Self::Batch { source, .. } => source.kind(),
        }
    }

    /// Returns the batch index of the failing migration, if known.
    #[must_use]
    pub fn index(&self) -> Option<usize> {
        match self {
            Self::Order { index, .. } | Self::Batch { index, .. } => Some(*index),
            _ => None,
        }
    }
}

/// Result type for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_kind_delegates() {
        let err = MigrateError::Batch {
            index: 2,
            version: 3,
            name: "add users".to_string(),
            source: Box::new(MigrateError::Script {
                version: 3,
                name: "add users".to_string(),
                phase: ScriptPhase::Execute,
                source: sqlx::Error::RowNotFound,
            }),
        };
        assert_eq!(err.kind(), ErrorKind::Script(ScriptPhase::Execute));
        assert_eq!(err.index(), Some(2));
        assert!(err.to_string().contains("failed to execute"));
    }

    #[test]
    fn test_untracked_is_store_error() {
        let err = MigrateError::Untracked {
            version: 1,
            name: "seed".to_string(),
            source: sqlx::Error::PoolClosed,
        };
        assert_eq!(err.kind(), ErrorKind::Store);
        assert_eq!(err.index(), None);
    }
}
