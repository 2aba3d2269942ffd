//! Versioned SQL migrations tracked in a bookkeeping table.
//!
//! `meta-migrate` applies ordered change scripts to a database and records
//! each one in the reserved `__meta` table, so repeated runs are idempotent
//! and a half-applied batch can be resumed:
//! - Every migration runs at most once per `(version, name)` pair
//! - A batch is validated for ordering before any script executes
//! - A failing batch keeps the migrations that already ran
//!
//! # Architecture
//!
//! - **Store** - Creates the bookkeeping table and caches that it exists
//! - **History** - Reads and writes bookkeeping rows
//! - **Validator** - Checks version and timestamp monotonicity of a batch
//! - **Executor** - Runs scripts, records them, and drives batches
//! - **Source** - Loads candidate migrations from a directory of SQL files
//! - **Dialect** - Database-specific bookkeeping SQL
//!
//! # Example
//!
//! ```rust,ignore
//! use meta_migrate::prelude::*;
//!
//! let migrator = Migrator::sqlite(pool);
//!
//! let batch = vec![
//!     CandidateMigration::new(
//!         0,
//!         "Create the users table.",
//!         "2024-01-01T00:00:00Z".parse()?,
//!         MigrationScript::new("CREATE TABLE users (username TEXT NOT NULL)"),
//!     ),
//!     CandidateMigration::new(
//!         1,
//!         "Add the root user.",
//!         "2024-01-02T00:00:00Z".parse()?,
//!         MigrationScript::new("INSERT INTO users (username) VALUES (?)").bind("root"),
//!     ),
//! ];
//! migrator.apply_batch(&batch).await?;
//!
//! let last = migrator.last_applied().await?;
//! ```
//!
//! # CLI Usage
//!
//! ```bash
//! # Create the bookkeeping table
//! meta-migrate init
//!
//! # Apply every migration in a directory
//! meta-migrate up migrations/
//!
//! # Show the last applied migration
//! meta-migrate last
//! ```

pub mod dialect;
pub mod error;
pub mod executor;
pub mod history;
pub mod migration;
pub mod source;
pub mod store;
pub mod validator;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::dialect::{MigrationDialect, SqliteDialect, META_TABLE};
    pub use crate::error::{ErrorKind, MigrateError, Result, ScriptPhase};
    pub use crate::executor::{ApplyOutcome, BatchReport, Migrator, MigratorOptions};
    pub use crate::history::{MigrationHistory, MigrationRecord};
    pub use crate::migration::{CandidateMigration, MigrationScript, ScriptArg};
    pub use crate::source::load_dir;
    pub use crate::store::MetaStore;
    pub use crate::validator::BoundaryRule;
}
