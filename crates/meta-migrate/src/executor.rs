//! Migration executor.
//!
//! This module applies migration scripts against a database and records each
//! one in the bookkeeping table, either one at a time or as an ordered batch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnection, SqlitePool};
use sqlx::{Either, Executor, Statement};
use tracing::{debug, info, warn};

use crate::dialect::{MigrationDialect, SqliteDialect};
use crate::error::{MigrateError, Result, ScriptPhase};
use crate::history::{MigrationHistory, MigrationRecord};
use crate::migration::{CandidateMigration, MigrationScript};
use crate::store::MetaStore;
use crate::validator::{self, BoundaryRule};

/// Tunables for a [`Migrator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigratorOptions {
    /// Remember that the bookkeeping table exists instead of re-checking.
    pub cache_table_check: bool,
    /// How a batch is compared with the already applied history.
    pub boundary_rule: BoundaryRule,
    /// Run each script and its bookkeeping insert in one transaction.
    pub transactional: bool,
}

impl Default for MigratorOptions {
    fn default() -> Self {
        Self {
            cache_table_check: true,
            boundary_rule: BoundaryRule::Strict,
            transactional: true,
        }
    }
}

impl MigratorOptions {
    /// Enables or disables the table existence cache.
    #[must_use]
    pub fn cache_table_check(mut self, enabled: bool) -> Self {
        self.cache_table_check = enabled;
        self
    }

    /// Sets the boundary rule.
    #[must_use]
    pub fn boundary_rule(mut self, rule: BoundaryRule) -> Self {
        self.boundary_rule = rule;
        self
    }

    /// Enables or disables transactional apply.
    #[must_use]
    pub fn transactional(mut self, enabled: bool) -> Self {
        self.transactional = enabled;
        self
    }
}

/// What a single apply did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The script ran and was recorded.
    Applied,
    /// A record with the same version and name already existed.
    AlreadyApplied,
}

/// Result of a successful batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    /// Version/name of every migration that ran, in order.
    pub applied: Vec<(u8, String)>,
    /// Version/name of every migration that was already recorded.
    pub skipped: Vec<(u8, String)>,
}

/// Applies migrations against a database and tracks them.
pub struct Migrator<D: MigrationDialect + Clone = SqliteDialect> {
    pool: SqlitePool,
    database: String,
    store: MetaStore<D>,
    history: MigrationHistory<D>,
    options: MigratorOptions,
}

impl Migrator<SqliteDialect> {
    /// Creates a migrator with the SQLite dialect and default options.
    pub fn sqlite(pool: SqlitePool) -> Self {
        Self::new(pool, SqliteDialect::new())
    }
}

impl<D: MigrationDialect + Clone> Migrator<D> {
    /// Creates a new migrator with default options.
    pub fn new(pool: SqlitePool, dialect: D) -> Self {
        Self::with_options(pool, dialect, MigratorOptions::default())
    }

    /// Creates a new migrator.
    pub fn with_options(pool: SqlitePool, dialect: D, options: MigratorOptions) -> Self {
        let database = pool
            .connect_options()
            .get_filename()
            .to_string_lossy()
            .into_owned();
        let store = MetaStore::new(pool.clone(), dialect.clone(), options.cache_table_check);
        Self {
            pool,
            database,
            store,
            history: MigrationHistory::new(dialect),
            options,
        }
    }

    /// Identifier of the target database.
    #[must_use]
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Returns the options in effect.
    #[must_use]
    pub fn options(&self) -> &MigratorOptions {
        &self.options
    }

    /// Returns the bookkeeping table store.
    #[must_use]
    pub fn store(&self) -> &MetaStore<D> {
        &self.store
    }

    /// Ensures the bookkeeping table exists.
    pub async fn init(&self) -> Result<()> {
        self.store.ensure(&self.database).await
    }

    /// Returns the most recently applied migration, if any.
    pub async fn last_applied(&self) -> Result<Option<MigrationRecord>> {
        self.init().await?;
        self.history.last(&self.pool).await
    }

    /// Returns every applied migration, oldest first.
    pub async fn history(&self) -> Result<Vec<MigrationRecord>> {
        self.init().await?;
        self.history.all(&self.pool).await
    }

    /// Counts applied migrations.
    pub async fn count(&self) -> Result<i64> {
        self.init().await?;
        self.history.count(&self.pool).await
    }

    /// Checks if a migration has been applied.
    pub async fn is_applied(&self, version: u8, name: &str) -> Result<bool> {
        self.init().await?;
        Ok(self.history.find(&self.pool, version, name).await?.is_some())
    }

    /// Returns the candidates in `batch` that have not been recorded yet.
    pub async fn pending<'a>(
        &self,
        batch: &'a [CandidateMigration],
    ) -> Result<Vec<&'a CandidateMigration>> {
        let recorded = self.recorded(batch).await?;
        Ok(batch
            .iter()
            .zip(recorded)
            .filter(|(_, done)| !done)
            .map(|(m, _)| m)
            .collect())
    }

    /// Applies a single migration.
    ///
    /// The record's `applied` time is the moment the call started. A
    /// migration whose version and name are already recorded is not run again.
    pub async fn apply(
        &self,
        version: u8,
        name: &str,
        script: &MigrationScript,
    ) -> Result<ApplyOutcome> {
        let applied_at = Utc::now();
        validator::check_name(name)?;
        self.init().await?;
        let outcome = self.apply_one(version, name, &applied_at, script).await?;
        match outcome {
            ApplyOutcome::Applied => info!(version, name, "Migration applied successfully"),
            ApplyOutcome::AlreadyApplied => {
                warn!(version, name, "Migration already applied, skipping")
            }
        }
        Ok(outcome)
    }

    /// Applies an ordered batch of migrations ("apply up to latest").
    ///
    /// The whole batch is validated before anything runs. Migrations that are
    /// already recorded are skipped. If one fails, the ones before it stay
    /// applied and the error carries the failing index.
    pub async fn apply_batch(&self, batch: &[CandidateMigration]) -> Result<BatchReport> {
        self.init().await?;

        let recorded = self.recorded(batch).await?;
        let last = self.history.last(&self.pool).await?;
        validator::validate(batch, &recorded, last.as_ref(), self.options.boundary_rule)?;

        let mut report = BatchReport::default();
        for (index, migration) in batch.iter().enumerate() {
            let version = migration.version;
            let name = migration.name.as_str();
            let outcome = self
                .apply_one(version, name, &migration.declared_time, &migration.script)
                .await
                .map_err(|source| {
                    warn!(index, version, name, error = %source, "Batch stopped");
                    MigrateError::Batch {
                        index,
                        version,
                        name: name.to_string(),
                        source: Box::new(source),
                    }
                })?;

            let key = (version, name.to_string());
            match outcome {
                ApplyOutcome::Applied => {
                    info!(index, version, name, "Migration applied successfully");
                    report.applied.push(key);
                }
                ApplyOutcome::AlreadyApplied => {
                    warn!(index, version, name, "Migration already applied, skipping");
                    report.skipped.push(key);
                }
            }
        }

        info!(
            applied = report.applied.len(),
            skipped = report.skipped.len(),
            "Batch complete"
        );
        Ok(report)
    }

    /// Builds a batch from parallel slices and applies it.
    pub async fn up_to<S: AsRef<str>>(
        &self,
        versions: &[u8],
        names: &[S],
        times: &[DateTime<Utc>],
        scripts: Vec<MigrationScript>,
    ) -> Result<BatchReport> {
        let batch = CandidateMigration::from_parallel(versions, names, times, scripts)?;
        self.apply_batch(&batch).await
    }

    async fn recorded(&self, batch: &[CandidateMigration]) -> Result<Vec<bool>> {
        self.init().await?;
        let mut recorded = Vec::with_capacity(batch.len());
        for migration in batch {
            let found = self
                .history
                .find(&self.pool, migration.version, &migration.name)
                .await?;
            recorded.push(found.is_some());
        }
        Ok(recorded)
    }

    async fn apply_one(
        &self,
        version: u8,
        name: &str,
        applied_at: &DateTime<Utc>,
        script: &MigrationScript,
    ) -> Result<ApplyOutcome> {
        if self.options.transactional {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| MigrateError::store("begin transaction", e))?;
            let outcome = self
                .run_and_record(&mut tx, version, name, applied_at, script)
                .await?;
            tx.commit()
                .await
                .map_err(|e| MigrateError::store("commit migration", e))?;
            Ok(outcome)
        } else {
            let mut conn = self
                .pool
                .acquire()
                .await
                .map_err(|e| MigrateError::store("acquire connection", e))?;
            self.run_and_record(&mut conn, version, name, applied_at, script)
                .await
        }
    }

    /// Runs the script and inserts its record on one connection.
    ///
    /// Statements are prepared and executed one at a time, so later
    /// statements can depend on objects created by earlier ones. Positional
    /// arguments are consumed in order by each statement's parameters.
    async fn run_and_record(
        &self,
        conn: &mut SqliteConnection,
        version: u8,
        name: &str,
        applied_at: &DateTime<Utc>,
        script: &MigrationScript,
    ) -> Result<ApplyOutcome> {
        if self
            .history
            .find(&mut *conn, version, name)
            .await?
            .is_some()
        {
            return Ok(ApplyOutcome::AlreadyApplied);
        }

        info!(version, name, "Applying migration");

        let mut statements = script.statements();
        if statements.is_empty() {
            // Let the database judge text with no statement in it.
            statements.push(&script.sql);
        }

        let mut args = script.args.iter();
        for (position, sql) in statements.into_iter().enumerate() {
            debug!(version, statement = position, sql, "Executing SQL");
            let statement = (&mut *conn)
                .prepare(sql)
                .await
                .map_err(|source| MigrateError::Script {
                    version,
                    name: name.to_string(),
                    phase: ScriptPhase::Prepare,
                    source,
                })?;
            let wanted = match statement.parameters() {
                Some(Either::Left(params)) => params.len(),
                Some(Either::Right(count)) => count,
                None => 0,
            };
            let mut query = statement.query();
            for arg in args.by_ref().take(wanted) {
                query = arg.bind(query);
            }
            query
                .execute(&mut *conn)
                .await
                .map_err(|source| MigrateError::Script {
                    version,
                    name: name.to_string(),
                    phase: ScriptPhase::Execute,
                    source,
                })?;
        }
        let unused = args.count();
        if unused > 0 {
            return Err(MigrateError::InvalidArgument(format!(
                "migration {version} '{name}' has {unused} more arguments than parameters"
            )));
        }

        match self
            .history
            .insert(&mut *conn, version, name, Some(applied_at))
            .await
        {
            Ok(()) => Ok(ApplyOutcome::Applied),
            // Outside a transaction the script's effect is already permanent.
            Err(MigrateError::Store { source, .. }) if !self.options.transactional => {
                warn!(
                    version,
                    name,
                    error = %source,
                    "Migration script ran but could not be recorded"
                );
                Err(MigrateError::Untracked {
                    version,
                    name: name.to_string(),
                    source,
                })
            }
            Err(err) => Err(err),
        }
    }
}
