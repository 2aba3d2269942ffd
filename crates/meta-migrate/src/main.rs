//! meta-migrate CLI
//!
//! Command-line tool for applying and inspecting tracked migrations.

use std::path::PathBuf;

use chrono::Utc;
use clap::{Parser, Subcommand};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use meta_migrate::prelude::*;

/// Versioned SQL migrations tracked in a bookkeeping table.
#[derive(Parser)]
#[command(name = "meta-migrate")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Database URL (SQLite path or connection string).
    #[arg(short, long, env = "DATABASE_URL", default_value = "sqlite:db.sqlite3")]
    database: String,

    /// Enable verbose output.
    #[arg(short, long)]
    verbose: bool,

    /// Re-check the bookkeeping table on every call instead of caching.
    #[arg(long)]
    no_cache: bool,

    /// Run scripts and their bookkeeping inserts as separate statements.
    #[arg(long)]
    no_transaction: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the bookkeeping table if it is missing.
    Init,

    /// Show the last applied migration.
    Last {
        /// Print as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show every applied migration.
    History {
        /// Print as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Apply a single migration script.
    Apply {
        /// Migration version.
        #[arg(long)]
        version: u8,

        /// Migration name.
        #[arg(short, long)]
        name: String,

        /// File holding the SQL script.
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Apply every migration in a directory, in version order.
    Up {
        /// Directory of `<version>_<YYYYMMDDHHMMSS>_<name>.sql` files.
        #[arg(default_value = "migrations")]
        dir: PathBuf,

        /// Accept a batch whose first migration is newer in version or time only.
        #[arg(long)]
        lenient: bool,

        /// Only list pending migrations.
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .without_time()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let boundary_rule = match &cli.command {
        Commands::Up { lenient: true, .. } => BoundaryRule::Lenient,
        _ => BoundaryRule::Strict,
    };
    let options = MigratorOptions::default()
        .cache_table_check(!cli.no_cache)
        .transactional(!cli.no_transaction)
        .boundary_rule(boundary_rule);

    // Connect to database
    let connect = cli
        .database
        .parse::<SqliteConnectOptions>()?
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(connect)
        .await?;

    let migrator = Migrator::with_options(pool, SqliteDialect::new(), options);

    match cli.command {
        Commands::Init => {
            info!("Initializing migrations system...");
            migrator.init().await?;
            info!("Bookkeeping table ready.");
        }

        Commands::Last { json } => match migrator.last_applied().await? {
            Some(record) if json => println!("{}", serde_json::to_string_pretty(&record)?),
            Some(record) => println!(
                "{} {} ({})",
                record.version,
                record.name,
                record.applied_at.format("%Y-%m-%d %H:%M:%S")
            ),
            None if json => println!("null"),
            None => info!("No migrations have been applied yet."),
        },

        Commands::History { json } => {
            let records = migrator.history().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else if records.is_empty() {
                info!("No migrations have been applied yet.");
            } else {
                println!("\nApplied migrations:");
                println!("{:-<60}", "");
                for record in &records {
                    println!(
                        " [X] {:>3} {} ({})",
                        record.version,
                        record.name,
                        record.applied_at.format("%Y-%m-%d %H:%M:%S")
                    );
                }
                println!();
            }
        }

        Commands::Apply {
            version,
            name,
            file,
        } => {
            let started = Utc::now();
            let script = MigrationScript::from_reader(std::fs::File::open(&file)?)?;
            match migrator.apply(version, &name, &script).await? {
                ApplyOutcome::Applied => info!(
                    elapsed_ms = (Utc::now() - started).num_milliseconds(),
                    "Applied {} ({})",
                    name,
                    version
                ),
                ApplyOutcome::AlreadyApplied => info!("Nothing to do."),
            }
        }

        Commands::Up { dir, dry_run, .. } => {
            let batch = load_dir(&dir)?;
            if batch.is_empty() {
                info!("No migrations found in {}", dir.display());
                return Ok(());
            }

            if dry_run {
                let pending = migrator.pending(&batch).await?;
                if pending.is_empty() {
                    info!("Database is up to date.");
                }
                for migration in pending {
                    println!(
                        " [ ] {:>3} {} ({})",
                        migration.version,
                        migration.name,
                        migration.declared_time.format("%Y-%m-%d %H:%M:%S")
                    );
                }
                return Ok(());
            }

            let report = migrator.apply_batch(&batch).await?;
            info!(
                "{} applied, {} already present",
                report.applied.len(),
                report.skipped.len()
            );
        }
    }

    Ok(())
}
