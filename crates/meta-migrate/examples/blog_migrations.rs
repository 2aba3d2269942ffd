//! Example: Blog Application Migrations
//!
//! Applies a batch of blog schema migrations to an in-memory database,
//! re-runs it to show that nothing is applied twice, and then resumes after
//! a failing migration is fixed.
//!
//! Run with: cargo run --example blog_migrations -p meta-migrate

use chrono::{DateTime, Duration, TimeZone, Utc};
use meta_migrate::prelude::*;
use sqlx::sqlite::SqlitePoolOptions;

fn blog_batch(base: DateTime<Utc>, comments_sql: &str) -> Vec<CandidateMigration> {
    let steps = [
        (
            "Create users table.",
            "CREATE TABLE users (id INTEGER PRIMARY KEY, username TEXT NOT NULL UNIQUE)",
        ),
        (
            "Create posts table.",
            "CREATE TABLE posts (id INTEGER PRIMARY KEY, author_id INTEGER NOT NULL \
             REFERENCES users (id), title TEXT NOT NULL)",
        ),
        ("Create comments table.", comments_sql),
        (
            "Index posts by author.",
            "CREATE INDEX idx_posts_author ON posts (author_id)",
        ),
    ];

    steps
        .iter()
        .enumerate()
        .map(|(i, (name, sql))| {
            CandidateMigration::new(
                i as u8,
                *name,
                base + Duration::hours(i as i64),
                MigrationScript::new(*sql),
            )
        })
        .collect()
}

fn print_history(records: &[MigrationRecord]) {
    println!("    {} migrations applied:", records.len());
    for record in records {
        println!(
            "    [X] {:>3} {} ({})",
            record.version,
            record.name,
            record.applied_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    println!();
}

#[tokio::main]
async fn main() -> Result<()> {
    println!("{}", "=".repeat(70));
    println!(" meta-migrate: Blog Example");
    println!("{}", "=".repeat(70));
    println!();

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect(":memory:")
        .await
        .map_err(|e| MigrateError::Store {
            context: "open in-memory database".to_string(),
            source: e,
        })?;
    let migrator = Migrator::sqlite(pool);
    let base = Utc.with_ymd_and_hms(2024, 2, 1, 10, 0, 0).unwrap();

    println!("[1] Applying a batch with a broken third migration...\n");
    let broken = blog_batch(base, "CREATE TABLE comments (id INTEGER PRIMARY KEY,");
    match migrator.apply_batch(&broken).await {
        Ok(_) => println!("    unexpectedly succeeded"),
        Err(err) => println!("    {err}\n"),
    }
    print_history(&migrator.history().await?);

    println!("[2] Resuming with the fixed migration...\n");
    let fixed = blog_batch(
        base,
        "CREATE TABLE comments (id INTEGER PRIMARY KEY, post_id INTEGER NOT NULL \
         REFERENCES posts (id), body TEXT NOT NULL)",
    );
    let report = migrator.apply_batch(&fixed).await?;
    println!(
        "    applied {:?}, skipped {:?}\n",
        report.applied, report.skipped
    );
    print_history(&migrator.history().await?);

    println!("[3] Re-running the same batch...\n");
    let report = migrator.apply_batch(&fixed).await?;
    println!("    {} applied, {} skipped\n", report.applied.len(), report.skipped.len());

    println!("[4] Submitting an out-of-order migration...\n");
    let late = vec![CandidateMigration::new(
        1,
        "Add drafts.",
        base + Duration::days(1),
        MigrationScript::new("ALTER TABLE posts ADD COLUMN draft BOOLEAN NOT NULL DEFAULT 0"),
    )];
    if let Err(err) = migrator.apply_batch(&late).await {
        println!("    rejected: {err}\n");
    }

    if let Some(last) = migrator.last_applied().await? {
        println!("    Last applied: {} ({})", last.name, last.version);
    }

    println!();
    println!("{}", "=".repeat(70));
    println!(" Example completed successfully!");
    println!("{}", "=".repeat(70));

    Ok(())
}
