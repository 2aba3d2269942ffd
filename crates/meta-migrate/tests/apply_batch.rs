//! End-to-end behavior of single and batch migrations against SQLite.

use chrono::{DateTime, Duration, TimeZone, Utc};
use meta_migrate::prelude::*;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

const NAMES: [&str; 4] = [
    "Creating the users table.",
    "Root admin created.",
    "Add column 'admin' which determines administrative status.",
    "Give 'Root' admin status.",
];

async fn memory_pool() -> SqlitePool {
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect(":memory:")
        .await
        .expect("Failed to create in-memory SQLite pool")
}

fn good_scripts() -> Vec<MigrationScript> {
    vec![
        MigrationScript::new("CREATE TABLE users (username TEXT NOT NULL)"),
        MigrationScript::new("INSERT INTO users (username) VALUES (?)").bind("root"),
        MigrationScript::new("ALTER TABLE users ADD COLUMN admin BOOLEAN NOT NULL DEFAULT 0"),
        MigrationScript::new("UPDATE users SET admin = 1 WHERE username = ?").bind("root"),
    ]
}

fn years_after(base: DateTime<Utc>, years: &[i64]) -> Vec<DateTime<Utc>> {
    years.iter().map(|y| base + Duration::days(365 * y)).collect()
}

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2018, 7, 1, 0, 0, 0).unwrap()
}

async fn duplicate_keys(pool: &SqlitePool) -> i64 {
    let row: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM (SELECT version, migration FROM __meta \
         GROUP BY version, migration HAVING COUNT(*) > 1)",
    )
    .fetch_one(pool)
    .await
    .unwrap();
    row.0
}

#[tokio::test]
async fn good_batch_applies_in_order() {
    let migrator = Migrator::sqlite(memory_pool().await);

    let report = migrator
        .up_to(
            &[0, 1, 2, 3],
            &NAMES,
            &years_after(base_time(), &[0, 1, 2, 3]),
            good_scripts(),
        )
        .await
        .unwrap();
    assert_eq!(report.applied.len(), 4);

    assert_eq!(migrator.count().await.unwrap(), 4);
    let last = migrator.last_applied().await.unwrap().unwrap();
    assert_eq!(last.version, 3);
    assert_eq!(last.name, NAMES[3]);

    let history = migrator.history().await.unwrap();
    let versions: Vec<u8> = history.iter().map(|r| r.version).collect();
    assert_eq!(versions, vec![0, 1, 2, 3]);
}

#[tokio::test]
async fn out_of_order_batches_leave_no_trace() {
    let migrator = Migrator::sqlite(memory_pool().await);
    let cases: [(&[u8], &[i64]); 3] = [
        (&[7, 1, 2, 3], &[0, 1, 2, 3]),
        (&[0, 1, 2, 3], &[0, 5, 2, 3]),
        (&[7, 1, 2, 3], &[0, 5, 2, 3]),
    ];

    for (versions, years) in cases {
        let err = migrator
            .up_to(versions, &NAMES, &years_after(base_time(), years), good_scripts())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Order, "{versions:?} {years:?}");
        assert_eq!(migrator.count().await.unwrap(), 0);
    }
    assert!(migrator.last_applied().await.unwrap().is_none());
}

#[tokio::test]
async fn single_apply_sequence() {
    let migrator = Migrator::sqlite(memory_pool().await);
    let scripts = good_scripts();

    let err = migrator
        .apply(0, NAMES[0], &MigrationScript::new("just a bad sql statement :)"))
        .await
        .unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Script(_)));
    assert_eq!(migrator.count().await.unwrap(), 0);

    assert_eq!(
        migrator.apply(0, NAMES[0], &scripts[0]).await.unwrap(),
        ApplyOutcome::Applied
    );
    // Same key again: never a second row.
    assert_eq!(
        migrator.apply(0, NAMES[0], &scripts[0]).await.unwrap(),
        ApplyOutcome::AlreadyApplied
    );
    // Same script under another version runs and fails on the existing table.
    assert!(migrator.apply(1, NAMES[0], &scripts[0]).await.is_err());

    migrator.apply(1, NAMES[1], &scripts[1]).await.unwrap();
    migrator.apply(1, NAMES[2], &scripts[2]).await.unwrap();
    migrator.apply(1, NAMES[3], &scripts[3]).await.unwrap();

    let history = migrator.history().await.unwrap();
    let mut keys: Vec<(u8, String)> = history.into_iter().map(|r| (r.version, r.name)).collect();
    assert_eq!(keys.len(), 4);
    keys.sort();
    keys.dedup();
    assert_eq!(keys.len(), 4);
}

#[tokio::test]
async fn errors_name_the_failing_migration() {
    let migrator = Migrator::sqlite(memory_pool().await);
    let mut scripts = good_scripts();
    scripts[1] = MigrationScript::new("INSERT INTO nowhere (x) VALUES (1)");

    let err = migrator
        .up_to(
            &[0, 1, 2, 3],
            &NAMES,
            &years_after(base_time(), &[0, 1, 2, 3]),
            scripts,
        )
        .await
        .unwrap_err();

    match &err {
        MigrateError::Batch {
            index,
            version,
            name,
            source,
        } => {
            assert_eq!(*index, 1);
            assert_eq!(*version, 1);
            assert_eq!(name, NAMES[1]);
            assert!(matches!(**source, MigrateError::Script { .. }));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(migrator.count().await.unwrap(), 1);
}

#[tokio::test]
async fn concurrent_batches_never_duplicate_rows() {
    let dir = tempfile::tempdir().unwrap();
    let options = SqliteConnectOptions::new()
        .filename(dir.path().join("shared.sqlite3"))
        .create_if_missing(true);

    let pool_a = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options.clone())
        .await
        .unwrap();
    let pool_b = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .unwrap();
    let a = Migrator::sqlite(pool_a.clone());
    let b = Migrator::sqlite(pool_b);
    a.init().await.unwrap();

    let batch = CandidateMigration::from_parallel(
        &[0, 1, 2, 3],
        &NAMES,
        &years_after(base_time(), &[0, 1, 2, 3]),
        good_scripts(),
    )
    .unwrap();

    let (ra, rb) = tokio::join!(a.apply_batch(&batch), b.apply_batch(&batch));
    assert!(ra.is_ok() || rb.is_ok());

    assert_eq!(a.count().await.unwrap(), 4);
    assert_eq!(duplicate_keys(&pool_a).await, 0);
}

#[tokio::test]
async fn directory_scripts_run_every_statement() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("0_20240101090000_Create_posts.sql"),
        "-- posts and their index\n\
         CREATE TABLE posts (id INTEGER PRIMARY KEY, title TEXT NOT NULL);\n\
         CREATE INDEX idx_posts_title ON posts (title);\n",
    )
    .unwrap();
    std::fs::write(
        dir.path().join("1_20240102090000_Seed_posts.sql"),
        "INSERT INTO posts (title) VALUES ('hello; world');\n\
         INSERT INTO posts (title) SELECT title || '!' FROM posts;\n",
    )
    .unwrap();

    let pool = memory_pool().await;
    let migrator = Migrator::sqlite(pool.clone());
    let batch = load_dir(dir.path()).unwrap();
    let report = migrator.apply_batch(&batch).await.unwrap();
    assert_eq!(report.applied.len(), 2);

    let last = migrator.last_applied().await.unwrap().unwrap();
    assert_eq!(last.version, 1);
    assert_eq!(last.applied_at, batch[1].declared_time);

    let titles: Vec<(String,)> = sqlx::query_as("SELECT title FROM posts ORDER BY id")
        .fetch_all(&pool)
        .await
        .unwrap();
    assert_eq!(
        titles,
        vec![("hello; world".to_string(),), ("hello; world!".to_string(),)]
    );
}
