use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use futures::future::BoxFuture;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{ConnectOptions, Pool, Sqlite, SqlitePool, Transaction};

use crate::{AppError, AppResult};

/// Open (creating if missing) the database file at `db_path`.
///
/// Every failure is reported as `STORAGE/UNAVAILABLE`; callers treat
/// persistence as unavailable instead of aborting.
pub async fn open_sqlite_pool(db_path: &Path) -> AppResult<SqlitePool> {
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| {
            tracing::error!(
                target: "chrio",
                error = %e,
                event = "data_dir_create_failed",
                path = %parent.display()
            );
            AppError::storage_unavailable("Could not create the data directory")
                .with_context("path", parent.display().to_string())
                .with_cause(e)
        })?;
    }
    tracing::info!(target: "chrio", event = "db_path", path = %db_path.display());

    let opts = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full)
        .foreign_keys(true)
        .log_statements(log::LevelFilter::Trace)
        .log_slow_statements(log::LevelFilter::Warn, Duration::from_millis(500));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .after_connect(|conn, _| {
            Box::pin(async move {
                sqlx::query("PRAGMA busy_timeout = 5000;")
                    .execute(&mut *conn)
                    .await?;
                Ok::<_, sqlx::Error>(())
            })
        })
        .connect_with(opts)
        .await
        .map_err(|e| {
            tracing::error!(target: "chrio", event = "db_open_failed", error = %e);
            AppError::storage_unavailable("Could not open the database")
                .with_context("path", db_path.display().to_string())
                .with_cause(e)
        })?;

    log_effective_pragmas(&pool).await;

    Ok(pool)
}

/// Single-connection in-memory store. Each call yields an independent database.
pub async fn open_in_memory() -> AppResult<SqlitePool> {
    let opts = SqliteConnectOptions::from_str("sqlite::memory:")
        .map_err(AppError::from)?
        .foreign_keys(true);
    SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(opts)
        .await
        .map_err(|e| {
            AppError::storage_unavailable("Could not open in-memory database").with_cause(e)
        })
}

async fn log_effective_pragmas(pool: &Pool<Sqlite>) {
    use tracing::{info, warn};

    let (sqlite_ver,): (String,) = sqlx::query_as("select sqlite_version()")
        .fetch_one(pool)
        .await
        .unwrap_or((String::from("unknown"),));

    let jm: (String,) = sqlx::query_as("PRAGMA journal_mode;")
        .fetch_one(pool)
        .await
        .unwrap_or((String::from("unknown"),));

    let fks: (i64,) = sqlx::query_as("PRAGMA foreign_keys;")
        .fetch_one(pool)
        .await
        .unwrap_or((i64::MIN,));

    info!(
        target: "chrio",
        event = "db_open",
        sqlite_version = %sqlite_ver,
        journal_mode = %jm.0,
        foreign_keys = %fks.0
    );

    if fks.0 != 1 {
        warn!(
            target: "chrio",
            event = "db_open_warning",
            msg = "foreign_keys is off; orphan sessions are only prevented by application checks"
        );
    }
}

/// Run work inside a transaction. Commits on success, rolls back on error.
pub async fn run_in_tx<R, F>(pool: &SqlitePool, f: F) -> AppResult<R>
where
    R: Send,
    F: for<'c> FnOnce(&'c mut Transaction<'static, Sqlite>) -> BoxFuture<'c, AppResult<R>>,
{
    use tracing::{debug, error, warn};

    let mut tx = pool.begin().await.map_err(AppError::from)?;
    debug!(target: "chrio", event = "db_tx_begin");
    match f(&mut tx).await {
        Ok(val) => {
            tx.commit().await.map_err(AppError::from)?;
            debug!(target: "chrio", event = "db_tx_commit");
            Ok(val)
        }
        Err(e) => {
            if let Err(rb) = tx.rollback().await {
                error!(target: "chrio", event = "db_tx_rollback_failed", error = %rb);
            } else {
                warn!(target: "chrio", event = "db_tx_rollback", code = e.code());
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn file_pool_enables_foreign_keys() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pool = open_sqlite_pool(&dir.path().join("nested").join("t.db"))
            .await
            .expect("open pool");
        let (fks,): (i64,) = sqlx::query_as("PRAGMA foreign_keys;")
            .fetch_one(&pool)
            .await
            .expect("pragma");
        assert_eq!(fks, 1);
    }

    #[tokio::test]
    async fn unopenable_path_is_storage_unavailable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").expect("write blocker");
        let err = open_sqlite_pool(&blocker.join("db.sqlite"))
            .await
            .expect_err("parent is a regular file");
        assert_eq!(err.kind(), crate::ErrorKind::StorageUnavailable);
    }

    #[tokio::test]
    async fn run_in_tx_rolls_back_on_error() {
        let pool = open_in_memory().await.expect("pool");
        sqlx::query("CREATE TABLE t (v INTEGER)")
            .execute(&pool)
            .await
            .expect("create");
        let res: AppResult<()> = run_in_tx(&pool, |tx| {
            Box::pin(async move {
                sqlx::query("INSERT INTO t (v) VALUES (1)")
                    .execute(&mut **tx)
                    .await?;
                Err(AppError::new("TEST/FAIL", "abort"))
            })
        })
        .await;
        assert!(res.is_err());
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM t")
            .fetch_one(&pool)
            .await
            .expect("count");
        assert_eq!(count, 0);
    }
}
