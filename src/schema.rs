use std::path::Path;

use futures::FutureExt;
use sqlx::SqlitePool;
use tracing::{error, info};

use crate::{db, AppError, AppResult};

static SCHEMA_SQL: &str = include_str!("../migrations/schema.sql");

/// Tables the application owns; `initialize` guarantees all of them exist.
pub const TABLES: &[&str] = &["clients", "sessions", "todos"];

fn preview(sql: &str) -> String {
    let one_line = sql.replace(['\n', '\t'], " ");
    let trimmed = one_line.trim();
    if trimmed.chars().count() > 160 {
        format!("{}…", trimmed.chars().take(160).collect::<String>())
    } else {
        trimmed.to_string()
    }
}

fn statements() -> Vec<String> {
    let cleaned = SCHEMA_SQL
        .lines()
        .filter(|line| {
            let t = line.trim_start();
            !(t.is_empty() || t.starts_with("--"))
        })
        .collect::<Vec<_>>()
        .join("\n");
    cleaned
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Create any missing tables and indexes. Safe to call on every start.
pub async fn initialize(pool: &SqlitePool) -> AppResult<()> {
    let stmts = statements();
    db::run_in_tx(pool, move |tx| {
        async move {
            for stmt in &stmts {
                info!(target: "chrio", event = "schema_stmt", sql = %preview(stmt));
                if let Err(e) = sqlx::query(stmt).execute(&mut **tx).await {
                    error!(
                        target: "chrio",
                        event = "schema_stmt_error",
                        sql = %preview(stmt),
                        error = %e
                    );
                    return Err(AppError::from(e));
                }
            }
            Ok(())
        }
        .boxed()
    })
    .await
    .map_err(|e| {
        AppError::storage_unavailable("Could not initialise the database schema").with_cause(e)
    })?;
    info!(target: "chrio", event = "schema_ready", tables = TABLES.len());
    Ok(())
}

/// Open the store file and make sure the schema exists.
pub async fn open_and_initialize(db_path: &Path) -> AppResult<SqlitePool> {
    let pool = db::open_sqlite_pool(db_path).await?;
    initialize(&pool).await?;
    Ok(pool)
}

/// Names of user tables currently present, sorted.
pub async fn table_names(pool: &SqlitePool) -> AppResult<Vec<String>> {
    let names: Vec<String> = sqlx::query_scalar(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' \
         ORDER BY name",
    )
    .fetch_all(pool)
    .await?;
    Ok(names)
}
