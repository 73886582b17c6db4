#![allow(clippy::unwrap_used, clippy::expect_used, dead_code)]

use std::path::Path;

use chrio_lib::config::AppConfig;
use chrio_lib::model::{ClientInput, Sex};
use chrio_lib::repo::{Gateway, SqliteGateway};
use chrio_lib::state::AppState;
use chrio_lib::{db, schema};
use sqlx::SqlitePool;

pub async fn memory_pool() -> SqlitePool {
    let pool = db::open_in_memory().await.expect("open sqlite::memory:");
    schema::initialize(&pool).await.expect("apply schema");
    pool
}

pub async fn memory_gateway() -> SqliteGateway {
    SqliteGateway::new(memory_pool().await)
}

/// Composition root over an in-memory store, with photos under `data_dir`.
pub async fn memory_state(data_dir: &Path) -> AppState {
    AppState::from_pool(AppConfig::with_data_dir(data_dir), memory_pool().await)
}

pub fn client(firstname: &str) -> ClientInput {
    ClientInput::new(firstname, "Silva", "1990-04-02", Sex::Female)
}

pub async fn seed_client(gw: &dyn Gateway, firstname: &str) -> i64 {
    gw.insert_client(client(firstname)).await.expect("insert client")
}
