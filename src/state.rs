use std::sync::Arc;

use sqlx::SqlitePool;

use crate::{
    config::AppConfig,
    repo::{Gateway, SqliteGateway, UnavailableGateway},
    schema,
    store::{ClientStore, SessionStore},
    AppError,
};

/// Composition root shared by the CLI and the desktop shell.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub gateway: Arc<dyn Gateway>,
    pub clients: Arc<ClientStore>,
    pub sessions: Arc<SessionStore>,
    pool: Option<SqlitePool>,
    storage_error: Option<AppError>,
}

impl AppState {
    /// Open the store, apply the schema and wire up the caches.
    ///
    /// Never fails: when the store cannot be opened every gateway call reports
    /// `STORAGE/UNAVAILABLE` instead.
    pub async fn initialize(config: AppConfig) -> Self {
        match schema::open_and_initialize(&config.db_path).await {
            Ok(pool) => Self::from_pool(config, pool),
            Err(err) => {
                tracing::error!(
                    target: "chrio",
                    event = "storage_unavailable",
                    path = %config.db_path.display(),
                    code = err.code(),
                    message = err.message()
                );
                let gateway: Arc<dyn Gateway> = Arc::new(UnavailableGateway::new(err.clone()));
                let mut state = Self::from_gateway(config, gateway);
                state.storage_error = Some(err);
                state
            }
        }
    }

    /// Wrap an already initialised pool.
    pub fn from_pool(config: AppConfig, pool: SqlitePool) -> Self {
        let gateway: Arc<dyn Gateway> = Arc::new(SqliteGateway::new(pool.clone()));
        let mut state = Self::from_gateway(config, gateway);
        state.pool = Some(pool);
        state
    }

    pub fn from_gateway(config: AppConfig, gateway: Arc<dyn Gateway>) -> Self {
        Self {
            config: Arc::new(config),
            clients: Arc::new(ClientStore::new(gateway.clone())),
            sessions: Arc::new(SessionStore::new(gateway.clone())),
            gateway,
            pool: None,
            storage_error: None,
        }
    }

    pub fn pool(&self) -> Option<&SqlitePool> {
        self.pool.as_ref()
    }

    /// The error that made the store unavailable at startup, if any.
    pub fn storage_error(&self) -> Option<&AppError> {
        self.storage_error.as_ref()
    }

    pub fn storage_available(&self) -> bool {
        self.storage_error.is_none()
    }

    pub async fn close(&self) {
        if let Some(pool) = &self.pool {
            pool.close().await;
        }
    }
}
