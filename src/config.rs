use std::path::{Path, PathBuf};

/// Bundle identifier; also the data directory name under the platform data dir.
pub const APP_IDENTIFIER: &str = "com.chrio.app";
pub const DB_FILE_NAME: &str = "chrio.db";
pub const DEFAULT_LOG_FILTER: &str = "chrio=info,sqlx=warn";

/// Overrides the data directory (tests and portable installs).
pub const ENV_DATA_DIR: &str = "CHRIO_DATA_DIR";
/// Overrides the database file, independent of the data directory.
pub const ENV_DB_PATH: &str = "CHRIO_DB";
pub const ENV_LOG: &str = "CHRIO_LOG";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    pub log_filter: String,
}

impl AppConfig {
    /// Resolve configuration from the environment, falling back to platform defaults.
    pub fn from_env() -> Self {
        Self::resolve(
            std::env::var_os(ENV_DATA_DIR).map(PathBuf::from),
            std::env::var_os(ENV_DB_PATH).map(PathBuf::from),
            std::env::var(ENV_LOG).ok(),
        )
    }

    /// Configuration rooted at an explicit data directory.
    pub fn with_data_dir(data_dir: impl AsRef<Path>) -> Self {
        Self::resolve(Some(data_dir.as_ref().to_path_buf()), None, None)
    }

    fn resolve(
        data_dir: Option<PathBuf>,
        db_path: Option<PathBuf>,
        log_filter: Option<String>,
    ) -> Self {
        let data_dir = data_dir.unwrap_or_else(default_data_dir);
        let db_path = db_path.unwrap_or_else(|| data_dir.join(DB_FILE_NAME));
        let log_filter = log_filter
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());
        Self {
            data_dir,
            db_path,
            log_filter,
        }
    }

    pub fn photos_dir(&self) -> PathBuf {
        self.data_dir.join("photos")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_IDENTIFIER)
}
