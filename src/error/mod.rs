use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;

use anyhow::Error as AnyhowError;
use serde::{Deserialize, Serialize};
use sqlx::Error as SqlxError;
use std::io::Error as IoError;
use thiserror::Error;
use ts_rs::TS;

/// Store could not be opened or initialised.
pub const STORAGE_UNAVAILABLE: &str = "STORAGE/UNAVAILABLE";
pub const CLIENT_NOT_FOUND: &str = "CLIENT/NOT_FOUND";
pub const SESSION_NOT_FOUND: &str = "SESSION/NOT_FOUND";
pub const TODO_NOT_FOUND: &str = "TODO/NOT_FOUND";
/// Session insert referenced a client that does not exist.
pub const VALIDATION_CLIENT_MISSING: &str = "VALIDATION/CLIENT_NOT_FOUND";
pub const VALIDATION_REQUIRED: &str = "VALIDATION/REQUIRED";
pub const VALIDATION_DATE: &str = "VALIDATION/DATE";
pub const VALIDATION_SEX: &str = "VALIDATION/SEX";
pub const VALIDATION_MEASUREMENT: &str = "VALIDATION/MEASUREMENT";
pub const VALIDATION_IMAGE: &str = "VALIDATION/IMAGE";
pub const VALIDATION_FOREIGN_KEY: &str = "VALIDATION/FOREIGN_KEY";
pub const COMPARE_INVALID: &str = "COMPARE/INVALID";

/// Coarse error taxonomy the UI branches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ErrorKind {
    #[error("storage unavailable")]
    StorageUnavailable,
    #[error("not found")]
    NotFound,
    #[error("validation error")]
    ValidationError,
    #[error("invalid comparison")]
    InvalidComparison,
    #[error("unknown error")]
    Unknown,
}

/// A structured application error that can be serialized and surfaced to the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct AppError {
    /// Machine readable error code.
    pub code: String,
    /// Human friendly message that can be shown directly to the user.
    pub message: String,
    /// Arbitrary key/value pairs that provide additional context.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    #[ts(optional, as = "Option<HashMap<String, String>>")]
    pub context: HashMap<String, String>,
    /// Optional nested cause that preserves the error chain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub cause: Option<Box<AppError>>,
}

pub type AppResult<T> = std::result::Result<T, AppError>;

impl AppError {
    /// Default code used when an upstream error does not expose a specific code.
    pub const UNKNOWN_CODE: &'static str = "APP/UNKNOWN";
    /// Code used for errors created from free-form messages.
    pub const GENERIC_CODE: &'static str = "APP/GENERIC";

    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        AppError {
            code: code.into(),
            message: message.into(),
            context: HashMap::new(),
            cause: None,
        }
    }

    pub fn storage_unavailable(message: impl Into<String>) -> Self {
        AppError::new(STORAGE_UNAVAILABLE, message)
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn context(&self) -> &HashMap<String, String> {
        &self.context
    }

    pub fn cause(&self) -> Option<&AppError> {
        self.cause.as_deref()
    }

    /// Classify the error code into the coarse taxonomy.
    pub fn kind(&self) -> ErrorKind {
        let code = self.code.as_str();
        if code == STORAGE_UNAVAILABLE {
            ErrorKind::StorageUnavailable
        } else if code == COMPARE_INVALID {
            ErrorKind::InvalidComparison
        } else if code.starts_with("VALIDATION/") {
            ErrorKind::ValidationError
        } else if code.ends_with("/NOT_FOUND") || code == "SQLX/ROW_NOT_FOUND" {
            ErrorKind::NotFound
        } else {
            ErrorKind::Unknown
        }
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn with_cause(mut self, cause: impl Into<AppError>) -> Self {
        self.cause = Some(Box::new(cause.into()));
        self
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.context.is_empty() {
            write!(f, "[{}] {}", self.code, self.message)
        } else {
            write!(f, "[{}] {} ({:?})", self.code, self.message, self.context)
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn std::error::Error + 'static))
    }
}

impl From<&str> for AppError {
    fn from(message: &str) -> Self {
        AppError::new(AppError::GENERIC_CODE, message)
    }
}

impl From<String> for AppError {
    fn from(message: String) -> Self {
        AppError::new(AppError::GENERIC_CODE, message)
    }
}

impl From<AnyhowError> for AppError {
    fn from(error: AnyhowError) -> Self {
        fn convert(err: &(dyn StdError + 'static)) -> AppError {
            if let Some(app) = err.downcast_ref::<AppError>() {
                return app.clone();
            }

            let mut root = AppError::new(AppError::UNKNOWN_CODE, err.to_string());
            if let Some(source) = err.source() {
                root.cause = Some(Box::new(convert(source)));
            }
            root
        }

        convert(error.as_ref())
    }
}

impl From<IoError> for AppError {
    fn from(error: IoError) -> Self {
        let code = format!("IO/{:?}", error.kind());
        let mut app_error = AppError::new(code, error.to_string());
        if let Some(os_code) = error.raw_os_error() {
            app_error = app_error.with_context("os_code", os_code.to_string());
        }
        app_error
    }
}

impl From<SqlxError> for AppError {
    fn from(error: SqlxError) -> Self {
        match error {
            SqlxError::RowNotFound => AppError::new("SQLX/ROW_NOT_FOUND", "Record not found"),
            SqlxError::ColumnNotFound(name) => {
                AppError::new("SQLX/COLUMN_NOT_FOUND", format!("Column not found: {name}"))
            }
            SqlxError::PoolTimedOut => AppError::new(
                STORAGE_UNAVAILABLE,
                "Timed out acquiring a database connection",
            ),
            SqlxError::PoolClosed => AppError::new(STORAGE_UNAVAILABLE, "Database pool is closed"),
            SqlxError::Io(err) => AppError::new(STORAGE_UNAVAILABLE, err.to_string())
                .with_cause(AppError::from(err))
                .with_context("source", "sqlx"),
            SqlxError::Database(db) => {
                // SQLITE_CONSTRAINT_FOREIGNKEY
                if db.code().as_deref() == Some("787") {
                    return AppError::new(
                        VALIDATION_FOREIGN_KEY,
                        "Referenced record does not exist",
                    );
                }
                let code = db
                    .code()
                    .map(|code| format!("Sqlite/{code}"))
                    .unwrap_or_else(|| "SQLX/DATABASE".to_string());
                let mut app_error = AppError::new(code, db.message().to_string());
                if let Some(constraint) = db.constraint() {
                    app_error = app_error.with_context("constraint", constraint.to_string());
                }
                app_error
            }
            SqlxError::ColumnDecode { index, source } => {
                AppError::new("SQLX/COLUMN_DECODE", source.to_string())
                    .with_context("column_index", index.to_string())
            }
            SqlxError::Decode(decode_err) => AppError::new("SQLX/DECODE", decode_err.to_string()),
            other => AppError::new("SQLX/ERROR", other.to_string()),
        }
    }
}
