//! Persistence and sync layer for the Chrio client/session tracker.
//!
//! The CLI in `main.rs` and the optional desktop shell both build an
//! [`state::AppState`] and talk to the store only through [`repo::Gateway`].

pub mod commands;
pub mod compare;
pub mod config;
pub mod db;
mod error;
#[cfg(feature = "desktop")]
mod ipc;
pub mod logging;
pub mod model;
pub mod photos;
pub mod repo;
pub mod schema;
pub mod state;
pub mod store;

pub use error::{
    AppError, AppResult, ErrorKind, CLIENT_NOT_FOUND, COMPARE_INVALID, SESSION_NOT_FOUND,
    STORAGE_UNAVAILABLE, TODO_NOT_FOUND, VALIDATION_CLIENT_MISSING, VALIDATION_DATE,
    VALIDATION_FOREIGN_KEY, VALIDATION_IMAGE, VALIDATION_MEASUREMENT, VALIDATION_REQUIRED,
    VALIDATION_SEX,
};
pub use logging::init_logging;

#[cfg(feature = "desktop")]
pub use ipc::run;
