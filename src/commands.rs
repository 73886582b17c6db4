//! Command boundary: every operation as a call returning a two-variant
//! [`CommandOutcome`]. Client and session calls go through the caches on
//! [`AppState`] so a failed write also shows up in the list state.

use std::future::Future;
use std::path::PathBuf;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::{
    compare::SessionDiff,
    model::{Client, ClientInput, ClientUpdate, ImageKind, Session, SessionFields, SessionUpdate, Todo},
    photos,
    state::AppState,
    AppError, AppResult, ErrorKind,
};

/// `{"status":"ok","data":…}` or `{"status":"error","error":{…}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(tag = "status", rename_all = "lowercase")]
#[ts(export)]
pub enum CommandOutcome<T> {
    Ok { data: T },
    Error { error: AppError },
}

impl<T> CommandOutcome<T> {
    pub fn is_ok(&self) -> bool {
        matches!(self, CommandOutcome::Ok { .. })
    }

    pub fn into_result(self) -> AppResult<T> {
        match self {
            CommandOutcome::Ok { data } => Ok(data),
            CommandOutcome::Error { error } => Err(error),
        }
    }
}

impl<T> From<AppResult<T>> for CommandOutcome<T> {
    fn from(result: AppResult<T>) -> Self {
        match result {
            Ok(data) => CommandOutcome::Ok { data },
            Err(error) => CommandOutcome::Error { error },
        }
    }
}

fn log_command_error(cmd: &'static str, start: Instant, err: &AppError) {
    let elapsed_ms = start.elapsed().as_millis() as u64;
    match err.kind() {
        ErrorKind::ValidationError | ErrorKind::NotFound | ErrorKind::InvalidComparison => {
            tracing::warn!(
                target: "chrio",
                cmd,
                code = err.code(),
                message = err.message(),
                elapsed_ms,
                "ipc_failure"
            )
        }
        ErrorKind::StorageUnavailable | ErrorKind::Unknown => tracing::error!(
            target: "chrio",
            cmd,
            code = err.code(),
            message = err.message(),
            elapsed_ms,
            "ipc_failure"
        ),
    }
}

async fn run<T, Fut>(cmd: &'static str, fut: Fut) -> CommandOutcome<T>
where
    Fut: Future<Output = AppResult<T>>,
{
    tracing::debug!(target: "chrio", cmd, "ipc_enter");
    let start = Instant::now();
    let result = fut.await;
    match &result {
        Ok(_) => tracing::info!(
            target: "chrio",
            cmd,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "ipc_success"
        ),
        Err(err) => log_command_error(cmd, start, err),
    }
    result.into()
}

pub async fn get_clients(state: &AppState) -> CommandOutcome<Vec<Client>> {
    run("get_clients", async {
        state.clients.refresh_clients().await?;
        Ok(state.clients.snapshot().items)
    })
    .await
}

pub async fn get_client(state: &AppState, id: i64) -> CommandOutcome<Client> {
    run("get_client", async {
        state.clients.load_client(id).await?.ok_or_else(|| {
            AppError::new(crate::error::CLIENT_NOT_FOUND, "Client not found.")
                .with_context("id", id.to_string())
        })
    })
    .await
}

pub async fn add_client(state: &AppState, client: ClientInput) -> CommandOutcome<i64> {
    run("add_client", state.clients.create_client(client)).await
}

pub async fn update_client(state: &AppState, id: i64, client: ClientUpdate) -> CommandOutcome<()> {
    run("update_client", state.clients.update_client_entry(id, client)).await
}

pub async fn get_client_sessions(
    state: &AppState,
    client_id: i64,
) -> CommandOutcome<Vec<Session>> {
    run("get_client_sessions", async {
        state.sessions.refresh_sessions(client_id).await?;
        Ok(state.sessions.snapshot(client_id).items)
    })
    .await
}

pub async fn get_session(
    state: &AppState,
    client_id: Option<i64>,
    id: i64,
) -> CommandOutcome<Session> {
    run("get_session", async {
        state.sessions.load_session(client_id, id).await?.ok_or_else(|| {
            AppError::new(crate::error::SESSION_NOT_FOUND, "Session not found.")
                .with_context("id", id.to_string())
        })
    })
    .await
}

pub async fn add_session(
    state: &AppState,
    client_id: i64,
    session: SessionFields,
) -> CommandOutcome<i64> {
    run("add_session", state.sessions.create_session(client_id, session)).await
}

pub async fn update_session(
    state: &AppState,
    client_id: i64,
    id: i64,
    session: SessionUpdate,
) -> CommandOutcome<()> {
    run(
        "update_session",
        state.sessions.update_session_entry(client_id, id, session),
    )
    .await
}

pub async fn delete_session(state: &AppState, client_id: i64, id: i64) -> CommandOutcome<()> {
    run("delete_session", state.sessions.delete_session_entry(client_id, id)).await
}

pub async fn get_next_session_number(state: &AppState, client_id: i64) -> CommandOutcome<i64> {
    run(
        "get_next_session_number",
        state.sessions.next_session_number(client_id),
    )
    .await
}

pub async fn update_session_crop(
    state: &AppState,
    client_id: i64,
    session_id: i64,
    image_type: &str,
    crop_data: String,
) -> CommandOutcome<()> {
    run("update_session_crop", async {
        let kind: ImageKind = image_type.parse()?;
        state
            .sessions
            .update_crop(client_id, session_id, kind, crop_data)
            .await
    })
    .await
}

pub async fn compare_sessions(
    state: &AppState,
    client_id: i64,
    session_a: i64,
    session_b: i64,
) -> CommandOutcome<SessionDiff> {
    run(
        "compare_sessions",
        state.sessions.compare(client_id, session_a, session_b),
    )
    .await
}

pub async fn get_todos(state: &AppState) -> CommandOutcome<Vec<Todo>> {
    run("get_todos", state.gateway.list_todos()).await
}

pub async fn add_todo(state: &AppState, title: String) -> CommandOutcome<i64> {
    run("add_todo", state.gateway.insert_todo(title)).await
}

pub async fn set_todo_completed(state: &AppState, id: i64, completed: bool) -> CommandOutcome<()> {
    run("set_todo_completed", state.gateway.set_todo_completed(id, completed)).await
}

/// Payload for storing a session photograph.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SaveImageRequest {
    #[ts(type = "number")]
    pub client_id: i64,
    pub client_firstname: String,
    #[ts(type = "number")]
    pub session_no: i64,
    pub image_type: ImageKind,
    pub base64_image: String,
}

pub async fn save_image(state: &AppState, request: SaveImageRequest) -> CommandOutcome<String> {
    let photos_dir = state.config.photos_dir();
    run("save_image", async move {
        photos::save_image(
            &photos_dir,
            request.client_id,
            &request.client_firstname,
            request.session_no,
            request.image_type,
            &request.base64_image,
        )
        .map(|path| path.to_string_lossy().to_string())
    })
    .await
}

pub async fn read_image_base64(state: &AppState, path: String) -> CommandOutcome<String> {
    let photos_dir = state.config.photos_dir();
    run("read_image_base64", async move {
        photos::read_image_base64(&photos_dir, &PathBuf::from(path))
    })
    .await
}
