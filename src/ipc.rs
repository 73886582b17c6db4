//! Desktop shell: Tauri command handlers over [`AppState`] plus change events.

use serde::Serialize;
use tauri::{AppHandle, Emitter, Manager, State};

use crate::{
    commands::{self, CommandOutcome, SaveImageRequest},
    compare::SessionDiff,
    config::AppConfig,
    model::{Client, ClientInput, ClientUpdate, Session, SessionFields, SessionUpdate, Todo},
    state::AppState,
    store::ListState,
    AppError,
};

pub const CLIENTS_CHANGED: &str = "clients://changed";
pub const SESSIONS_CHANGED: &str = "sessions://changed";

type Reply<T> = Result<CommandOutcome<T>, AppError>;

#[derive(Debug, Clone, Serialize)]
struct SessionsChanged {
    client_id: i64,
    state: ListState<Session>,
}

/// Publish a client's session list after the store has refreshed or flagged it.
fn emit_sessions(app: &AppHandle, state: &AppState, client_id: i64) {
    let payload = SessionsChanged {
        client_id,
        state: state.sessions.snapshot(client_id),
    };
    if let Err(err) = app.emit(SESSIONS_CHANGED, payload) {
        tracing::warn!(target: "chrio", event = "emit_failed", channel = SESSIONS_CHANGED, error = %err);
    }
}

#[tauri::command]
async fn get_clients(state: State<'_, AppState>) -> Reply<Vec<Client>> {
    Ok(commands::get_clients(&state).await)
}

#[tauri::command]
async fn get_client(state: State<'_, AppState>, id: i64) -> Reply<Client> {
    Ok(commands::get_client(&state, id).await)
}

#[tauri::command]
async fn add_client(state: State<'_, AppState>, client: ClientInput) -> Reply<i64> {
    Ok(commands::add_client(&state, client).await)
}

#[tauri::command]
async fn update_client(state: State<'_, AppState>, id: i64, client: ClientUpdate) -> Reply<()> {
    Ok(commands::update_client(&state, id, client).await)
}

#[tauri::command]
async fn get_client_sessions(
    app: AppHandle,
    state: State<'_, AppState>,
    client_id: i64,
) -> Reply<Vec<Session>> {
    let outcome = commands::get_client_sessions(&state, client_id).await;
    emit_sessions(&app, &state, client_id);
    Ok(outcome)
}

#[tauri::command]
async fn get_session(
    state: State<'_, AppState>,
    client_id: Option<i64>,
    id: i64,
) -> Reply<Session> {
    Ok(commands::get_session(&state, client_id, id).await)
}

#[tauri::command]
async fn add_session(
    app: AppHandle,
    state: State<'_, AppState>,
    client_id: i64,
    session: SessionFields,
) -> Reply<i64> {
    let outcome = commands::add_session(&state, client_id, session).await;
    emit_sessions(&app, &state, client_id);
    Ok(outcome)
}

#[tauri::command]
async fn update_session(
    app: AppHandle,
    state: State<'_, AppState>,
    client_id: i64,
    id: i64,
    session: SessionUpdate,
) -> Reply<()> {
    let outcome = commands::update_session(&state, client_id, id, session).await;
    emit_sessions(&app, &state, client_id);
    Ok(outcome)
}

#[tauri::command]
async fn delete_session(
    app: AppHandle,
    state: State<'_, AppState>,
    client_id: i64,
    id: i64,
) -> Reply<()> {
    let outcome = commands::delete_session(&state, client_id, id).await;
    emit_sessions(&app, &state, client_id);
    Ok(outcome)
}

#[tauri::command]
async fn get_next_session_number(state: State<'_, AppState>, client_id: i64) -> Reply<i64> {
    Ok(commands::get_next_session_number(&state, client_id).await)
}

#[tauri::command]
async fn update_session_crop(
    app: AppHandle,
    state: State<'_, AppState>,
    client_id: i64,
    session_id: i64,
    image_type: String,
    crop_data: String,
) -> Reply<()> {
    let outcome =
        commands::update_session_crop(&state, client_id, session_id, &image_type, crop_data).await;
    emit_sessions(&app, &state, client_id);
    Ok(outcome)
}

#[tauri::command]
async fn compare_sessions(
    state: State<'_, AppState>,
    client_id: i64,
    session_a: i64,
    session_b: i64,
) -> Reply<SessionDiff> {
    Ok(commands::compare_sessions(&state, client_id, session_a, session_b).await)
}

#[tauri::command]
async fn save_image(state: State<'_, AppState>, request: SaveImageRequest) -> Reply<String> {
    Ok(commands::save_image(&state, request).await)
}

#[tauri::command]
async fn read_image_base64(state: State<'_, AppState>, path: String) -> Reply<String> {
    Ok(commands::read_image_base64(&state, path).await)
}

#[tauri::command]
async fn get_todos(state: State<'_, AppState>) -> Reply<Vec<Todo>> {
    Ok(commands::get_todos(&state).await)
}

#[tauri::command]
async fn add_todo(state: State<'_, AppState>, title: String) -> Reply<i64> {
    Ok(commands::add_todo(&state, title).await)
}

#[tauri::command]
async fn set_todo_completed(state: State<'_, AppState>, id: i64, completed: bool) -> Reply<()> {
    Ok(commands::set_todo_completed(&state, id, completed).await)
}

/// Push every client-list change to the webview.
fn forward_client_changes(app: AppHandle, state: &AppState) {
    let mut rx = state.clients.subscribe();
    tauri::async_runtime::spawn(async move {
        while rx.changed().await.is_ok() {
            let snapshot = rx.borrow_and_update().clone();
            if let Err(err) = app.emit(CLIENTS_CHANGED, snapshot) {
                tracing::warn!(target: "chrio", event = "emit_failed", channel = CLIENTS_CHANGED, error = %err);
            }
        }
    });
}

pub fn run() {
    let config = AppConfig::from_env();
    if let Err(err) = crate::logging::init_with_file_sink(&config) {
        eprintln!("file logging unavailable: {err:#}");
        if let Err(err) = crate::logging::init_logging() {
            eprintln!("logging unavailable: {err:#}");
        }
    }

    let result = tauri::Builder::default()
        .plugin(tauri_plugin_opener::init())
        .setup(move |app| {
            let state = tauri::async_runtime::block_on(AppState::initialize(config.clone()));
            forward_client_changes(app.handle().clone(), &state);
            let initial = state.clone();
            tauri::async_runtime::spawn(async move {
                let _ = initial.clients.refresh_clients().await;
            });
            app.manage(state);
            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            get_clients,
            get_client,
            add_client,
            update_client,
            get_client_sessions,
            get_session,
            add_session,
            update_session,
            delete_session,
            get_next_session_number,
            update_session_crop,
            compare_sessions,
            save_image,
            read_image_base64,
            get_todos,
            add_todo,
            set_todo_completed,
        ])
        .run(tauri::generate_context!());

    if let Err(err) = result {
        tracing::error!(target: "chrio", event = "desktop_exit", error = %err);
    }
}
