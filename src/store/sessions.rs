use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;

use super::{ListChannel, ListState};
use crate::{
    compare::{self, SessionDiff},
    error::SESSION_NOT_FOUND,
    model::{ImageKind, Session, SessionFields, SessionUpdate},
    repo::Gateway,
    AppError, AppResult,
};

/// Per-client session caches. A client's channel is created on first visit.
pub struct SessionStore {
    gateway: Arc<dyn Gateway>,
    channels: Mutex<HashMap<i64, Arc<ListChannel<Session>>>>,
}

impl SessionStore {
    pub fn new(gateway: Arc<dyn Gateway>) -> Self {
        Self {
            gateway,
            channels: Mutex::new(HashMap::new()),
        }
    }

    fn channel(&self, client_id: i64) -> Arc<ListChannel<Session>> {
        let mut guard = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        guard
            .entry(client_id)
            .or_insert_with(|| Arc::new(ListChannel::new("sessions")))
            .clone()
    }

    pub fn subscribe(&self, client_id: i64) -> watch::Receiver<ListState<Session>> {
        self.channel(client_id).subscribe()
    }

    pub fn snapshot(&self, client_id: i64) -> ListState<Session> {
        self.channel(client_id).snapshot()
    }

    /// Clients whose sessions have been visited so far.
    pub fn visited_clients(&self) -> Vec<i64> {
        let guard = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<i64> = guard.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub async fn refresh_sessions(&self, client_id: i64) -> AppResult<()> {
        let channel = self.channel(client_id);
        let seq = channel.begin_load();
        let outcome = self.gateway.list_sessions_for_client(client_id).await;
        channel.finish_load(seq, &outcome);
        outcome.map(|_| ())
    }

    pub async fn create_session(&self, client_id: i64, fields: SessionFields) -> AppResult<i64> {
        match self.gateway.insert_session(client_id, fields).await {
            Ok(id) => {
                tracing::info!(target: "chrio", event = "session_created", id, client_id);
                let _ = self.refresh_sessions(client_id).await;
                Ok(id)
            }
            Err(err) => {
                self.channel(client_id).record_error(&err);
                Err(err)
            }
        }
    }

    pub async fn update_session_entry(
        &self,
        client_id: i64,
        id: i64,
        update: SessionUpdate,
    ) -> AppResult<()> {
        let result = async {
            self.ensure_owned(client_id, id).await?;
            self.gateway.update_session(id, update).await
        }
        .await;
        self.after_write(client_id, id, "session_updated", result).await
    }

    pub async fn delete_session_entry(&self, client_id: i64, id: i64) -> AppResult<()> {
        let result = async {
            self.ensure_owned(client_id, id).await?;
            self.gateway.delete_session(id).await
        }
        .await;
        self.after_write(client_id, id, "session_deleted", result).await
    }

    pub async fn update_crop(
        &self,
        client_id: i64,
        id: i64,
        kind: ImageKind,
        crop: String,
    ) -> AppResult<()> {
        let result = async {
            self.ensure_owned(client_id, id).await?;
            self.gateway.update_session_crop(id, kind, crop).await
        }
        .await;
        self.after_write(client_id, id, "session_crop_updated", result)
            .await
    }

    /// A session owned by another client is reported as missing for this one.
    async fn ensure_owned(&self, client_id: i64, id: i64) -> AppResult<()> {
        match self.gateway.get_session(id).await? {
            Some(session) if session.client_id == client_id => Ok(()),
            Some(session) => Err(AppError::new(
                SESSION_NOT_FOUND,
                "Session does not belong to this client.",
            )
            .with_context("id", id.to_string())
            .with_context("client_id", client_id.to_string())
            .with_context("owner_id", session.client_id.to_string())),
            None => Err(AppError::new(SESSION_NOT_FOUND, "Session not found.")
                .with_context("id", id.to_string())),
        }
    }

    async fn after_write(
        &self,
        client_id: i64,
        id: i64,
        event: &'static str,
        result: AppResult<()>,
    ) -> AppResult<()> {
        match result {
            Ok(()) => {
                tracing::info!(target: "chrio", event, id, client_id);
                let _ = self.refresh_sessions(client_id).await;
                Ok(())
            }
            Err(err) => {
                let err = if err.context().contains_key("id") {
                    err
                } else {
                    err.with_context("id", id.to_string())
                };
                self.channel(client_id).record_error(&err);
                Err(err)
            }
        }
    }

    /// Fetch one session for editing. Failures are published on the owning
    /// client's list when `client_id` is known.
    pub async fn load_session(&self, client_id: Option<i64>, id: i64) -> AppResult<Option<Session>> {
        let result = self.gateway.get_session(id).await;
        if let (Err(err), Some(client_id)) = (&result, client_id) {
            self.channel(client_id).record_error(err);
        }
        result
    }

    pub async fn next_session_number(&self, client_id: i64) -> AppResult<i64> {
        self.gateway.next_session_number(client_id).await
    }

    pub async fn compare(
        &self,
        client_id: i64,
        session_a: i64,
        session_b: i64,
    ) -> AppResult<SessionDiff> {
        compare::compare(self.gateway.as_ref(), client_id, session_a, session_b).await
    }
}
