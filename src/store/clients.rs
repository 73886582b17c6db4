use std::sync::Arc;

use tokio::sync::watch;

use super::{ListChannel, ListState};
use crate::{
    model::{Client, ClientInput, ClientUpdate},
    repo::Gateway,
    AppResult,
};

/// Cached client list, refreshed from the gateway after every write.
pub struct ClientStore {
    gateway: Arc<dyn Gateway>,
    channel: ListChannel<Client>,
}

impl ClientStore {
    pub fn new(gateway: Arc<dyn Gateway>) -> Self {
        Self {
            gateway,
            channel: ListChannel::new("clients"),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ListState<Client>> {
        self.channel.subscribe()
    }

    pub fn snapshot(&self) -> ListState<Client> {
        self.channel.snapshot()
    }

    /// Cached client by id, without touching the store.
    pub fn cached(&self, id: i64) -> Option<Client> {
        self.channel
            .snapshot()
            .items
            .into_iter()
            .find(|client| client.id == id)
    }

    /// Reload the full list. On failure the previous items stay visible and
    /// the error is published alongside them.
    pub async fn refresh_clients(&self) -> AppResult<()> {
        let seq = self.channel.begin_load();
        let outcome = self.gateway.list_clients().await;
        self.channel.finish_load(seq, &outcome);
        outcome.map(|_| ())
    }

    /// Fetch one client for editing. A failed read is published on the list.
    pub async fn load_client(&self, id: i64) -> AppResult<Option<Client>> {
        let result = self.gateway.get_client(id).await;
        if let Err(err) = &result {
            self.channel.record_error(&err.clone().with_context("id", id.to_string()));
        }
        result
    }

    pub async fn create_client(&self, input: ClientInput) -> AppResult<i64> {
        match self.gateway.insert_client(input).await {
            Ok(id) => {
                tracing::info!(target: "chrio", event = "client_created", id);
                // The row exists even if the reload fails; the error flag covers that.
                let _ = self.refresh_clients().await;
                Ok(id)
            }
            Err(err) => {
                self.channel.record_error(&err);
                Err(err)
            }
        }
    }

    pub async fn update_client_entry(&self, id: i64, update: ClientUpdate) -> AppResult<()> {
        match self.gateway.update_client(id, update).await {
            Ok(()) => {
                tracing::info!(target: "chrio", event = "client_updated", id);
                let _ = self.refresh_clients().await;
                Ok(())
            }
            Err(err) => {
                self.channel.record_error(&err.clone().with_context("id", id.to_string()));
                Err(err)
            }
        }
    }
}
