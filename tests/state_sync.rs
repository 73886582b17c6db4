use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::oneshot;

use chrio_lib::model::{
    Client, ClientInput, ClientUpdate, ImageKind, Session, SessionFields, SessionUpdate, Todo,
};
use chrio_lib::repo::{Gateway, SqliteGateway};
use chrio_lib::store::{ClientStore, SessionStore};
use chrio_lib::{AppError, AppResult, ErrorKind, SESSION_NOT_FOUND};

mod util;

struct Gate {
    started: oneshot::Sender<()>,
    release: oneshot::Receiver<()>,
}

/// Real gateway with a switchable outage and an optional pause inside the
/// next `list_clients` call.
struct TestGateway {
    inner: SqliteGateway,
    failing: AtomicBool,
    gate: Mutex<Option<Gate>>,
}

impl TestGateway {
    async fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: util::memory_gateway().await,
            failing: AtomicBool::new(false),
            gate: Mutex::new(None),
        })
    }

    fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn arm_gate(&self, started: oneshot::Sender<()>, release: oneshot::Receiver<()>) {
        *self.gate.lock().unwrap() = Some(Gate { started, release });
    }

    fn check(&self, operation: &'static str) -> AppResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AppError::storage_unavailable("simulated outage")
                .with_context("operation", operation));
        }
        Ok(())
    }
}

#[async_trait]
impl Gateway for TestGateway {
    async fn insert_client(&self, input: ClientInput) -> AppResult<i64> {
        self.check("insert_client")?;
        self.inner.insert_client(input).await
    }

    async fn list_clients(&self) -> AppResult<Vec<Client>> {
        self.check("list_clients")?;
        let result = self.inner.list_clients().await;
        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            let _ = gate.started.send(());
            let _ = gate.release.await;
        }
        result
    }

    async fn get_client(&self, id: i64) -> AppResult<Option<Client>> {
        self.check("get_client")?;
        self.inner.get_client(id).await
    }

    async fn update_client(&self, id: i64, update: ClientUpdate) -> AppResult<()> {
        self.check("update_client")?;
        self.inner.update_client(id, update).await
    }

    async fn insert_session(&self, client_id: i64, fields: SessionFields) -> AppResult<i64> {
        self.check("insert_session")?;
        self.inner.insert_session(client_id, fields).await
    }

    async fn list_sessions_for_client(&self, client_id: i64) -> AppResult<Vec<Session>> {
        self.check("list_sessions_for_client")?;
        self.inner.list_sessions_for_client(client_id).await
    }

    async fn get_session(&self, id: i64) -> AppResult<Option<Session>> {
        self.check("get_session")?;
        self.inner.get_session(id).await
    }

    async fn update_session(&self, id: i64, update: SessionUpdate) -> AppResult<()> {
        self.check("update_session")?;
        self.inner.update_session(id, update).await
    }

    async fn delete_session(&self, id: i64) -> AppResult<()> {
        self.check("delete_session")?;
        self.inner.delete_session(id).await
    }

    async fn next_session_number(&self, client_id: i64) -> AppResult<i64> {
        self.check("next_session_number")?;
        self.inner.next_session_number(client_id).await
    }

    async fn update_session_crop(&self, id: i64, kind: ImageKind, crop: String) -> AppResult<()> {
        self.check("update_session_crop")?;
        self.inner.update_session_crop(id, kind, crop).await
    }

    async fn insert_todo(&self, title: String) -> AppResult<i64> {
        self.check("insert_todo")?;
        self.inner.insert_todo(title).await
    }

    async fn list_todos(&self) -> AppResult<Vec<Todo>> {
        self.check("list_todos")?;
        self.inner.list_todos().await
    }

    async fn set_todo_completed(&self, id: i64, completed: bool) -> AppResult<()> {
        self.check("set_todo_completed")?;
        self.inner.set_todo_completed(id, completed).await
    }
}

#[tokio::test]
async fn failed_refresh_keeps_last_good_items() -> Result<()> {
    let gw = TestGateway::new().await;
    util::seed_client(&gw.inner, "Ana").await;
    util::seed_client(&gw.inner, "Rui").await;
    let store = ClientStore::new(gw.clone());

    store.refresh_clients().await?;
    let good = store.snapshot();
    assert_eq!(good.items.len(), 2);
    assert!(good.error.is_none());

    gw.set_failing(true);
    let err = store.refresh_clients().await.expect_err("outage");
    assert_eq!(err.kind(), ErrorKind::StorageUnavailable);

    let stale = store.snapshot();
    assert_eq!(stale.items, good.items);
    assert_eq!(stale.revision, good.revision);
    assert!(!stale.loading);
    assert_eq!(
        stale.error.as_ref().map(|e| e.kind()),
        Some(ErrorKind::StorageUnavailable)
    );

    gw.set_failing(false);
    store.refresh_clients().await?;
    assert!(store.snapshot().error.is_none());
    Ok(())
}

#[tokio::test]
async fn failed_write_flags_error_without_touching_items() -> Result<()> {
    let gw = TestGateway::new().await;
    let store = ClientStore::new(gw.clone());
    store.create_client(util::client("Ana")).await?;
    let before = store.snapshot();

    gw.set_failing(true);
    store
        .create_client(util::client("Rui"))
        .await
        .expect_err("write during outage");

    let after = store.snapshot();
    assert_eq!(after.items, before.items);
    assert!(after.has_error());

    gw.set_failing(false);
    assert_eq!(gw.inner.list_clients().await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn create_and_update_publish_fresh_lists() -> Result<()> {
    let gw = TestGateway::new().await;
    let store = ClientStore::new(gw.clone());
    let mut rx = store.subscribe();

    let id = store.create_client(util::client("Ana")).await?;
    assert!(rx.has_changed()?);
    let state = rx.borrow_and_update().clone();
    assert_eq!(state.items.len(), 1);
    assert_eq!(state.items[0].id, id);
    assert!(state.is_loaded());

    store
        .update_client_entry(
            id,
            ClientUpdate {
                firstname: Some("Anabela".into()),
                ..ClientUpdate::default()
            },
        )
        .await?;
    assert_eq!(
        store.cached(id).map(|c| c.firstname).as_deref(),
        Some("Anabela")
    );

    let err = store
        .update_client_entry(id + 100, ClientUpdate::default())
        .await
        .expect_err("missing client");
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(store.snapshot().items.len(), 1);
    Ok(())
}

#[tokio::test]
async fn older_refresh_result_is_discarded() -> Result<()> {
    let gw = TestGateway::new().await;
    util::seed_client(&gw.inner, "Ana").await;
    let store = Arc::new(ClientStore::new(gw.clone()));

    let (started_tx, started_rx) = oneshot::channel();
    let (release_tx, release_rx) = oneshot::channel();
    gw.arm_gate(started_tx, release_rx);

    let slow = tokio::spawn({
        let store = store.clone();
        async move { store.refresh_clients().await }
    });
    started_rx.await?;

    gw.inner.insert_client(util::client("Rui")).await?;
    store.refresh_clients().await?;
    assert_eq!(store.snapshot().items.len(), 2);
    assert!(store.snapshot().loading, "slow load still in flight");

    release_tx.send(()).expect("slow refresh is waiting");
    slow.await??;

    let state = store.snapshot();
    assert_eq!(state.items.len(), 2, "stale single-client list must not win");
    assert!(!state.loading);
    Ok(())
}

#[tokio::test]
async fn session_lists_are_kept_per_client() -> Result<()> {
    let gw = TestGateway::new().await;
    let ana = util::seed_client(&gw.inner, "Ana").await;
    let rui = util::seed_client(&gw.inner, "Rui").await;
    let store = SessionStore::new(gw.clone());

    let first = store
        .create_session(
            ana,
            SessionFields {
                weight: Some(70.0),
                ..SessionFields::default()
            },
        )
        .await?;
    store.create_session(rui, SessionFields::default()).await?;

    assert_eq!(store.snapshot(ana).items.len(), 1);
    assert_eq!(store.snapshot(rui).items.len(), 1);
    assert_eq!(store.visited_clients(), vec![ana, rui]);

    store
        .update_crop(ana, first, ImageKind::Posterior, "{\"w\":10}".into())
        .await?;
    assert_eq!(
        store.snapshot(ana).items[0].fields.posterior_crop.as_deref(),
        Some("{\"w\":10}")
    );

    store.delete_session_entry(ana, first).await?;
    assert!(store.snapshot(ana).items.is_empty());
    assert_eq!(store.snapshot(rui).items.len(), 1);
    Ok(())
}

#[tokio::test]
async fn orphan_session_error_lands_on_the_client_channel() -> Result<()> {
    let gw = TestGateway::new().await;
    let store = SessionStore::new(gw.clone());

    let err = store
        .create_session(4242, SessionFields::default())
        .await
        .expect_err("client does not exist");
    assert_eq!(err.kind(), ErrorKind::ValidationError);
    let state = store.snapshot(4242);
    assert!(state.has_error());
    assert!(state.items.is_empty());
    Ok(())
}

#[tokio::test]
async fn session_write_failure_keeps_cached_sessions() -> Result<()> {
    let gw = TestGateway::new().await;
    let ana = util::seed_client(&gw.inner, "Ana").await;
    let store = SessionStore::new(gw.clone());
    let id = store.create_session(ana, SessionFields::default()).await?;
    let before = store.snapshot(ana);

    gw.set_failing(true);
    let update: SessionUpdate = serde_json::from_str(r#"{"notes":"edited"}"#)?;
    store
        .update_session_entry(ana, id, update)
        .await
        .expect_err("outage");

    let after = store.snapshot(ana);
    assert_eq!(after.items, before.items);
    assert_eq!(
        after.error.as_ref().map(|e| e.kind()),
        Some(ErrorKind::StorageUnavailable)
    );
    Ok(())
}

#[tokio::test]
async fn session_write_through_another_client_is_rejected() -> Result<()> {
    let gw = TestGateway::new().await;
    let ana = util::seed_client(&gw.inner, "Ana").await;
    let rui = util::seed_client(&gw.inner, "Rui").await;
    let store = SessionStore::new(gw.clone());
    let rui_session = store.create_session(rui, SessionFields::default()).await?;
    store.refresh_sessions(ana).await?;
    let rui_before = store.snapshot(rui);

    let err = store
        .delete_session_entry(ana, rui_session)
        .await
        .expect_err("session belongs to rui");
    assert_eq!(err.code(), SESSION_NOT_FOUND);
    assert_eq!(
        err.context().get("owner_id").map(String::as_str),
        Some(rui.to_string().as_str())
    );

    let update: SessionUpdate = serde_json::from_str(r#"{"notes":"wrong client"}"#)?;
    store
        .update_session_entry(ana, rui_session, update)
        .await
        .expect_err("session belongs to rui");
    store
        .update_crop(ana, rui_session, ImageKind::Anterior, "{}".into())
        .await
        .expect_err("session belongs to rui");

    let stored = gw.inner.get_session(rui_session).await?.expect("row kept");
    assert_eq!(stored.fields.notes, None);
    assert_eq!(stored.fields.anterior_crop, None);
    assert_eq!(store.snapshot(rui), rui_before);
    assert!(store.snapshot(ana).has_error());
    Ok(())
}

#[tokio::test]
async fn missing_session_write_is_not_found() -> Result<()> {
    let gw = TestGateway::new().await;
    let ana = util::seed_client(&gw.inner, "Ana").await;
    let store = SessionStore::new(gw.clone());

    let err = store
        .delete_session_entry(ana, 777)
        .await
        .expect_err("no such session");
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(err.context().get("id").map(String::as_str), Some("777"));
    Ok(())
}

#[tokio::test]
async fn session_reads_go_through_the_store() -> Result<()> {
    let gw = TestGateway::new().await;
    let ana = util::seed_client(&gw.inner, "Ana").await;
    let store = SessionStore::new(gw.clone());
    assert_eq!(store.next_session_number(ana).await?, 1);
    let id = store.create_session(ana, SessionFields::default()).await?;
    assert_eq!(store.next_session_number(ana).await?, 2);

    let loaded = store.load_session(Some(ana), id).await?.expect("session exists");
    assert_eq!(loaded.client_id, ana);
    assert!(store.load_session(None, id + 50).await?.is_none());

    gw.set_failing(true);
    store
        .load_session(Some(ana), id)
        .await
        .expect_err("outage");
    assert!(store.snapshot(ana).has_error());
    assert_eq!(store.snapshot(ana).items.len(), 1);
    Ok(())
}

#[tokio::test]
async fn failed_client_read_is_published() -> Result<()> {
    let gw = TestGateway::new().await;
    let id = util::seed_client(&gw.inner, "Ana").await;
    let store = ClientStore::new(gw.clone());
    assert_eq!(
        store.load_client(id).await?.map(|c| c.firstname).as_deref(),
        Some("Ana")
    );

    gw.set_failing(true);
    store.load_client(id).await.expect_err("outage");
    assert_eq!(
        store.snapshot().error.as_ref().map(|e| e.kind()),
        Some(ErrorKind::StorageUnavailable)
    );
    Ok(())
}
