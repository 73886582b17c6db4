use anyhow::Result;
use base64::{engine::general_purpose, Engine as _};
use chrio_lib::commands::{self, SaveImageRequest};
use chrio_lib::model::{ClientInput, ClientUpdate, ImageKind, SessionFields, Sex};
use chrio_lib::repo::Gateway;
use chrio_lib::{ErrorKind, SESSION_NOT_FOUND, VALIDATION_IMAGE};
use serde_json::json;

mod util;

#[tokio::test]
async fn successful_command_serializes_as_ok() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let state = util::memory_state(dir.path()).await;
    let outcome = commands::add_client(
        &state,
        ClientInput::new("Ana", "Silva", "1990-04-02", Sex::Female),
    )
    .await;
    let value = serde_json::to_value(&outcome)?;
    assert_eq!(value, json!({"status": "ok", "data": 1}));
    assert_eq!(state.clients.snapshot().items.len(), 1);

    let listed = serde_json::to_value(commands::get_clients(&state).await)?;
    assert_eq!(listed["status"], "ok");
    assert_eq!(listed["data"][0]["firstname"], "Ana");
    assert_eq!(listed["data"][0]["sex"], "F");
    Ok(())
}

#[tokio::test]
async fn failed_command_carries_code_and_message() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let state = util::memory_state(dir.path()).await;
    let outcome = commands::add_session(&state, 99, SessionFields::default()).await;
    assert!(!outcome.is_ok());

    let value = serde_json::to_value(&outcome)?;
    assert_eq!(value["status"], "error");
    assert_eq!(value["error"]["code"], "VALIDATION/CLIENT_NOT_FOUND");
    assert!(value["error"]["message"].as_str().is_some_and(|m| !m.is_empty()));
    assert!(value.get("data").is_none());
    Ok(())
}

#[tokio::test]
async fn failed_write_command_flags_list_state() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let state = util::memory_state(dir.path()).await;
    let id = commands::add_client(&state, util::client("Ana"))
        .await
        .into_result()?;
    let before = state.clients.snapshot();
    assert!(before.error.is_none());

    let outcome = commands::update_client(
        &state,
        id + 10,
        ClientUpdate {
            firstname: Some("Nobody".into()),
            ..ClientUpdate::default()
        },
    )
    .await;
    assert_eq!(outcome.into_result().unwrap_err().kind(), ErrorKind::NotFound);

    let after = state.clients.snapshot();
    assert_eq!(after.items, before.items);
    assert_eq!(
        after.error.as_ref().map(|e| e.kind()),
        Some(ErrorKind::NotFound)
    );

    let bad = commands::add_session(&state, id, SessionFields {
        weight: Some(-3.0),
        ..SessionFields::default()
    })
    .await;
    assert!(!bad.is_ok());
    assert!(state.sessions.snapshot(id).has_error());
    Ok(())
}

#[tokio::test]
async fn session_commands_keep_owner_cache_fresh() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let state = util::memory_state(dir.path()).await;
    let ana = util::seed_client(state.gateway.as_ref(), "Ana").await;
    let rui = util::seed_client(state.gateway.as_ref(), "Rui").await;

    assert_eq!(
        commands::get_next_session_number(&state, ana).await.into_result()?,
        1
    );
    let id = commands::add_session(&state, ana, SessionFields::default())
        .await
        .into_result()?;
    assert_eq!(state.sessions.snapshot(ana).items.len(), 1);
    assert_eq!(
        commands::get_next_session_number(&state, ana).await.into_result()?,
        2
    );

    let err = commands::delete_session(&state, rui, id)
        .await
        .into_result()
        .unwrap_err();
    assert_eq!(err.code(), SESSION_NOT_FOUND);
    assert!(state.gateway.get_session(id).await?.is_some());

    let loaded = commands::get_session(&state, Some(ana), id).await.into_result()?;
    assert_eq!(loaded.client_id, ana);

    commands::delete_session(&state, ana, id).await.into_result()?;
    assert!(state.sessions.snapshot(ana).items.is_empty());
    let missing = commands::get_session(&state, None, id).await.into_result();
    assert_eq!(missing.unwrap_err().kind(), ErrorKind::NotFound);
    Ok(())
}

#[tokio::test]
async fn unknown_image_type_is_a_validation_error() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let state = util::memory_state(dir.path()).await;
    let client = util::seed_client(state.gateway.as_ref(), "Ana").await;
    let id = commands::add_session(&state, client, SessionFields::default())
        .await
        .into_result()?;

    let outcome = commands::update_session_crop(&state, client, id, "dorsal", "{}".into()).await;
    let err = outcome.into_result().expect_err("unknown image type");
    assert_eq!(err.kind(), ErrorKind::ValidationError);

    commands::update_session_crop(&state, client, id, "right_lateral", "{}".into())
        .await
        .into_result()?;
    let session = commands::get_session(&state, Some(client), id)
        .await
        .into_result()?;
    assert_eq!(session.fields.right_lateral_crop.as_deref(), Some("{}"));
    assert_eq!(
        state.sessions.snapshot(client).items[0]
            .fields
            .right_lateral_crop
            .as_deref(),
        Some("{}")
    );
    Ok(())
}

#[tokio::test]
async fn image_reads_are_confined_to_photos_dir() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let state = util::memory_state(dir.path()).await;
    let encoded = general_purpose::STANDARD.encode(b"jpeg");
    let saved = commands::save_image(
        &state,
        SaveImageRequest {
            client_id: 1,
            client_firstname: "Ana".into(),
            session_no: 1,
            image_type: ImageKind::Anterior,
            base64_image: encoded.clone(),
        },
    )
    .await
    .into_result()?;

    let url = commands::read_image_base64(&state, saved).await.into_result()?;
    assert!(url.ends_with(&encoded));

    let outside = dir.path().join("outside.jpg");
    std::fs::write(&outside, b"jpeg")?;
    let err = commands::read_image_base64(&state, outside.to_string_lossy().into_owned())
        .await
        .into_result()
        .unwrap_err();
    assert_eq!(err.code(), VALIDATION_IMAGE);
    Ok(())
}
