//! Persistence gateway: the only place SQL text lives.
//!
//! Every value is bound as a parameter. Column names that vary at runtime
//! (crop columns) come from closed enums, never from caller strings.

use async_trait::async_trait;
use futures::FutureExt;
use sqlx::{sqlite::SqliteRow, SqlitePool};
use tracing::debug;

use crate::{
    db::run_in_tx,
    error::{CLIENT_NOT_FOUND, SESSION_NOT_FOUND, TODO_NOT_FOUND, VALIDATION_CLIENT_MISSING},
    model::{
        normalize_timestamp, now_iso, require_text, Client, ClientInput, ClientUpdate, ImageKind,
        Session, SessionFields, SessionUpdate, Todo,
    },
    AppError, AppResult,
};

const CLIENT_COLUMNS: &str = "id, firstname, lastname, dob, sex, registration_date";
const SESSION_COLUMNS: &str = "id, client_id, datetime, session_number, height, weight, \
     anterior, posterior, right_lateral, left_lateral, notes, \
     anterior_crop, posterior_crop, right_lateral_crop, left_lateral_crop";

/// Typed CRUD over the embedded store.
///
/// Object safe so the state layer can hold an `Arc<dyn Gateway>` and tests can
/// substitute failing doubles.
#[async_trait]
pub trait Gateway: Send + Sync {
    async fn insert_client(&self, input: ClientInput) -> AppResult<i64>;
    async fn list_clients(&self) -> AppResult<Vec<Client>>;
    async fn get_client(&self, id: i64) -> AppResult<Option<Client>>;
    async fn update_client(&self, id: i64, update: ClientUpdate) -> AppResult<()>;

    async fn insert_session(&self, client_id: i64, fields: SessionFields) -> AppResult<i64>;
    async fn list_sessions_for_client(&self, client_id: i64) -> AppResult<Vec<Session>>;
    async fn get_session(&self, id: i64) -> AppResult<Option<Session>>;
    async fn update_session(&self, id: i64, update: SessionUpdate) -> AppResult<()>;
    async fn delete_session(&self, id: i64) -> AppResult<()>;
    async fn next_session_number(&self, client_id: i64) -> AppResult<i64>;
    async fn update_session_crop(&self, id: i64, kind: ImageKind, crop: String) -> AppResult<()>;

    async fn insert_todo(&self, title: String) -> AppResult<i64>;
    async fn list_todos(&self) -> AppResult<Vec<Todo>>;
    async fn set_todo_completed(&self, id: i64, completed: bool) -> AppResult<()>;
}

#[derive(Clone)]
pub struct SqliteGateway {
    pool: SqlitePool,
}

impl SqliteGateway {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn decode_all<T>(rows: Vec<SqliteRow>) -> AppResult<Vec<T>>
where
    T: for<'r> TryFrom<&'r SqliteRow, Error = AppError>,
{
    rows.iter().map(T::try_from).collect()
}

fn client_not_found(id: i64) -> AppError {
    AppError::new(CLIENT_NOT_FOUND, "Client not found.").with_context("id", id.to_string())
}

fn session_not_found(id: i64) -> AppError {
    AppError::new(SESSION_NOT_FOUND, "Session not found.").with_context("id", id.to_string())
}

#[async_trait]
impl Gateway for SqliteGateway {
    async fn insert_client(&self, input: ClientInput) -> AppResult<i64> {
        input.validate()?;
        let registration_date = match &input.registration_date {
            Some(value) => normalize_timestamp("registration_date", value)?,
            None => now_iso(),
        };
        let id = sqlx::query(
            "INSERT INTO clients (firstname, lastname, dob, sex, registration_date) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(input.firstname.trim())
        .bind(input.lastname.trim())
        .bind(input.dob.trim())
        .bind(input.sex.as_str())
        .bind(&registration_date)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();
        debug!(target: "chrio", event = "client_inserted", id);
        Ok(id)
    }

    async fn list_clients(&self) -> AppResult<Vec<Client>> {
        let rows = sqlx::query(&format!(
            "SELECT {CLIENT_COLUMNS} FROM clients ORDER BY registration_date DESC, id DESC"
        ))
        .fetch_all(&self.pool)
        .await?;
        decode_all(rows)
    }

    async fn get_client(&self, id: i64) -> AppResult<Option<Client>> {
        let row = sqlx::query(&format!("SELECT {CLIENT_COLUMNS} FROM clients WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Client::try_from).transpose()
    }

    async fn update_client(&self, id: i64, update: ClientUpdate) -> AppResult<()> {
        update.validate()?;
        let res = sqlx::query(
            "UPDATE clients SET \
               firstname = COALESCE(?, firstname), \
               lastname = COALESCE(?, lastname), \
               dob = COALESCE(?, dob), \
               sex = COALESCE(?, sex) \
             WHERE id = ?",
        )
        .bind(update.firstname.as_deref().map(str::trim))
        .bind(update.lastname.as_deref().map(str::trim))
        .bind(update.dob.as_deref().map(str::trim))
        .bind(update.sex.map(|s| s.as_str()))
        .bind(id)
        .execute(&self.pool)
        .await?;
        if res.rows_affected() == 0 {
            return Err(client_not_found(id));
        }
        Ok(())
    }

    async fn insert_session(&self, client_id: i64, fields: SessionFields) -> AppResult<i64> {
        fields.validate()?;
        let datetime = now_iso();
        run_in_tx(&self.pool, move |tx| {
            async move {
                let exists: Option<i64> = sqlx::query_scalar("SELECT 1 FROM clients WHERE id = ?")
                    .bind(client_id)
                    .fetch_optional(&mut **tx)
                    .await?;
                if exists.is_none() {
                    return Err(AppError::new(
                        VALIDATION_CLIENT_MISSING,
                        "Sessions must belong to an existing client.",
                    )
                    .with_context("client_id", client_id.to_string()));
                }

                let max: Option<i64> = sqlx::query_scalar(
                    "SELECT MAX(session_number) FROM sessions WHERE client_id = ?",
                )
                .bind(client_id)
                .fetch_one(&mut **tx)
                .await?;
                let session_number = max.unwrap_or(0) + 1;

                let id = sqlx::query(
                    "INSERT INTO sessions ( \
                       client_id, datetime, session_number, height, weight, \
                       anterior, posterior, right_lateral, left_lateral, notes, \
                       anterior_crop, posterior_crop, right_lateral_crop, left_lateral_crop \
                     ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(client_id)
                .bind(&datetime)
                .bind(session_number)
                .bind(fields.height)
                .bind(fields.weight)
                .bind(&fields.anterior)
                .bind(&fields.posterior)
                .bind(&fields.right_lateral)
                .bind(&fields.left_lateral)
                .bind(&fields.notes)
                .bind(&fields.anterior_crop)
                .bind(&fields.posterior_crop)
                .bind(&fields.right_lateral_crop)
                .bind(&fields.left_lateral_crop)
                .execute(&mut **tx)
                .await?
                .last_insert_rowid();
                debug!(target: "chrio", event = "session_inserted", id, client_id, session_number);
                Ok(id)
            }
            .boxed()
        })
        .await
    }

    async fn list_sessions_for_client(&self, client_id: i64) -> AppResult<Vec<Session>> {
        let rows = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE client_id = ? \
             ORDER BY datetime DESC, session_number DESC"
        ))
        .bind(client_id)
        .fetch_all(&self.pool)
        .await?;
        decode_all(rows)
    }

    async fn get_session(&self, id: i64) -> AppResult<Option<Session>> {
        let row = sqlx::query(&format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Session::try_from).transpose()
    }

    async fn update_session(&self, id: i64, update: SessionUpdate) -> AppResult<()> {
        update.validate()?;
        // Read-merge-write keeps "clear this field" expressible, which COALESCE cannot.
        run_in_tx(&self.pool, move |tx| {
            async move {
                let row = sqlx::query(&format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?"))
                    .bind(id)
                    .fetch_optional(&mut **tx)
                    .await?;
                let current = match row.as_ref().map(Session::try_from).transpose()? {
                    Some(session) => session,
                    None => return Err(session_not_found(id)),
                };
                let merged = update.apply_to(&current.fields);
                sqlx::query(
                    "UPDATE sessions SET \
                       height = ?, weight = ?, \
                       anterior = ?, posterior = ?, right_lateral = ?, left_lateral = ?, \
                       notes = ?, \
                       anterior_crop = ?, posterior_crop = ?, right_lateral_crop = ?, \
                       left_lateral_crop = ? \
                     WHERE id = ?",
                )
                .bind(merged.height)
                .bind(merged.weight)
                .bind(&merged.anterior)
                .bind(&merged.posterior)
                .bind(&merged.right_lateral)
                .bind(&merged.left_lateral)
                .bind(&merged.notes)
                .bind(&merged.anterior_crop)
                .bind(&merged.posterior_crop)
                .bind(&merged.right_lateral_crop)
                .bind(&merged.left_lateral_crop)
                .bind(id)
                .execute(&mut **tx)
                .await?;
                Ok(())
            }
            .boxed()
        })
        .await
    }

    async fn delete_session(&self, id: i64) -> AppResult<()> {
        let res = sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if res.rows_affected() == 0 {
            return Err(session_not_found(id));
        }
        debug!(target: "chrio", event = "session_deleted", id);
        Ok(())
    }

    async fn next_session_number(&self, client_id: i64) -> AppResult<i64> {
        let max: Option<i64> =
            sqlx::query_scalar("SELECT MAX(session_number) FROM sessions WHERE client_id = ?")
                .bind(client_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(max.unwrap_or(0) + 1)
    }

    async fn update_session_crop(&self, id: i64, kind: ImageKind, crop: String) -> AppResult<()> {
        let sql = format!("UPDATE sessions SET {} = ? WHERE id = ?", kind.crop_column());
        let res = sqlx::query(&sql)
            .bind(&crop)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if res.rows_affected() == 0 {
            return Err(session_not_found(id).with_context("image_type", kind.as_str()));
        }
        Ok(())
    }

    async fn insert_todo(&self, title: String) -> AppResult<i64> {
        require_text("title", &title)?;
        let id = sqlx::query("INSERT INTO todos (title, completed) VALUES (?, ?)")
            .bind(title.trim())
            .bind(false)
            .execute(&self.pool)
            .await?
            .last_insert_rowid();
        Ok(id)
    }

    async fn list_todos(&self) -> AppResult<Vec<Todo>> {
        let rows = sqlx::query("SELECT id, title, completed FROM todos ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        decode_all(rows)
    }

    async fn set_todo_completed(&self, id: i64, completed: bool) -> AppResult<()> {
        let res = sqlx::query("UPDATE todos SET completed = ? WHERE id = ?")
            .bind(completed)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if res.rows_affected() == 0 {
            return Err(
                AppError::new(TODO_NOT_FOUND, "Todo not found.").with_context("id", id.to_string())
            );
        }
        Ok(())
    }
}

/// Stand-in used when the store could not be opened at startup. Every call
/// fails with the original `STORAGE/UNAVAILABLE` error so the rest of the app
/// keeps running without persistence.
pub struct UnavailableGateway {
    error: AppError,
}

impl UnavailableGateway {
    pub fn new(error: AppError) -> Self {
        Self { error }
    }

    fn fail<T>(&self, operation: &'static str) -> AppResult<T> {
        debug!(target: "chrio", event = "storage_unavailable_call", operation);
        Err(self.error.clone().with_context("operation", operation))
    }
}

#[async_trait]
impl Gateway for UnavailableGateway {
    async fn insert_client(&self, _input: ClientInput) -> AppResult<i64> {
        self.fail("insert_client")
    }

    async fn list_clients(&self) -> AppResult<Vec<Client>> {
        self.fail("list_clients")
    }

    async fn get_client(&self, _id: i64) -> AppResult<Option<Client>> {
        self.fail("get_client")
    }

    async fn update_client(&self, _id: i64, _update: ClientUpdate) -> AppResult<()> {
        self.fail("update_client")
    }

    async fn insert_session(&self, _client_id: i64, _fields: SessionFields) -> AppResult<i64> {
        self.fail("insert_session")
    }

    async fn list_sessions_for_client(&self, _client_id: i64) -> AppResult<Vec<Session>> {
        self.fail("list_sessions_for_client")
    }

    async fn get_session(&self, _id: i64) -> AppResult<Option<Session>> {
        self.fail("get_session")
    }

    async fn update_session(&self, _id: i64, _update: SessionUpdate) -> AppResult<()> {
        self.fail("update_session")
    }

    async fn delete_session(&self, _id: i64) -> AppResult<()> {
        self.fail("delete_session")
    }

    async fn next_session_number(&self, _client_id: i64) -> AppResult<i64> {
        self.fail("next_session_number")
    }

    async fn update_session_crop(&self, _id: i64, _kind: ImageKind, _crop: String) -> AppResult<()> {
        self.fail("update_session_crop")
    }

    async fn insert_todo(&self, _title: String) -> AppResult<i64> {
        self.fail("insert_todo")
    }

    async fn list_todos(&self) -> AppResult<Vec<Todo>> {
        self.fail("list_todos")
    }

    async fn set_todo_completed(&self, _id: i64, _completed: bool) -> AppResult<()> {
        self.fail("set_todo_completed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[tokio::test]
    async fn unavailable_gateway_reports_storage_errors() {
        let gw = UnavailableGateway::new(AppError::storage_unavailable("disk gone"));
        let err = gw.list_clients().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StorageUnavailable);
        assert_eq!(err.context().get("operation").map(String::as_str), Some("list_clients"));
        assert!(gw.get_session(1).await.is_err());
    }
}
