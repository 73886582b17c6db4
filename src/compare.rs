//! Field-by-field comparison of two sessions belonging to one client.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::{
    error::{COMPARE_INVALID, SESSION_NOT_FOUND},
    model::{Session, SessionFields},
    repo::Gateway,
    AppError, AppResult,
};

/// Comparable session fields in column declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum SessionField {
    Height,
    Weight,
    Anterior,
    Posterior,
    RightLateral,
    LeftLateral,
    AnteriorCrop,
    PosteriorCrop,
    RightLateralCrop,
    LeftLateralCrop,
    Notes,
}

impl SessionField {
    pub const ALL: [SessionField; 11] = [
        SessionField::Height,
        SessionField::Weight,
        SessionField::Anterior,
        SessionField::Posterior,
        SessionField::RightLateral,
        SessionField::LeftLateral,
        SessionField::AnteriorCrop,
        SessionField::PosteriorCrop,
        SessionField::RightLateralCrop,
        SessionField::LeftLateralCrop,
        SessionField::Notes,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionField::Height => "height",
            SessionField::Weight => "weight",
            SessionField::Anterior => "anterior",
            SessionField::Posterior => "posterior",
            SessionField::RightLateral => "right_lateral",
            SessionField::LeftLateral => "left_lateral",
            SessionField::AnteriorCrop => "anterior_crop",
            SessionField::PosteriorCrop => "posterior_crop",
            SessionField::RightLateralCrop => "right_lateral_crop",
            SessionField::LeftLateralCrop => "left_lateral_crop",
            SessionField::Notes => "notes",
        }
    }

    fn read(&self, fields: &SessionFields) -> DiffValue {
        fn text(value: &Option<String>) -> DiffValue {
            value
                .clone()
                .map(FieldValue::Text)
                .map_or(DiffValue::Absent, DiffValue::Present)
        }
        fn number(value: Option<f64>) -> DiffValue {
            value
                .map(FieldValue::Number)
                .map_or(DiffValue::Absent, DiffValue::Present)
        }
        match self {
            SessionField::Height => number(fields.height),
            SessionField::Weight => number(fields.weight),
            SessionField::Anterior => text(&fields.anterior),
            SessionField::Posterior => text(&fields.posterior),
            SessionField::RightLateral => text(&fields.right_lateral),
            SessionField::LeftLateral => text(&fields.left_lateral),
            SessionField::AnteriorCrop => text(&fields.anterior_crop),
            SessionField::PosteriorCrop => text(&fields.posterior_crop),
            SessionField::RightLateralCrop => text(&fields.right_lateral_crop),
            SessionField::LeftLateralCrop => text(&fields.left_lateral_crop),
            SessionField::Notes => text(&fields.notes),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
#[ts(export)]
pub enum FieldValue {
    Number(f64),
    Text(String),
}

/// One side of a field comparison. `Absent` is explicit, never an omitted entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
#[ts(export)]
pub enum DiffValue {
    Present(FieldValue),
    Absent,
}

impl DiffValue {
    pub fn is_absent(&self) -> bool {
        matches!(self, DiffValue::Absent)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct FieldDiff {
    pub field: SessionField,
    pub a: DiffValue,
    pub b: DiffValue,
}

impl FieldDiff {
    pub fn is_unchanged(&self) -> bool {
        self.a == self.b
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SessionDiff {
    #[ts(type = "number")]
    pub client_id: i64,
    #[ts(type = "number")]
    pub session_a: i64,
    #[ts(type = "number")]
    pub session_b: i64,
    pub fields: Vec<FieldDiff>,
}

impl SessionDiff {
    pub fn get(&self, field: SessionField) -> Option<&FieldDiff> {
        self.fields.iter().find(|diff| diff.field == field)
    }

    pub fn changed(&self) -> impl Iterator<Item = &FieldDiff> {
        self.fields.iter().filter(|diff| !diff.is_unchanged())
    }
}

/// Align every field present in either session, in [`SessionField::ALL`] order.
pub fn diff_sessions(a: &SessionFields, b: &SessionFields) -> Vec<FieldDiff> {
    SessionField::ALL
        .iter()
        .filter_map(|field| {
            let left = field.read(a);
            let right = field.read(b);
            if left.is_absent() && right.is_absent() {
                None
            } else {
                Some(FieldDiff {
                    field: *field,
                    a: left,
                    b: right,
                })
            }
        })
        .collect()
}

async fn load(gateway: &dyn Gateway, id: i64) -> AppResult<Session> {
    gateway.get_session(id).await?.ok_or_else(|| {
        AppError::new(SESSION_NOT_FOUND, "Session not found.").with_context("id", id.to_string())
    })
}

fn ensure_owner(client_id: i64, session: &Session) -> AppResult<()> {
    if session.client_id == client_id {
        return Ok(());
    }
    Err(AppError::new(
        COMPARE_INVALID,
        "Only sessions of the same client can be compared.",
    )
    .with_context("client_id", client_id.to_string())
    .with_context("session_id", session.id.to_string())
    .with_context("owner_id", session.client_id.to_string()))
}

/// Compare two sessions of `client_id`.
pub async fn compare(
    gateway: &dyn Gateway,
    client_id: i64,
    session_a: i64,
    session_b: i64,
) -> AppResult<SessionDiff> {
    let a = load(gateway, session_a).await?;
    let b = load(gateway, session_b).await?;
    ensure_owner(client_id, &a)?;
    ensure_owner(client_id, &b)?;
    tracing::debug!(target: "chrio", event = "sessions_compared", client_id, session_a, session_b);
    Ok(SessionDiff {
        client_id,
        session_a,
        session_b,
        fields: diff_sessions(&a.fields, &b.fields),
    })
}
