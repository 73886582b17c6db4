use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use sqlx::{sqlite::SqliteRow, Row};
use ts_rs::TS;

use crate::error::{
    VALIDATION_DATE, VALIDATION_IMAGE, VALIDATION_MEASUREMENT, VALIDATION_REQUIRED, VALIDATION_SEX,
};
use crate::{AppError, AppResult};

pub const DOB_FORMAT: &str = "%Y-%m-%d";

/// ISO-8601 UTC timestamp with millisecond precision; sorts lexically in time order.
pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub enum Sex {
    #[serde(rename = "M", alias = "m", alias = "male", alias = "Male")]
    Male,
    #[serde(rename = "F", alias = "f", alias = "female", alias = "Female")]
    Female,
    #[serde(rename = "O", alias = "o", alias = "other", alias = "Other")]
    Other,
}

impl Sex {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sex::Male => "M",
            Sex::Female => "F",
            Sex::Other => "O",
        }
    }
}

impl fmt::Display for Sex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Sex {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "m" | "male" => Ok(Sex::Male),
            "f" | "female" => Ok(Sex::Female),
            "o" | "other" => Ok(Sex::Other),
            _ => Err(AppError::new(VALIDATION_SEX, "Sex must be one of M, F or O.")
                .with_context("value", value.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Client {
    #[ts(type = "number")]
    pub id: i64,
    pub firstname: String,
    pub lastname: String,
    pub dob: String,
    pub sex: Sex,
    pub registration_date: String,
}

impl TryFrom<&SqliteRow> for Client {
    type Error = AppError;

    fn try_from(row: &SqliteRow) -> Result<Self, Self::Error> {
        let sex: String = row.try_get("sex").map_err(AppError::from)?;
        Ok(Self {
            id: row.try_get("id").map_err(AppError::from)?,
            firstname: row.try_get("firstname").map_err(AppError::from)?,
            lastname: row.try_get("lastname").map_err(AppError::from)?,
            dob: row.try_get("dob").map_err(AppError::from)?,
            sex: sex.parse()?,
            registration_date: row.try_get("registration_date").map_err(AppError::from)?,
        })
    }
}

/// Fields for a new client. The store assigns `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ClientInput {
    pub firstname: String,
    pub lastname: String,
    pub dob: String,
    pub sex: Sex,
    /// Defaults to the insert instant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub registration_date: Option<String>,
}

impl ClientInput {
    pub fn new(
        firstname: impl Into<String>,
        lastname: impl Into<String>,
        dob: impl Into<String>,
        sex: Sex,
    ) -> Self {
        Self {
            firstname: firstname.into(),
            lastname: lastname.into(),
            dob: dob.into(),
            sex,
            registration_date: None,
        }
    }

    pub fn validate(&self) -> AppResult<()> {
        require_text("firstname", &self.firstname)?;
        require_text("lastname", &self.lastname)?;
        validate_dob(&self.dob)?;
        if let Some(value) = &self.registration_date {
            normalize_timestamp("registration_date", value)?;
        }
        Ok(())
    }
}

/// Partial client update; `None` leaves the stored value as is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ClientUpdate {
    #[serde(default)]
    #[ts(optional)]
    pub firstname: Option<String>,
    #[serde(default)]
    #[ts(optional)]
    pub lastname: Option<String>,
    #[serde(default)]
    #[ts(optional)]
    pub dob: Option<String>,
    #[serde(default)]
    #[ts(optional)]
    pub sex: Option<Sex>,
}

impl ClientUpdate {
    pub fn validate(&self) -> AppResult<()> {
        if let Some(v) = &self.firstname {
            require_text("firstname", v)?;
        }
        if let Some(v) = &self.lastname {
            require_text("lastname", v)?;
        }
        if let Some(v) = &self.dob {
            validate_dob(v)?;
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.firstname.is_none() && self.lastname.is_none() && self.dob.is_none() && self.sex.is_none()
    }
}

/// The four posture photographs taken per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum ImageKind {
    Anterior,
    Posterior,
    RightLateral,
    LeftLateral,
}

impl ImageKind {
    pub const ALL: [ImageKind; 4] = [
        ImageKind::Anterior,
        ImageKind::Posterior,
        ImageKind::RightLateral,
        ImageKind::LeftLateral,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ImageKind::Anterior => "anterior",
            ImageKind::Posterior => "posterior",
            ImageKind::RightLateral => "right_lateral",
            ImageKind::LeftLateral => "left_lateral",
        }
    }

    pub(crate) fn crop_column(&self) -> &'static str {
        match self {
            ImageKind::Anterior => "anterior_crop",
            ImageKind::Posterior => "posterior_crop",
            ImageKind::RightLateral => "right_lateral_crop",
            ImageKind::LeftLateral => "left_lateral_crop",
        }
    }
}

impl fmt::Display for ImageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImageKind {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        ImageKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == value)
            .ok_or_else(|| {
                AppError::new(VALIDATION_IMAGE, "Unknown image type.")
                    .with_context("image_type", value.to_string())
            })
    }
}

/// Measurements and attachments recorded in a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SessionFields {
    #[serde(default)]
    #[ts(optional)]
    pub height: Option<f64>,
    #[serde(default)]
    #[ts(optional)]
    pub weight: Option<f64>,
    #[serde(default)]
    #[ts(optional)]
    pub anterior: Option<String>,
    #[serde(default)]
    #[ts(optional)]
    pub posterior: Option<String>,
    #[serde(default)]
    #[ts(optional)]
    pub right_lateral: Option<String>,
    #[serde(default)]
    #[ts(optional)]
    pub left_lateral: Option<String>,
    #[serde(default)]
    #[ts(optional)]
    pub anterior_crop: Option<String>,
    #[serde(default)]
    #[ts(optional)]
    pub posterior_crop: Option<String>,
    #[serde(default)]
    #[ts(optional)]
    pub right_lateral_crop: Option<String>,
    #[serde(default)]
    #[ts(optional)]
    pub left_lateral_crop: Option<String>,
    #[serde(default)]
    #[ts(optional)]
    pub notes: Option<String>,
}

impl SessionFields {
    pub fn validate(&self) -> AppResult<()> {
        validate_measurement("height", self.height)?;
        validate_measurement("weight", self.weight)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Session {
    #[ts(type = "number")]
    pub id: i64,
    #[ts(type = "number")]
    pub client_id: i64,
    pub datetime: String,
    #[ts(type = "number")]
    pub session_number: i64,
    #[serde(flatten)]
    #[ts(flatten)]
    pub fields: SessionFields,
}

impl TryFrom<&SqliteRow> for Session {
    type Error = AppError;

    fn try_from(row: &SqliteRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.try_get("id").map_err(AppError::from)?,
            client_id: row.try_get("client_id").map_err(AppError::from)?,
            datetime: row.try_get("datetime").map_err(AppError::from)?,
            session_number: row.try_get("session_number").map_err(AppError::from)?,
            fields: SessionFields {
                height: row.try_get("height").map_err(AppError::from)?,
                weight: row.try_get("weight").map_err(AppError::from)?,
                anterior: row.try_get("anterior").map_err(AppError::from)?,
                posterior: row.try_get("posterior").map_err(AppError::from)?,
                right_lateral: row.try_get("right_lateral").map_err(AppError::from)?,
                left_lateral: row.try_get("left_lateral").map_err(AppError::from)?,
                anterior_crop: row.try_get("anterior_crop").map_err(AppError::from)?,
                posterior_crop: row.try_get("posterior_crop").map_err(AppError::from)?,
                right_lateral_crop: row.try_get("right_lateral_crop").map_err(AppError::from)?,
                left_lateral_crop: row.try_get("left_lateral_crop").map_err(AppError::from)?,
                notes: row.try_get("notes").map_err(AppError::from)?,
            },
        })
    }
}

/// Partial session update. Outer `None` keeps the stored value; `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SessionUpdate {
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    #[ts(optional, type = "number | null")]
    pub height: Option<Option<f64>>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    #[ts(optional, type = "number | null")]
    pub weight: Option<Option<f64>>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    #[ts(optional, type = "string | null")]
    pub anterior: Option<Option<String>>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    #[ts(optional, type = "string | null")]
    pub posterior: Option<Option<String>>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    #[ts(optional, type = "string | null")]
    pub right_lateral: Option<Option<String>>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    #[ts(optional, type = "string | null")]
    pub left_lateral: Option<Option<String>>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    #[ts(optional, type = "string | null")]
    pub anterior_crop: Option<Option<String>>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    #[ts(optional, type = "string | null")]
    pub posterior_crop: Option<Option<String>>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    #[ts(optional, type = "string | null")]
    pub right_lateral_crop: Option<Option<String>>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    #[ts(optional, type = "string | null")]
    pub left_lateral_crop: Option<Option<String>>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    #[ts(optional, type = "string | null")]
    pub notes: Option<Option<String>>,
}

impl SessionUpdate {
    pub fn validate(&self) -> AppResult<()> {
        validate_measurement("height", self.height.flatten())?;
        validate_measurement("weight", self.weight.flatten())?;
        Ok(())
    }

    /// Apply onto a stored row, yielding the full field set to write back.
    pub fn apply_to(&self, current: &SessionFields) -> SessionFields {
        fn pick<T: Clone>(update: &Option<Option<T>>, current: &Option<T>) -> Option<T> {
            match update {
                Some(value) => value.clone(),
                None => current.clone(),
            }
        }
        SessionFields {
            height: pick(&self.height, &current.height),
            weight: pick(&self.weight, &current.weight),
            anterior: pick(&self.anterior, &current.anterior),
            posterior: pick(&self.posterior, &current.posterior),
            right_lateral: pick(&self.right_lateral, &current.right_lateral),
            left_lateral: pick(&self.left_lateral, &current.left_lateral),
            anterior_crop: pick(&self.anterior_crop, &current.anterior_crop),
            posterior_crop: pick(&self.posterior_crop, &current.posterior_crop),
            right_lateral_crop: pick(&self.right_lateral_crop, &current.right_lateral_crop),
            left_lateral_crop: pick(&self.left_lateral_crop, &current.left_lateral_crop),
            notes: pick(&self.notes, &current.notes),
        }
    }
}

/// A field that is present in the payload, even as `null`, becomes `Some(..)`.
fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Todo {
    #[ts(type = "number")]
    pub id: i64,
    pub title: String,
    pub completed: bool,
}

impl TryFrom<&SqliteRow> for Todo {
    type Error = AppError;

    fn try_from(row: &SqliteRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.try_get("id").map_err(AppError::from)?,
            title: row.try_get("title").map_err(AppError::from)?,
            completed: row
                .try_get::<i64, _>("completed")
                .map(|value| value != 0)
                .map_err(AppError::from)?,
        })
    }
}

pub(crate) fn require_text(field: &'static str, value: &str) -> AppResult<()> {
    if value.trim().is_empty() {
        return Err(
            AppError::new(VALIDATION_REQUIRED, format!("{field} is required."))
                .with_context("field", field),
        );
    }
    Ok(())
}

fn validate_dob(value: &str) -> AppResult<()> {
    let parsed = NaiveDate::parse_from_str(value.trim(), DOB_FORMAT).map_err(|err| {
        AppError::new(VALIDATION_DATE, "Date of birth must be formatted YYYY-MM-DD.")
            .with_context("field", "dob")
            .with_context("value", value.to_string())
            .with_context("error", err.to_string())
    })?;
    if parsed > Utc::now().date_naive() {
        return Err(
            AppError::new(VALIDATION_DATE, "Date of birth cannot be in the future.")
                .with_context("field", "dob")
                .with_context("value", value.to_string()),
        );
    }
    Ok(())
}

/// Parse an RFC 3339 timestamp and re-render it as UTC with milliseconds, so
/// stored text sorts in instant order whatever offset the caller used.
pub(crate) fn normalize_timestamp(field: &'static str, value: &str) -> AppResult<String> {
    let parsed = DateTime::parse_from_rfc3339(value.trim()).map_err(|err| {
        AppError::new(VALIDATION_DATE, format!("{field} must be an RFC 3339 timestamp."))
            .with_context("field", field)
            .with_context("value", value.to_string())
            .with_context("error", err.to_string())
    })?;
    Ok(parsed
        .with_timezone(&Utc)
        .to_rfc3339_opts(SecondsFormat::Millis, true))
}

fn validate_measurement(field: &'static str, value: Option<f64>) -> AppResult<()> {
    match value {
        Some(v) if !v.is_finite() || v < 0.0 => Err(AppError::new(
            VALIDATION_MEASUREMENT,
            format!("{field} must be a non-negative number."),
        )
        .with_context("field", field)
        .with_context("value", v.to_string())),
        _ => Ok(()),
    }
}
