//! Session photographs stored as JPEG files under the data directory.

use std::path::{Path, PathBuf};

use base64::{engine::general_purpose, Engine as _};

use crate::{error::VALIDATION_IMAGE, model::ImageKind, AppError, AppResult};

const DATA_URL_PREFIX: &str = "data:image/jpeg;base64,";

fn safe_segment(field: &'static str, value: &str) -> AppResult<String> {
    let trimmed = value.trim();
    let bad = trimmed.is_empty()
        || trimmed == "."
        || trimmed == ".."
        || trimmed.contains(['/', '\\', '\0'])
        || trimmed.contains("..");
    if bad {
        return Err(
            AppError::new(VALIDATION_IMAGE, "Name cannot be used in a file path.")
                .with_context("field", field)
                .with_context("value", value.to_string()),
        );
    }
    Ok(trimmed.to_string())
}

/// `<photos>/<client_id>_<firstname>/session_<n>/<kind>_<firstname>.jpg`
pub fn image_path(
    photos_dir: &Path,
    client_id: i64,
    firstname: &str,
    session_number: i64,
    kind: ImageKind,
) -> AppResult<PathBuf> {
    let name = safe_segment("firstname", firstname)?;
    Ok(photos_dir
        .join(format!("{client_id}_{name}"))
        .join(format!("session_{session_number}"))
        .join(format!("{}_{name}.jpg", kind.as_str())))
}

/// Decode a base64 image (optionally a `data:` URL) and write it to disk.
pub fn save_image(
    photos_dir: &Path,
    client_id: i64,
    firstname: &str,
    session_number: i64,
    kind: ImageKind,
    base64_image: &str,
) -> AppResult<PathBuf> {
    let path = image_path(photos_dir, client_id, firstname, session_number, kind)?;
    let payload = base64_image
        .rsplit_once(',')
        .map(|(_, data)| data)
        .unwrap_or(base64_image)
        .trim();
    let bytes = general_purpose::STANDARD.decode(payload).map_err(|err| {
        AppError::new(VALIDATION_IMAGE, "Image data is not valid base64.")
            .with_context("error", err.to_string())
    })?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|err| {
            AppError::from(err).with_context("operation", "create_photo_dir")
        })?;
    }
    std::fs::write(&path, &bytes)
        .map_err(|err| AppError::from(err).with_context("operation", "write_photo"))?;

    tracing::info!(
        target: "chrio",
        event = "photo_saved",
        client_id,
        session_number,
        image_type = kind.as_str(),
        bytes = bytes.len()
    );
    Ok(path)
}

fn outside_photos(path: &Path) -> AppError {
    AppError::new(VALIDATION_IMAGE, "Image path is outside the photos directory.")
        .with_context("path", path.display().to_string())
}

/// Resolve `path` against `photos_dir` and require the real location to stay
/// under it. Relative paths are taken from `photos_dir`.
fn confine(photos_dir: &Path, path: &Path) -> AppResult<PathBuf> {
    if path
        .components()
        .any(|c| matches!(c, std::path::Component::ParentDir))
    {
        return Err(outside_photos(path));
    }
    let candidate = if path.is_absolute() {
        path.to_path_buf()
    } else {
        photos_dir.join(path)
    };
    let base = photos_dir.canonicalize().map_err(|err| {
        AppError::from(err).with_context("operation", "resolve_photos_dir")
    })?;
    let real = candidate
        .canonicalize()
        .map_err(|err| AppError::from(err).with_context("operation", "read_photo"))?;
    if !real.starts_with(&base) {
        return Err(outside_photos(path));
    }
    Ok(real)
}

/// Read a stored photo back as a `data:image/jpeg;base64,` URL. Only files
/// under `photos_dir` are served.
pub fn read_image_base64(photos_dir: &Path, path: &Path) -> AppResult<String> {
    let real = confine(photos_dir, path)?;
    let bytes = std::fs::read(&real)
        .map_err(|err| AppError::from(err).with_context("operation", "read_photo"))?;
    Ok(format!(
        "{DATA_URL_PREFIX}{}",
        general_purpose::STANDARD.encode(bytes)
    ))
}
