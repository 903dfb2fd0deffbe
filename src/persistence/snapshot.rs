//! Atomic JSON snapshot files.

use std::fs;
use std::io::Write;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;

use crate::{AppError, Result};

/// Read `path` as JSON, returning `T::default()` when the file is missing.
///
/// # Errors
///
/// Returns `AppError::Storage` if the file exists but cannot be read or
/// does not hold valid JSON for `T`.
pub fn read_json<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    if !path.exists() {
        return Ok(T::default());
    }
    let raw = fs::read_to_string(path)
        .map_err(|err| AppError::Storage(format!("failed to read {}: {err}", path.display())))?;
    if raw.trim().is_empty() {
        return Ok(T::default());
    }
    serde_json::from_str(&raw)
        .map_err(|err| AppError::Storage(format!("invalid json in {}: {err}", path.display())))
}

/// Write `value` to `path` through a temp file in the same directory and an
/// atomic rename, so readers never observe a partial snapshot.
///
/// # Errors
///
/// Returns `AppError::Storage` on serialisation or file-system failure.
pub fn write_json<T>(path: &Path, value: &T) -> Result<()>
where
    T: Serialize + ?Sized,
{
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)
        .map_err(|err| AppError::Storage(format!("failed to create {}: {err}", dir.display())))?;

    let body = serde_json::to_vec_pretty(value)?;
    let mut tmp = NamedTempFile::new_in(dir)
        .map_err(|err| AppError::Storage(format!("failed to create temp file: {err}")))?;
    tmp.write_all(&body)
        .and_then(|()| tmp.as_file().sync_all())
        .map_err(|err| AppError::Storage(format!("failed to write snapshot: {err}")))?;
    tmp.persist(path).map_err(|err| {
        AppError::Storage(format!("failed to replace {}: {}", path.display(), err.error))
    })?;
    Ok(())
}
