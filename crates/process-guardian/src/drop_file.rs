//! Single-shot JSON files handed from the CLI to the running guardian.

use crate::signals::TokenSourceError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

fn temp_sibling(path: &Path) -> io::Result<PathBuf> {
    let mut name = path
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?
        .to_os_string();
    name.push(".tmp");
    Ok(path.with_file_name(name))
}

/// Writes `body` next to `path` and renames it into place, so readers see
/// either the old file, no file, or the complete new one.
pub(crate) fn write_atomic(path: &Path, body: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let tmp = temp_sibling(path)?;
    fs::write(&tmp, body)?;
    fs::rename(&tmp, path)
}

pub(crate) fn deposit<T: Serialize>(path: &Path, value: &T) -> Result<(), TokenSourceError> {
    let body = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &body).map_err(|source| TokenSourceError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Reads and removes the file. A missing file is `None`.
pub(crate) fn take<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, TokenSourceError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(TokenSourceError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    if let Err(e) = fs::remove_file(path) {
        log::warn!("[SIGNALS] could not remove {}: {}", path.display(), e);
    }
    Ok(Some(serde_json::from_str(&raw)?))
}
