use std::io;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

pub(crate) fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            IMAGE_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// List candidate images directly inside `folder`, sorted by path so
/// reruns see the same order.
pub fn list_candidates(folder: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    if !folder.exists() {
        return Err(ConfigError::MissingPath(folder.to_path_buf()));
    }
    if !folder.is_dir() {
        return Err(ConfigError::NotADirectory(folder.to_path_buf()));
    }

    let entries = std::fs::read_dir(folder).map_err(|e| read_error(folder, &e))?;

    let mut candidates: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && has_image_extension(p))
        .collect();
    candidates.sort();

    log::debug!("{} candidate image(s) in {}", candidates.len(), folder.display());
    Ok(candidates)
}

fn read_error(folder: &Path, err: &io::Error) -> ConfigError {
    match err.kind() {
        io::ErrorKind::NotFound => ConfigError::MissingPath(folder.to_path_buf()),
        _ => ConfigError::Unreadable {
            path: folder.to_path_buf(),
            reason: err.to_string(),
        },
    }
}

/// Display name for a candidate: its file name, falling back to the path.
pub fn candidate_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
