use std::path::{Component, Path, PathBuf};

use crate::TransferError;

/// Resolves the relative path announced by a peer to a destination under
/// `base_dir`.
///
/// Backslashes are treated as separators. A path ending in a separator
/// names a directory; a random file name is generated inside it.
///
/// Rejects:
/// - Empty paths
/// - Absolute paths (`/etc/passwd`, `C:\Windows`)
/// - Parent directory traversal (`..`)
/// - Windows prefix components (`C:`, `\\server`)
pub fn resolve_destination(base_dir: &Path, relative: &str) -> Result<PathBuf, TransferError> {
    let normalized = relative.trim().replace('\\', "/");
    if normalized.is_empty() {
        return Err(TransferError::InvalidPath("empty path".into()));
    }
    if normalized.len() >= 2 && normalized.as_bytes()[1] == b':' {
        return Err(TransferError::InvalidPath(format!(
            "drive prefix not allowed: {relative}"
        )));
    }

    let mut normalized = normalized;
    if normalized.ends_with('/') {
        normalized.push_str(&uuid::Uuid::new_v4().to_string());
    }

    let path = Path::new(&normalized);
    if path.is_absolute() {
        return Err(TransferError::InvalidPath(format!(
            "absolute path not allowed: {relative}"
        )));
    }

    for component in path.components() {
        match component {
            Component::ParentDir => {
                return Err(TransferError::InvalidPath(format!(
                    "parent directory traversal not allowed: {relative}"
                )));
            }
            Component::Prefix(_) | Component::RootDir => {
                return Err(TransferError::InvalidPath(format!(
                    "absolute path not allowed: {relative}"
                )));
            }
            Component::CurDir | Component::Normal(_) => {}
        }
    }

    Ok(base_dir.join(path))
}

/// Relative path announced for a local file: its file name.
pub fn remote_name(local: &Path) -> String {
    local
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}
