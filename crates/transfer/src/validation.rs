use std::path::{Component, Path};

use crate::TransferError;

/// Converts a root-relative filesystem path into a deploy path.
///
/// Components are joined with `/` whatever the host separator is, and
/// `\` inside a component is treated as a separator too, so trees
/// produced on Windows normalize the same way everywhere.
pub fn normalize_path(relative: &Path) -> Result<String, TransferError> {
    let mut parts: Vec<String> = Vec::new();

    for component in relative.components() {
        match component {
            Component::Normal(part) => {
                let part = part.to_string_lossy();
                parts.extend(
                    part.split('\\')
                        .filter(|s| !s.is_empty())
                        .map(str::to_string),
                );
            }
            Component::CurDir => {}
            Component::ParentDir => {
                return Err(TransferError::InvalidPath(format!(
                    "parent directory traversal not allowed: {}",
                    relative.display()
                )));
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(TransferError::InvalidPath(format!(
                    "absolute path not allowed: {}",
                    relative.display()
                )));
            }
        }
    }

    let normalized = parts.join("/");
    validate_deploy_path(&normalized)?;
    Ok(normalized)
}

/// Validates a normalized deploy path.
///
/// Rejects:
/// - Empty paths
/// - Leading `/`
/// - `..` segments
/// - Control characters, `#` and `?` (the store addresses files by URL)
pub fn validate_deploy_path(path: &str) -> Result<(), TransferError> {
    if path.is_empty() {
        return Err(TransferError::InvalidPath("empty path".into()));
    }

    if path.starts_with('/') {
        return Err(TransferError::InvalidPath(format!(
            "absolute path not allowed: {path}"
        )));
    }

    if path.split('/').any(|segment| segment == "..") {
        return Err(TransferError::InvalidPath(format!(
            "parent directory traversal not allowed: {path}"
        )));
    }

    if let Some(c) = path.chars().find(|c| c.is_control() || *c == '#' || *c == '?') {
        return Err(TransferError::InvalidPath(format!(
            "invalid character {c:?} in {path}"
        )));
    }

    Ok(())
}
