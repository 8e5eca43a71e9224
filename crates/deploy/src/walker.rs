//! Publish directory walking.
//!
//! Walks one or more root directories and produces [`FileEntry`] values
//! with relative paths normalized to forward slashes. The walk is lazy and
//! restartable: every call to [`Walker::entries`] starts from scratch.

use std::fs::Metadata;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use tracing::debug;
use walkdir::{DirEntry, WalkDir};

use crate::error::DeployError;
use crate::types::{AssetKind, FileEntry};

/// Caller predicate deciding whether a root-relative path is kept.
///
/// Returning `false` for a directory prunes everything below it.
pub type KeepFilter = Arc<dyn Fn(&Path, &Metadata) -> bool + Send + Sync>;

/// Default ignore rules.
///
/// Drops hidden entries (except anything under `.well-known`), a top-level
/// `node_modules` directory and `__MACOSX` folders left by archive tools.
pub fn default_keep(relative: &Path) -> bool {
    let names: Vec<_> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(name) => Some(name.to_string_lossy()),
            _ => None,
        })
        .collect();

    if names.first().is_some_and(|first| first == ".well-known") {
        return true;
    }

    for (depth, name) in names.iter().enumerate() {
        if name.starts_with('.') || name == "__MACOSX" {
            return false;
        }
        if depth == 0 && name == "node_modules" {
            return false;
        }
    }
    true
}

/// Walks publish directories.
#[derive(Clone)]
pub struct Walker {
    roots: Vec<PathBuf>,
    filter: Option<KeepFilter>,
}

impl Walker {
    pub fn new(roots: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            roots: roots.into_iter().collect(),
            filter: None,
        }
    }

    /// Adds a caller predicate applied after the default rules.
    pub fn with_filter(mut self, filter: Option<KeepFilter>) -> Self {
        self.filter = filter;
        self
    }

    /// Lazily yields every kept file below every root, roots in order and
    /// entries sorted by file name within each directory.
    pub fn entries(&self) -> impl Iterator<Item = Result<FileEntry, DeployError>> + '_ {
        self.roots.iter().flat_map(move |root| self.walk_root(root))
    }

    /// Walks everything, stopping at the first error.
    pub fn collect_entries(&self) -> Result<Vec<FileEntry>, DeployError> {
        self.entries().collect()
    }

    fn walk_root<'a>(
        &'a self,
        root: &'a Path,
    ) -> impl Iterator<Item = Result<FileEntry, DeployError>> + 'a {
        WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(move |entry| self.keep(root, entry))
            .filter_map(move |item| match item {
                Ok(entry) => file_entry(root, &entry).transpose(),
                Err(source) => Some(Err(DeployError::Walk {
                    root: root.to_path_buf(),
                    source,
                })),
            })
    }

    fn keep(&self, root: &Path, entry: &DirEntry) -> bool {
        if entry.depth() == 0 {
            return true;
        }
        let Ok(relative) = entry.path().strip_prefix(root) else {
            return true;
        };
        if !default_keep(relative) {
            return false;
        }
        match (&self.filter, entry.metadata()) {
            (Some(filter), Ok(metadata)) => filter(relative, &metadata),
            // Unreadable metadata surfaces later as a walk or hash error.
            _ => true,
        }
    }
}

/// Builds the entry for one walked path; `None` for directories.
fn file_entry(root: &Path, entry: &DirEntry) -> Result<Option<FileEntry>, DeployError> {
    let file_type = entry.file_type();
    if file_type.is_dir() {
        return Ok(None);
    }

    let size = if file_type.is_symlink() {
        match std::fs::metadata(entry.path()) {
            Ok(target) if target.is_dir() => {
                debug!(path = %entry.path().display(), "skipping symlinked directory");
                return Ok(None);
            }
            Ok(target) => target.len(),
            // Broken link: kept so the hasher can report and skip it.
            Err(_) => 0,
        }
    } else {
        entry
            .metadata()
            .map(|m| m.len())
            .map_err(|source| DeployError::Walk {
                root: root.to_path_buf(),
                source,
            })?
    };

    let relative = entry
        .path()
        .strip_prefix(root)
        .map_err(std::io::Error::other)?
        .to_path_buf();

    let normalized_path = sitesync_transfer::normalize_path(&relative).map_err(|e| {
        DeployError::PathValidation {
            path: relative.to_string_lossy().into_owned(),
            reason: e.to_string(),
        }
    })?;

    Ok(Some(FileEntry {
        root_dir: root.to_path_buf(),
        absolute_path: entry.path().to_path_buf(),
        relative_path: relative,
        normalized_path,
        size,
        asset: AssetKind::File,
        contents: None,
    }))
}
