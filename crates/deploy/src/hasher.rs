//! Bounded-concurrency content hashing.

use std::path::Path;

use futures_util::stream::{self, StreamExt};
use sitesync_transfer::{HashAlgorithm, checksum_bytes, hash_reader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::DeployError;
use crate::manifest::ManifestBuilder;
use crate::types::{FileEntry, HashedFile};

/// Hashes entries with at most `concurrency` files open at once.
#[derive(Debug, Clone, Copy)]
pub struct Hasher {
    algorithm: HashAlgorithm,
    concurrency: usize,
}

impl Hasher {
    pub fn new(algorithm: HashAlgorithm, concurrency: usize) -> Self {
        Self {
            algorithm,
            concurrency: concurrency.max(1),
        }
    }

    /// Hashes every entry and reduces the results into `builder`.
    ///
    /// Results arrive in completion order and are consumed by this single
    /// loop, so the builder never sees concurrent writes. `on_progress` is
    /// called with `(done, total)` after each entry. Returns the number of
    /// entries hashed; skipped broken symlinks are not counted.
    ///
    /// Any failure other than a broken symlink aborts the whole phase.
    pub async fn hash_into<F>(
        &self,
        entries: Vec<FileEntry>,
        builder: &mut ManifestBuilder,
        cancel: &CancellationToken,
        mut on_progress: F,
    ) -> Result<usize, DeployError>
    where
        F: FnMut(usize, usize),
    {
        let total = entries.len();
        let algorithm = self.algorithm;

        let mut results = stream::iter(entries.into_iter().map(|entry| {
            let cancel = cancel.clone();
            async move {
                if cancel.is_cancelled() {
                    return Err(DeployError::Cancelled);
                }
                hash_entry(algorithm, entry).await
            }
        }))
        .buffer_unordered(self.concurrency);

        let mut done = 0;
        let mut hashed = 0;
        while let Some(result) = results.next().await {
            done += 1;
            if let Some(file) = result? {
                builder.insert(file)?;
                hashed += 1;
            }
            on_progress(done, total);
        }

        debug!(total, hashed, algorithm = %algorithm, "hashing finished");
        Ok(hashed)
    }
}

/// Digest of one entry; `None` when the entry is a broken symlink.
pub async fn hash_entry(
    algorithm: HashAlgorithm,
    entry: FileEntry,
) -> Result<Option<HashedFile>, DeployError> {
    if let Some(bytes) = &entry.contents {
        let digest = checksum_bytes(algorithm, bytes);
        return Ok(Some(HashedFile { entry, digest }));
    }

    let file = match tokio::fs::File::open(&entry.absolute_path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound && is_symlink(&entry.absolute_path).await => {
            warn!(path = %entry.absolute_path.display(), "skipping broken symlink");
            return Ok(None);
        }
        Err(source) => {
            return Err(DeployError::HashIo {
                path: entry.absolute_path,
                source,
            });
        }
    };

    let (digest, _) = hash_reader(algorithm, file)
        .await
        .map_err(|source| DeployError::HashIo {
            path: entry.absolute_path.clone(),
            source,
        })?;
    Ok(Some(HashedFile { entry, digest }))
}

async fn is_symlink(path: &Path) -> bool {
    tokio::fs::symlink_metadata(path)
        .await
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false)
}
