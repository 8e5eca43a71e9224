//! Deploy error types.

use std::path::PathBuf;
use std::time::Duration;

use crate::store::StoreError;

/// Errors produced while synchronizing a deploy.
///
/// Transient upload failures never show up here: they are retried inside
/// the uploader and only surface as [`DeployError::UploadFatal`] once the
/// retry budget is spent.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("invalid path {path}: {reason}")]
    PathValidation { path: String, reason: String },

    #[error("duplicate path {path}: {existing} and {incoming} have different content")]
    DuplicatePath {
        path: String,
        existing: PathBuf,
        incoming: PathBuf,
    },

    #[error("failed to hash {}: {source}", path.display())]
    HashIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to walk {}: {source}", root.display())]
    Walk {
        root: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("deploy negotiation failed: {0}")]
    Negotiation(#[source] StoreError),

    #[error("store requested {path}, which is not in the {kind} manifest")]
    UnknownRequiredPath { path: String, kind: &'static str },

    #[error("failed to upload {path} after {attempts} attempt(s): {source}")]
    UploadFatal {
        path: String,
        attempts: u32,
        #[source]
        source: StoreError,
    },

    #[error("deploy {deploy_id} was not processed within {timeout:?}")]
    PollTimeout { deploy_id: String, timeout: Duration },

    #[error("failed to query deploy {deploy_id}: {source}")]
    Poll {
        deploy_id: String,
        #[source]
        source: StoreError,
    },

    #[error("deploy {deploy_id} failed: {message}")]
    DeployFailed { deploy_id: String, message: String },

    #[error("manifest has {count} entries, above the limit of {limit}")]
    FileLimitExceeded { count: usize, limit: usize },

    #[error("no files or functions to deploy")]
    NoContent,

    #[error("function bundling failed: {0}")]
    Bundle(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::ser::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    State(#[from] crate::state::InvalidTransition),

    #[error("cancelled")]
    Cancelled,
}

impl DeployError {
    /// True when the error ended the deploy because of cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<sitesync_transfer::TransferError> for DeployError {
    fn from(err: sitesync_transfer::TransferError) -> Self {
        match err {
            sitesync_transfer::TransferError::Io(e) => Self::Io(e),
            sitesync_transfer::TransferError::InvalidPath(reason) => Self::PathValidation {
                path: String::new(),
                reason,
            },
            sitesync_transfer::TransferError::UnknownAlgorithm(name) => {
                Self::Config(format!("unknown hash algorithm {name}"))
            }
        }
    }
}
