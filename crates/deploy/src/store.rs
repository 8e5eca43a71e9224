//! Remote asset store abstraction.
//!
//! `AssetStore` is implemented by the HTTP client crate on top of the
//! store's REST API. Keeping it a trait keeps the engine decoupled from
//! transport and testable with in-memory mocks.

use std::future::Future;
use std::pin::Pin;

use sitesync_protocol::{CreateDeployRequest, DeployRecord, FunctionUploadParams};
use sitesync_transfer::UploadSource;

/// Boxed future returned by every store call.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Errors reported by a store implementation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The request never produced a response (connect, reset, timeout).
    #[error("network error: {0}")]
    Network(String),

    /// The store answered with a non-success status.
    #[error("store returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid response: {0}")]
    Decode(String),

    /// The local body could not be read.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Whether retrying the same request may succeed.
    ///
    /// Network failures, 5xx and 429 are transient; every other 4xx and
    /// local read failures are not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Decode(_) | Self::Io(_) => false,
        }
    }

    /// HTTP status, when the store produced one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<sitesync_transfer::TransferError> for StoreError {
    fn from(err: sitesync_transfer::TransferError) -> Self {
        match err {
            sitesync_transfer::TransferError::Io(e) => Self::Io(e),
            other => Self::Decode(other.to_string()),
        }
    }
}

/// Connection to the remote asset store.
pub trait AssetStore: Send + Sync {
    /// Submits manifests for a new deploy and learns what must be uploaded.
    fn create_deploy<'a>(
        &'a self,
        site_id: &'a str,
        request: &'a CreateDeployRequest,
    ) -> StoreFuture<'a, DeployRecord>;

    /// Resubmits manifests for a deploy created earlier.
    fn update_deploy<'a>(
        &'a self,
        site_id: &'a str,
        deploy_id: &'a str,
        request: &'a CreateDeployRequest,
    ) -> StoreFuture<'a, DeployRecord>;

    /// Uploads one static file.
    fn upload_file<'a>(
        &'a self,
        deploy_id: &'a str,
        path: &'a str,
        body: &'a UploadSource,
    ) -> StoreFuture<'a, ()>;

    /// Uploads one function artifact with its runtime metadata.
    ///
    /// `retry_count` is 0 on the first attempt.
    fn upload_function<'a>(
        &'a self,
        deploy_id: &'a str,
        name: &'a str,
        body: &'a UploadSource,
        params: &'a FunctionUploadParams,
        retry_count: u32,
    ) -> StoreFuture<'a, ()>;

    /// Fetches the current state of a deploy.
    fn get_deploy<'a>(&'a self, deploy_id: &'a str) -> StoreFuture<'a, DeployRecord>;

    /// Asks the store to abandon a deploy.
    fn cancel_deploy<'a>(&'a self, deploy_id: &'a str) -> StoreFuture<'a, ()>;
}
