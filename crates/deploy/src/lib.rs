//! Content-addressed deploy synchronization.
//!
//! A deploy flows through these stages:
//!
//! 1. [`walker`] enumerates publish directories into [`FileEntry`] values
//! 2. [`hasher`] digests them with bounded concurrency
//! 3. [`manifest`] reduces digests into path and dedup indexes
//! 4. [`negotiate`] asks the [`AssetStore`] which content it is missing
//! 5. [`upload`] sends only that content, retrying transient failures
//! 6. [`poll`] waits for the store to publish the deploy
//!
//! [`DeployOrchestrator`] drives the stages as a state machine and reports
//! progress through a status callback.

pub mod build_cache;
pub mod deploy;
pub mod error;
pub mod functions;
pub mod hasher;
pub mod manifest;
pub mod negotiate;
pub mod options;
pub mod poll;
pub mod state;
pub mod store;
pub mod types;
pub mod upload;
pub mod walker;

#[cfg(test)]
mod testing;

pub use build_cache::{BuildCache, BuildError, BuildOutcome};
pub use deploy::{DeployOrchestrator, FunctionsBuildCache};
pub use error::DeployError;
pub use functions::FunctionBundler;
pub use manifest::{DeployManifest, Manifest, ManifestBuilder, ShaMap};
pub use options::{DeployOptions, RetryPolicy};
pub use state::SyncState;
pub use store::{AssetStore, StoreError, StoreFuture};
pub use types::{
    AssetKind, DeployConfig, DeployEvent, DeployOutcome, EventKind, EventPhase, FileEntry,
    FunctionArtifact, FunctionMetadata, FunctionsInput, HashedFile, StatusCallback, UploadTask,
};
pub use upload::UploadStatsSnapshot;
pub use walker::{KeepFilter, Walker};
