//! HTTP client for the remote asset store.
//!
//! [`Client`] implements [`sitesync_deploy::AssetStore`] over the store's
//! REST API, so it can be handed straight to a deploy orchestrator.

pub mod client;

pub use client::{Client, Error, RETRY_COUNT_HEADER};
