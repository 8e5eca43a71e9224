//! Wire types exchanged with the remote asset store.
//!
//! Everything here is plain `serde` data: deploy records returned by the
//! store and the request bodies the engine sends it.

pub mod messages;
pub mod types;

pub use messages::{CreateDeployRequest, FunctionUploadParams};
pub use types::{DeployRecord, DeployState, FunctionConfig, FunctionSchedule};
