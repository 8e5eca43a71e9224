use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{FunctionConfig, FunctionSchedule};

/// Body of `createDeploy` / `updateDeploy`.
///
/// `files` and `functions` map normalized paths (function names for
/// functions) to content digests. Maps are ordered so identical manifests
/// serialize identically.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateDeployRequest {
    pub files: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub functions: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub function_schedules: Vec<FunctionSchedule>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub functions_config: BTreeMap<String, FunctionConfig>,
    /// Ask the store to diff in the background; the client then polls.
    #[serde(rename = "async", default, skip_serializing_if = "is_false")]
    pub async_diff: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub draft: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

fn is_false(v: &bool) -> bool {
    !*v
}

/// Runtime metadata sent with every function upload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionUploadParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invocation_mode: Option<String>,
    /// Execution timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u32>,
}

impl FunctionUploadParams {
    /// Query string pairs for the upload request.
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(runtime) = &self.runtime {
            pairs.push(("runtime", runtime.clone()));
        }
        if let Some(mode) = &self.invocation_mode {
            pairs.push(("invocation_mode", mode.clone()));
        }
        if let Some(timeout) = self.timeout {
            pairs.push(("timeout", timeout.to_string()));
        }
        pairs
    }
}
