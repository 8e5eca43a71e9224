//! Function artifacts: the bundler seam and the bundler's manifest file.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Deserialize;
use tracing::debug;

use crate::error::DeployError;
use crate::types::{AssetKind, FileEntry, FunctionArtifact, FunctionMetadata};

/// File name of the manifest a bundler writes next to its artifacts.
pub const FUNCTIONS_MANIFEST_FILE: &str = "manifest.json";

/// Builds deployable function artifacts from a source directory.
///
/// Bundling itself lives outside the engine; implementations wrap whatever
/// toolchain produces the archives.
pub trait FunctionBundler: Send + Sync {
    fn bundle<'a>(
        &'a self,
        source_dir: &'a Path,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<FunctionArtifact>, DeployError>> + Send + 'a>>;
}

/// Turns artifacts into function entries keyed by archive file stem.
pub fn function_entries(artifacts: &[FunctionArtifact]) -> Result<Vec<FileEntry>, DeployError> {
    artifacts.iter().map(function_entry).collect()
}

fn function_entry(artifact: &FunctionArtifact) -> Result<FileEntry, DeployError> {
    let invalid = |reason: &str| DeployError::PathValidation {
        path: artifact.path.to_string_lossy().into_owned(),
        reason: reason.to_string(),
    };

    let name = artifact
        .path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| invalid("function artifact has no file name"))?;
    sitesync_transfer::validate_deploy_path(name).map_err(|e| invalid(&e.to_string()))?;

    let size = std::fs::metadata(&artifact.path)
        .map_err(|source| DeployError::HashIo {
            path: artifact.path.clone(),
            source,
        })?
        .len();

    Ok(FileEntry {
        root_dir: artifact.path.parent().map(Path::to_path_buf).unwrap_or_default(),
        absolute_path: artifact.path.clone(),
        relative_path: artifact.path.file_name().map(PathBuf::from).unwrap_or_default(),
        normalized_path: name.to_string(),
        size,
        asset: AssetKind::Function(Arc::new(artifact.metadata.clone())),
        contents: None,
    })
}

#[derive(Debug, Deserialize)]
struct ManifestFile {
    functions: Vec<ManifestFunction>,
    /// Milliseconds since the Unix epoch.
    timestamp: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManifestFunction {
    path: PathBuf,
    name: String,
    #[serde(default)]
    runtime: Option<String>,
    #[serde(default)]
    runtime_version: Option<String>,
    #[serde(default)]
    invocation_mode: Option<String>,
    #[serde(default)]
    timeout: Option<u32>,
    #[serde(default)]
    schedule: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    generator: Option<String>,
    #[serde(default)]
    routes: Vec<serde_json::Value>,
    #[serde(default)]
    build_data: Option<serde_json::Value>,
    #[serde(default)]
    priority: Option<i32>,
    #[serde(default)]
    native_node_modules: BTreeMap<String, serde_json::Value>,
}

impl ManifestFunction {
    fn into_artifact(self, base: &Path) -> FunctionArtifact {
        let path = if self.path.is_absolute() {
            self.path
        } else {
            base.join(self.path)
        };
        FunctionArtifact {
            path,
            metadata: FunctionMetadata {
                name: self.name,
                runtime: self.runtime,
                runtime_version: self.runtime_version,
                invocation_mode: self.invocation_mode,
                timeout: self.timeout,
                schedule: self.schedule,
                display_name: self.display_name,
                generator: self.generator,
                routes: self.routes,
                build_data: self.build_data,
                priority: self.priority,
                native_modules: self.native_node_modules.into_keys().collect(),
            },
        }
    }
}

/// Reads artifacts from a bundler manifest no older than `max_age`.
///
/// Relative artifact paths resolve against the manifest's directory.
pub fn read_functions_manifest(
    path: &Path,
    max_age: Duration,
) -> Result<Vec<FunctionArtifact>, DeployError> {
    let content = std::fs::read_to_string(path)?;
    let manifest: ManifestFile = serde_json::from_str(&content)
        .map_err(|e| DeployError::Bundle(format!("invalid functions manifest: {e}")))?;

    let now_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default();
    let age = Duration::from_millis(now_ms.saturating_sub(manifest.timestamp));
    if age > max_age {
        return Err(DeployError::Bundle(format!(
            "functions manifest expired ({}s old)",
            age.as_secs()
        )));
    }

    let base = path.parent().unwrap_or(Path::new("."));
    let artifacts: Vec<_> = manifest
        .functions
        .into_iter()
        .map(|f| f.into_artifact(base))
        .collect();
    debug!(path = %path.display(), count = artifacts.len(), "functions manifest loaded");
    Ok(artifacts)
}
