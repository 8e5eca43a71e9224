//! Data types for the deploy flow.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sitesync_protocol::{DeployRecord, FunctionConfig, FunctionUploadParams};
use sitesync_transfer::UploadSource;

use crate::upload::UploadStatsSnapshot;
use crate::walker::KeepFilter;

/// Metadata the bundler reports for one built function.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FunctionMetadata {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invocation_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generator: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
    /// Native modules bundled into the artifact.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub native_modules: Vec<String>,
}

impl FunctionMetadata {
    /// Runtime metadata sent with the upload. A pinned runtime version wins
    /// over the generic runtime name.
    pub fn upload_params(&self) -> FunctionUploadParams {
        FunctionUploadParams {
            runtime: self.runtime_version.clone().or_else(|| self.runtime.clone()),
            invocation_mode: self.invocation_mode.clone(),
            timeout: self.timeout,
        }
    }

    /// Settings forwarded in the deploy request's `functions_config`.
    pub fn config(&self) -> FunctionConfig {
        FunctionConfig {
            display_name: self.display_name.clone(),
            generator: self.generator.clone(),
            routes: self.routes.clone(),
            build_data: self.build_data.clone(),
            priority: self.priority,
        }
    }
}

/// What kind of asset an entry is, resolved when the entry is created.
#[derive(Debug, Clone, PartialEq)]
pub enum AssetKind {
    /// A static file served as-is.
    File,
    /// A pre-built function artifact.
    Function(Arc<FunctionMetadata>),
}

impl AssetKind {
    pub fn is_function(&self) -> bool {
        matches!(self, Self::Function(_))
    }

    /// Label used in logs and errors.
    pub fn label(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Function(_) => "function",
        }
    }
}

/// A candidate file produced by the walker.
#[derive(Debug, Clone, PartialEq)]
pub struct FileEntry {
    pub root_dir: PathBuf,
    pub absolute_path: PathBuf,
    pub relative_path: PathBuf,
    /// Forward-slash manifest key (function name for functions).
    pub normalized_path: String,
    pub size: u64,
    pub asset: AssetKind,
    /// In-memory body for synthetic entries; read from disk when `None`.
    pub contents: Option<Arc<[u8]>>,
}

impl FileEntry {
    /// Where the upload body for this entry comes from.
    pub fn source(&self) -> UploadSource {
        match &self.contents {
            Some(bytes) => UploadSource::Inline(Arc::clone(bytes)),
            None => UploadSource::File(self.absolute_path.clone()),
        }
    }
}

/// A file entry together with its content digest.
#[derive(Debug, Clone, PartialEq)]
pub struct HashedFile {
    pub entry: FileEntry,
    pub digest: String,
}

/// Output of the function bundler for one function.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionArtifact {
    /// Path of the built archive.
    pub path: PathBuf,
    pub metadata: FunctionMetadata,
}

/// One unit of work for the uploader.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadTask {
    pub normalized_path: String,
    pub digest: String,
    pub asset: AssetKind,
    pub source: UploadSource,
    /// Attempts made so far.
    pub attempt: u32,
}

/// Which part of the deploy an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Hashing,
    FunctionsManifest,
    CreateDeploy,
    Upload,
    WaitForDeploy,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Hashing => "hashing",
            Self::FunctionsManifest => "functions-manifest",
            Self::CreateDeploy => "create-deploy",
            Self::Upload => "upload",
            Self::WaitForDeploy => "wait-for-deploy",
        };
        f.write_str(name)
    }
}

/// Position of an event within its part of the deploy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventPhase {
    Start,
    Progress,
    Error,
    Stop,
}

/// Status event delivered to the caller's callback.
#[derive(Debug, Clone, PartialEq)]
pub struct DeployEvent {
    pub kind: EventKind,
    pub phase: EventPhase,
    pub msg: String,
    /// `(current, total)` for progress ticks.
    pub progress: Option<(usize, usize)>,
}

impl DeployEvent {
    pub fn new(kind: EventKind, phase: EventPhase, msg: impl Into<String>) -> Self {
        Self {
            kind,
            phase,
            msg: msg.into(),
            progress: None,
        }
    }

    pub fn progress(kind: EventKind, current: usize, total: usize, msg: impl Into<String>) -> Self {
        Self {
            kind,
            phase: EventPhase::Progress,
            msg: msg.into(),
            progress: Some((current, total)),
        }
    }
}

/// Callback invoked synchronously with every status event.
pub type StatusCallback = Box<dyn Fn(&DeployEvent) + Send + Sync>;

/// Where the deploy's functions come from.
#[derive(Debug, Clone, Default)]
pub enum FunctionsInput {
    #[default]
    None,
    /// Artifacts built ahead of time.
    Prebuilt(Vec<FunctionArtifact>),
    /// A source directory handed to the orchestrator's bundler.
    Source(PathBuf),
}

/// What to deploy.
#[derive(Clone, Default)]
pub struct DeployConfig {
    pub site_id: String,
    /// Publish directories, walked in order.
    pub dirs: Vec<PathBuf>,
    pub functions: FunctionsInput,
    /// Site configuration, injected into the manifest as one entry.
    pub site_config: Option<toml::Table>,
    /// Extra keep predicate applied after the default ignore rules.
    pub filter: Option<KeepFilter>,
    pub branch: Option<String>,
    /// Deploy title; only sent when creating a new deploy.
    pub title: Option<String>,
    pub draft: bool,
    /// Reuse a deploy created earlier instead of creating one.
    pub deploy_id: Option<String>,
}

impl fmt::Debug for DeployConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeployConfig")
            .field("site_id", &self.site_id)
            .field("dirs", &self.dirs)
            .field("functions", &self.functions)
            .field("site_config", &self.site_config.is_some())
            .field("filter", &self.filter.is_some())
            .field("branch", &self.branch)
            .field("title", &self.title)
            .field("draft", &self.draft)
            .field("deploy_id", &self.deploy_id)
            .finish()
    }
}

/// Result of a deploy that reached `ready`.
#[derive(Debug, Clone)]
pub struct DeployOutcome {
    pub deploy_id: String,
    pub record: DeployRecord,
    pub upload_list: Vec<UploadTask>,
    /// Draft permalink for draft deploys, site URL otherwise.
    pub site_url: Option<String>,
    pub upload_stats: UploadStatsSnapshot,
}
