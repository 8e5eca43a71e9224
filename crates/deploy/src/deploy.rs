//! Deploy orchestrator.
//!
//! Runs one deploy through the lifecycle
//! `Idle → Hashing → Negotiating → Uploading → Polling → Ready`, failing
//! into `Failed` or `Cancelled` from any live state. Status events are
//! delivered synchronously to the caller's callback at each phase boundary
//! and progress tick.

use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::build_cache::{BuildCache, BuildError, BuildOutcome};
use crate::error::DeployError;
use crate::functions::{FUNCTIONS_MANIFEST_FILE, FunctionBundler, function_entries, read_functions_manifest};
use crate::hasher::Hasher;
use crate::manifest::{DeployManifest, ManifestBuilder};
use crate::negotiate::Negotiator;
use crate::options::DeployOptions;
use crate::poll::Poller;
use crate::state::{StateMachine, SyncState};
use crate::store::AssetStore;
use crate::types::{
    DeployConfig, DeployEvent, DeployOutcome, EventKind, EventPhase, FunctionArtifact,
    FunctionsInput, StatusCallback,
};
use crate::upload::Uploader;
use crate::walker::Walker;

/// Build cache shared across deploys for bundled functions.
pub type FunctionsBuildCache = BuildCache<Vec<FunctionArtifact>>;

/// Delivers status events to the optional callback.
#[derive(Default)]
struct Reporter {
    callback: Option<StatusCallback>,
}

impl Reporter {
    fn emit(&self, event: DeployEvent) {
        if let Some(callback) = &self.callback {
            callback(&event);
        }
    }

    fn phase(&self, kind: EventKind, phase: EventPhase, msg: impl Into<String>) {
        self.emit(DeployEvent::new(kind, phase, msg));
    }
}

/// Sequences walking, hashing, negotiation, uploads and polling for one
/// deploy at a time.
pub struct DeployOrchestrator<'a> {
    store: &'a dyn AssetStore,
    options: DeployOptions,
    reporter: Reporter,
    cancel: CancellationToken,
    state: StateMachine,
    bundler: Option<Arc<dyn FunctionBundler>>,
    build_cache: Option<&'a FunctionsBuildCache>,
}

impl<'a> DeployOrchestrator<'a> {
    pub fn new(store: &'a dyn AssetStore, options: DeployOptions) -> Self {
        Self {
            store,
            options,
            reporter: Reporter::default(),
            cancel: CancellationToken::new(),
            state: StateMachine::new(),
            bundler: None,
            build_cache: None,
        }
    }

    pub fn with_status_callback(mut self, callback: StatusCallback) -> Self {
        self.reporter.callback = Some(callback);
        self
    }

    /// Bundler for `FunctionsInput::Source`, optionally memoized through a
    /// cache that outlives this orchestrator.
    pub fn with_bundler(
        mut self,
        bundler: Arc<dyn FunctionBundler>,
        cache: Option<&'a FunctionsBuildCache>,
    ) -> Self {
        self.bundler = Some(bundler);
        self.build_cache = cache;
        self
    }

    /// Uses a caller-owned cancellation token.
    pub fn with_cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that cancels the running deploy.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> SyncState {
        self.state.current()
    }

    /// States visited so far, `Idle` first.
    pub fn history(&self) -> &[SyncState] {
        self.state.history()
    }

    /// Runs one deploy to a terminal state.
    pub async fn deploy(&mut self, config: DeployConfig) -> Result<DeployOutcome, DeployError> {
        if self.state.current() != SyncState::Idle {
            return Err(DeployError::Config(format!(
                "orchestrator already used (state {})",
                self.state.current()
            )));
        }

        let mut deploy_id = config.deploy_id.clone();
        let result = self.run(&config, &mut deploy_id).await;

        if let Err(err) = &result {
            let failed_in = self.state.current();
            if err.is_cancelled() || self.cancel.is_cancelled() {
                self.settle(SyncState::Cancelled);
                info!(deploy_id = deploy_id.as_deref().unwrap_or("-"), "deploy cancelled");
                if let Some(id) = &deploy_id {
                    if let Err(e) = self.store.cancel_deploy(id).await {
                        warn!(deploy_id = %id, error = %e, "failed to cancel deploy on the store");
                    }
                }
            } else {
                self.settle(SyncState::Failed);
                error!(
                    deploy_id = deploy_id.as_deref().unwrap_or("-"),
                    state = %failed_in,
                    error = %err,
                    "deploy failed"
                );
            }
            if let Some(kind) = event_kind(failed_in) {
                self.reporter.phase(kind, EventPhase::Error, err.to_string());
            }
        }
        result
    }

    async fn run(
        &mut self,
        config: &DeployConfig,
        deploy_id: &mut Option<String>,
    ) -> Result<DeployOutcome, DeployError> {
        // Hashing
        self.state.transition(SyncState::Hashing)?;
        self.options.validate()?;
        let manifest = self.hash(config).await?;
        self.check_cancelled()?;

        // Negotiating
        self.state.transition(SyncState::Negotiating)?;
        self.reporter
            .phase(EventKind::CreateDeploy, EventPhase::Start, "CDN diffing files...");
        let negotiator = Negotiator::new(self.store, &self.options, self.cancel.clone());
        let record = negotiator.submit(config, &manifest).await?;
        let id = record.id.clone();
        *deploy_id = Some(id.clone());
        let negotiated = negotiator.resolve(&manifest, record).await?;
        self.reporter.phase(
            EventKind::CreateDeploy,
            EventPhase::Stop,
            format!(
                "CDN requesting {} files and {} functions",
                negotiated.record.required.len(),
                negotiated.record.required_functions.len()
            ),
        );
        self.check_cancelled()?;

        // Uploading
        let upload_list = negotiated.upload_list;
        let total = upload_list.len();
        let mut upload_stats = Default::default();
        let finished = if upload_list.is_empty() {
            debug!(deploy_id = %id, "nothing to upload");
            Vec::new()
        } else {
            self.state.transition(SyncState::Uploading)?;
            self.reporter.phase(
                EventKind::Upload,
                EventPhase::Start,
                format!("Uploading {total} files"),
            );
            let uploader = Uploader::new(
                self.store,
                &id,
                self.options.concurrent_upload,
                self.options.retry.clone(),
                self.cancel.clone(),
            );
            let reporter = &self.reporter;
            let finished = uploader
                .upload_all(upload_list, |done, total, task| {
                    reporter.emit(DeployEvent::progress(
                        EventKind::Upload,
                        done,
                        total,
                        format!("({done}/{total}) Uploading {}...", task.normalized_path),
                    ));
                })
                .await?;
            upload_stats = uploader.stats().snapshot();
            self.reporter.phase(
                EventKind::Upload,
                EventPhase::Stop,
                format!("Finished uploading {total} assets"),
            );
            finished
        };
        self.check_cancelled()?;

        // Polling
        self.state.transition(SyncState::Polling)?;
        self.reporter.phase(
            EventKind::WaitForDeploy,
            EventPhase::Start,
            "Waiting for deploy to go live...",
        );
        let record = Poller::new(
            self.store,
            self.options.poll_interval(),
            self.options.deploy_timeout(),
            self.cancel.clone(),
        )
        .wait_for_deploy(&id)
        .await?;

        self.state.transition(SyncState::Ready)?;
        let live = if config.draft {
            "Draft deploy is live!"
        } else {
            "Deploy is live!"
        };
        self.reporter
            .phase(EventKind::WaitForDeploy, EventPhase::Stop, live);

        let site_url = record.live_url(config.draft).map(str::to_string);
        info!(
            deploy_id = %id,
            uploaded = finished.len(),
            url = site_url.as_deref().unwrap_or("-"),
            "deploy is live"
        );
        Ok(DeployOutcome {
            deploy_id: id,
            record,
            upload_list: finished,
            site_url,
            upload_stats,
        })
    }

    /// Walks, hashes and reduces everything into the deploy manifest.
    async fn hash(&self, config: &DeployConfig) -> Result<DeployManifest, DeployError> {
        self.reporter
            .phase(EventKind::Hashing, EventPhase::Start, "Hashing files...");

        let walker = Walker::new(config.dirs.iter().cloned()).with_filter(config.filter.clone());
        let entries = tokio::task::spawn_blocking(move || walker.collect_entries())
            .await
            .map_err(std::io::Error::other)??;

        let artifacts = self.resolve_functions(&config.functions).await?;
        warn_native_modules(&artifacts);
        let function_entries = function_entries(&artifacts)?;

        let mut builder = ManifestBuilder::new();
        let reporter = &self.reporter;
        let file_count = entries.len();
        let progress = |done: usize, total: usize| {
            reporter.emit(DeployEvent::progress(
                EventKind::Hashing,
                done,
                total,
                format!("Hashing {done}/{total} files"),
            ));
        };
        Hasher::new(self.options.hash_algorithm, self.options.concurrent_hash)
            .hash_into(entries, &mut builder, &self.cancel, progress)
            .await?;
        Hasher::new(
            self.options.function_hash_algorithm,
            self.options.concurrent_hash,
        )
        .hash_into(function_entries, &mut builder, &self.cancel, |_, _| {})
        .await?;

        if let Some(site_config) = &config.site_config {
            builder.inject_config(
                site_config,
                &self.options.config_file_name,
                self.options.hash_algorithm,
            )?;
        }

        let manifest = builder.finish();
        let files = manifest.files.len();
        let functions = manifest.functions.len();
        debug!(walked = file_count, files, functions, "manifest complete");
        self.reporter.phase(
            EventKind::Hashing,
            EventPhase::Stop,
            format!("Finished hashing {}", count_summary(files, functions)),
        );

        if manifest.is_empty() {
            return Err(DeployError::NoContent);
        }
        if let Some(limit) = self.options.sync_file_limit {
            let count = files + functions;
            if count > limit {
                return Err(DeployError::FileLimitExceeded { count, limit });
            }
        }
        Ok(manifest)
    }

    async fn resolve_functions(
        &self,
        input: &FunctionsInput,
    ) -> Result<Vec<FunctionArtifact>, DeployError> {
        match input {
            FunctionsInput::None => Ok(Vec::new()),
            FunctionsInput::Prebuilt(artifacts) => Ok(artifacts.clone()),
            FunctionsInput::Source(dir) => self.functions_from_source(dir).await,
        }
    }

    /// Uses a fresh bundler manifest when present, otherwise bundles
    /// (through the build cache when one is attached).
    async fn functions_from_source(&self, dir: &Path) -> Result<Vec<FunctionArtifact>, DeployError> {
        let kind = EventKind::FunctionsManifest;
        self.reporter
            .phase(kind, EventPhase::Start, "Looking for a functions cache...");

        let manifest_path = dir.join(FUNCTIONS_MANIFEST_FILE);
        if manifest_path.is_file() {
            match read_functions_manifest(&manifest_path, self.options.build_debounce()) {
                Ok(artifacts) => {
                    self.reporter
                        .phase(kind, EventPhase::Stop, "Deploying functions from cache");
                    return Ok(artifacts);
                }
                Err(e) => {
                    debug!(path = %manifest_path.display(), error = %e, "functions cache unusable");
                    self.reporter.phase(
                        kind,
                        EventPhase::Stop,
                        "Ignored invalid or expired functions cache",
                    );
                }
            }
        } else {
            self.reporter
                .phase(kind, EventPhase::Stop, "No cached functions were found");
        }

        let Some(bundler) = &self.bundler else {
            return Err(DeployError::Bundle(format!(
                "no function bundler configured for {}",
                dir.display()
            )));
        };

        let Some(cache) = self.build_cache else {
            return bundler.bundle(dir).await;
        };

        let bundler = Arc::clone(bundler);
        let source = dir.to_path_buf();
        let key = dir.to_string_lossy().into_owned();
        let (outcome, result) = cache
            .request(&key, move || async move {
                bundler
                    .bundle(&source)
                    .await
                    .map_err(|e| BuildError::Failed(e.to_string()))
            })
            .await;
        if outcome != BuildOutcome::Started {
            info!(dir = %dir.display(), ?outcome, "reusing functions build");
        }
        result.map_err(|e| DeployError::Bundle(e.to_string()))
    }

    fn check_cancelled(&self) -> Result<(), DeployError> {
        if self.cancel.is_cancelled() {
            return Err(DeployError::Cancelled);
        }
        Ok(())
    }

    fn settle(&mut self, terminal: SyncState) {
        if let Err(e) = self.state.transition(terminal) {
            warn!(error = %e, "could not record terminal state");
        }
    }
}

fn event_kind(state: SyncState) -> Option<EventKind> {
    match state {
        SyncState::Hashing => Some(EventKind::Hashing),
        SyncState::Negotiating => Some(EventKind::CreateDeploy),
        SyncState::Uploading => Some(EventKind::Upload),
        SyncState::Polling => Some(EventKind::WaitForDeploy),
        _ => None,
    }
}

fn warn_native_modules(artifacts: &[FunctionArtifact]) {
    let names: Vec<&str> = artifacts
        .iter()
        .filter(|a| !a.metadata.native_modules.is_empty())
        .map(|a| a.metadata.name.as_str())
        .collect();
    if !names.is_empty() {
        warn!(
            functions = ?names,
            "functions bundle modules with native dependencies; they must be built for \
             the same architecture as the function runtime"
        );
    }
}

/// "3 files", "2 functions", "3 files and 2 functions".
fn count_summary(files: usize, functions: usize) -> String {
    match (files, functions) {
        (0, 0) => "0 files".to_string(),
        (f, 0) => format!("{f} files"),
        (0, n) => format!("{n} functions"),
        (f, n) => format!("{f} files and {n} functions"),
    }
}
