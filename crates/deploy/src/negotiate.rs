//! Manifest negotiation with the asset store.

use sitesync_protocol::{CreateDeployRequest, DeployRecord};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::DeployError;
use crate::manifest::DeployManifest;
use crate::options::DeployOptions;
use crate::poll::Poller;
use crate::store::AssetStore;
use crate::types::{DeployConfig, UploadTask};

/// What the store asked for.
#[derive(Debug, Clone)]
pub struct Negotiated {
    pub record: DeployRecord,
    /// Required files first, then required functions.
    pub upload_list: Vec<UploadTask>,
}

/// Submits manifests and resolves the store's required lists.
pub struct Negotiator<'a> {
    store: &'a dyn AssetStore,
    options: &'a DeployOptions,
    cancel: CancellationToken,
}

impl<'a> Negotiator<'a> {
    pub fn new(
        store: &'a dyn AssetStore,
        options: &'a DeployOptions,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            options,
            cancel,
        }
    }

    fn diffs_async(&self, manifest: &DeployManifest) -> bool {
        manifest.files.len() > self.options.async_threshold
    }

    /// Request body for `manifest`. Large file manifests ask the store to
    /// diff asynchronously.
    pub fn build_request(&self, config: &DeployConfig, manifest: &DeployManifest) -> CreateDeployRequest {
        CreateDeployRequest {
            files: manifest.files.manifest.clone(),
            functions: manifest.functions.manifest.clone(),
            function_schedules: manifest.function_schedules(),
            functions_config: manifest.functions_config(),
            async_diff: self.diffs_async(manifest),
            branch: config.branch.clone(),
            draft: config.draft,
            // Titles only apply to new deploys.
            title: match config.deploy_id {
                Some(_) => None,
                None => config.title.clone(),
            },
        }
    }

    /// Creates (or updates) the deploy and resolves what must be uploaded.
    pub async fn negotiate(
        &self,
        config: &DeployConfig,
        manifest: &DeployManifest,
    ) -> Result<Negotiated, DeployError> {
        let record = self.submit(config, manifest).await?;
        self.resolve(manifest, record).await
    }

    /// Sends the manifests. The returned deploy exists on the store even if
    /// it has not been diffed yet.
    pub async fn submit(
        &self,
        config: &DeployConfig,
        manifest: &DeployManifest,
    ) -> Result<DeployRecord, DeployError> {
        let request = self.build_request(config, manifest);

        let call = async {
            match &config.deploy_id {
                Some(deploy_id) => {
                    self.store
                        .update_deploy(&config.site_id, deploy_id, &request)
                        .await
                }
                None => self.store.create_deploy(&config.site_id, &request).await,
            }
        };
        let record = tokio::select! {
            _ = self.cancel.cancelled() => return Err(DeployError::Cancelled),
            record = call => record.map_err(DeployError::Negotiation)?,
        };
        info!(
            deploy_id = %record.id,
            files = request.files.len(),
            functions = request.functions.len(),
            async_diff = request.async_diff,
            "deploy negotiated"
        );
        Ok(record)
    }

    /// Waits for the store's diff when it is still running, then maps the
    /// required lists onto upload tasks.
    pub async fn resolve(
        &self,
        manifest: &DeployManifest,
        mut record: DeployRecord,
    ) -> Result<Negotiated, DeployError> {
        if self.diffs_async(manifest) && !record.state.is_diffed() {
            debug!(deploy_id = %record.id, state = ?record.state, "waiting for asynchronous diff");
            let poller = Poller::new(
                self.store,
                self.options.poll_interval(),
                self.options.deploy_timeout(),
                self.cancel.clone(),
            );
            record = poller.wait_for_diff(&record.id).await?;
        }

        let upload_list = manifest.upload_list(&record)?;
        Ok(Negotiated {
            record,
            upload_list,
        })
    }
}
