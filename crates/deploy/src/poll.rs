//! Deploy state polling.

use std::time::Duration;

use sitesync_protocol::{DeployRecord, DeployState};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::DeployError;
use crate::store::AssetStore;

/// Polls `get_deploy` until a target state, an error state or the timeout.
pub struct Poller<'a> {
    store: &'a dyn AssetStore,
    interval: Duration,
    timeout: Duration,
    cancel: CancellationToken,
}

impl<'a> Poller<'a> {
    pub fn new(
        store: &'a dyn AssetStore,
        interval: Duration,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            interval,
            timeout,
            cancel,
        }
    }

    /// Waits until the deploy is live.
    pub async fn wait_for_deploy(&self, deploy_id: &str) -> Result<DeployRecord, DeployError> {
        self.wait_until(deploy_id, |state| state == DeployState::Ready)
            .await
    }

    /// Waits until an asynchronously diffed deploy knows its required lists.
    pub async fn wait_for_diff(&self, deploy_id: &str) -> Result<DeployRecord, DeployError> {
        self.wait_until(deploy_id, DeployState::is_diffed).await
    }

    async fn wait_until<F>(&self, deploy_id: &str, done: F) -> Result<DeployRecord, DeployError>
    where
        F: Fn(DeployState) -> bool,
    {
        match tokio::time::timeout(self.timeout, self.poll_loop(deploy_id, done)).await {
            Ok(result) => result,
            Err(_) => Err(DeployError::PollTimeout {
                deploy_id: deploy_id.to_string(),
                timeout: self.timeout,
            }),
        }
    }

    async fn poll_loop<F>(&self, deploy_id: &str, done: F) -> Result<DeployRecord, DeployError>
    where
        F: Fn(DeployState) -> bool,
    {
        loop {
            let polled = tokio::select! {
                _ = self.cancel.cancelled() => return Err(DeployError::Cancelled),
                polled = self.store.get_deploy(deploy_id) => polled,
            };

            match polled {
                Ok(record) if done(record.state) => return Ok(record),
                // A terminal state that is not the awaited one is a failure.
                Ok(record) if record.state.is_terminal() => {
                    return Err(DeployError::DeployFailed {
                        deploy_id: deploy_id.to_string(),
                        message: record
                            .error_message
                            .unwrap_or_else(|| format!("deploy is {:?}", record.state)),
                    });
                }
                Ok(record) => debug!(deploy_id, state = ?record.state, "deploy not ready yet"),
                Err(err) if err.is_transient() => {
                    warn!(deploy_id, error = %err, "deploy status unavailable, polling again");
                }
                Err(source) => {
                    return Err(DeployError::Poll {
                        deploy_id: deploy_id.to_string(),
                        source,
                    });
                }
            }

            tokio::select! {
                _ = self.cancel.cancelled() => return Err(DeployError::Cancelled),
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }
}
