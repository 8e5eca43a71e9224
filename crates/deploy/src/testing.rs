//! Test fixtures shared by the deploy modules.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sitesync_protocol::{CreateDeployRequest, DeployRecord, DeployState, FunctionUploadParams};
use sitesync_transfer::{HashAlgorithm, UploadSource, checksum_bytes};
use tokio_util::sync::CancellationToken;

use crate::store::{AssetStore, StoreError, StoreFuture};
use crate::types::{AssetKind, FileEntry, FunctionMetadata, HashedFile};

pub(crate) const DEPLOY_ID: &str = "deploy-1";

pub(crate) fn hashed(path: &str, content: &[u8]) -> HashedFile {
    let absolute = PathBuf::from("/site").join(path);
    HashedFile {
        entry: FileEntry {
            root_dir: PathBuf::from("/site"),
            absolute_path: absolute,
            relative_path: PathBuf::from(path),
            normalized_path: path.to_string(),
            size: content.len() as u64,
            asset: AssetKind::File,
            contents: None,
        },
        digest: checksum_bytes(HashAlgorithm::Sha1, content),
    }
}

pub(crate) fn function_hashed(name: &str, content: &[u8], meta: FunctionMetadata) -> HashedFile {
    let mut file = hashed(name, content);
    file.entry.absolute_path = PathBuf::from("/functions").join(format!("{name}.zip"));
    file.entry.asset = AssetKind::Function(Arc::new(meta));
    file
}

/// A recorded upload call.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct UploadCall {
    pub path: String,
    pub function: bool,
    pub retry_count: u32,
    pub params: Option<FunctionUploadParams>,
}

/// In-memory store with scripted responses.
#[derive(Default)]
pub(crate) struct MockStore {
    required: Mutex<Vec<String>>,
    required_functions: Mutex<Vec<String>>,
    initial_state: Mutex<Option<DeployState>>,
    create_error: Mutex<Option<StoreError>>,
    upload_failures: Mutex<HashMap<String, VecDeque<StoreError>>>,
    poll_states: Mutex<VecDeque<DeployState>>,
    upload_delay: Mutex<Duration>,
    cancel_on_upload: Mutex<Option<CancellationToken>>,

    pub create_calls: Mutex<Vec<CreateDeployRequest>>,
    pub update_calls: Mutex<Vec<(String, CreateDeployRequest)>>,
    pub uploads: Mutex<Vec<UploadCall>>,
    pub poll_calls: AtomicUsize,
    pub cancel_calls: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    pub peak_in_flight: AtomicUsize,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_required(self, files: &[&str], functions: &[&str]) -> Self {
        *self.required.lock().unwrap() = files.iter().map(|s| s.to_string()).collect();
        *self.required_functions.lock().unwrap() =
            functions.iter().map(|s| s.to_string()).collect();
        self
    }

    /// State returned by create/update; `Prepared` by default.
    pub fn with_initial_state(self, state: DeployState) -> Self {
        *self.initial_state.lock().unwrap() = Some(state);
        self
    }

    pub fn with_create_error(self, err: StoreError) -> Self {
        *self.create_error.lock().unwrap() = Some(err);
        self
    }

    /// Upload of `path` fails with these statuses, in order, then succeeds.
    pub fn fail_upload(self, path: &str, statuses: &[u16]) -> Self {
        let errors = statuses
            .iter()
            .map(|&status| StoreError::Status {
                status,
                body: format!("scripted {status}"),
            })
            .collect();
        self.upload_failures
            .lock()
            .unwrap()
            .insert(path.to_string(), errors);
        self
    }

    /// States returned by successive polls; `Ready` once exhausted.
    pub fn with_poll_states(self, states: &[DeployState]) -> Self {
        *self.poll_states.lock().unwrap() = states.iter().copied().collect();
        self
    }

    pub fn with_upload_delay(self, delay: Duration) -> Self {
        *self.upload_delay.lock().unwrap() = delay;
        self
    }

    /// Fires `token` when the first upload starts.
    pub fn cancel_on_upload(self, token: CancellationToken) -> Self {
        *self.cancel_on_upload.lock().unwrap() = Some(token);
        self
    }

    pub fn upload_count(&self, path: &str) -> usize {
        self.uploads
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.path == path)
            .count()
    }

    fn record(&self, id: &str) -> Result<DeployRecord, StoreError> {
        if let Some(err) = self.create_error.lock().unwrap().take() {
            return Err(err);
        }
        let state = self
            .initial_state
            .lock()
            .unwrap()
            .unwrap_or(DeployState::Prepared);
        let mut record = DeployRecord::new(id, state);
        record.required = self.required.lock().unwrap().clone();
        record.required_functions = self.required_functions.lock().unwrap().clone();
        Ok(record)
    }

    async fn upload(
        &self,
        path: &str,
        function: bool,
        retry_count: u32,
        params: Option<FunctionUploadParams>,
    ) -> Result<(), StoreError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(token) = self.cancel_on_upload.lock().unwrap().take() {
            token.cancel();
        }
        let delay = *self.upload_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        self.uploads.lock().unwrap().push(UploadCall {
            path: path.to_string(),
            function,
            retry_count,
            params,
        });
        let failure = self
            .upload_failures
            .lock()
            .unwrap()
            .get_mut(path)
            .and_then(|queue| queue.pop_front());

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl AssetStore for MockStore {
    fn create_deploy<'a>(
        &'a self,
        _site_id: &'a str,
        request: &'a CreateDeployRequest,
    ) -> StoreFuture<'a, DeployRecord> {
        Box::pin(async move {
            self.create_calls.lock().unwrap().push(request.clone());
            self.record(DEPLOY_ID)
        })
    }

    fn update_deploy<'a>(
        &'a self,
        _site_id: &'a str,
        deploy_id: &'a str,
        request: &'a CreateDeployRequest,
    ) -> StoreFuture<'a, DeployRecord> {
        Box::pin(async move {
            self.update_calls
                .lock()
                .unwrap()
                .push((deploy_id.to_string(), request.clone()));
            self.record(deploy_id)
        })
    }

    fn upload_file<'a>(
        &'a self,
        _deploy_id: &'a str,
        path: &'a str,
        _body: &'a UploadSource,
    ) -> StoreFuture<'a, ()> {
        Box::pin(self.upload(path, false, 0, None))
    }

    fn upload_function<'a>(
        &'a self,
        _deploy_id: &'a str,
        name: &'a str,
        _body: &'a UploadSource,
        params: &'a FunctionUploadParams,
        retry_count: u32,
    ) -> StoreFuture<'a, ()> {
        Box::pin(self.upload(name, true, retry_count, Some(params.clone())))
    }

    fn get_deploy<'a>(&'a self, deploy_id: &'a str) -> StoreFuture<'a, DeployRecord> {
        Box::pin(async move {
            self.poll_calls.fetch_add(1, Ordering::SeqCst);
            let state = self
                .poll_states
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(DeployState::Ready);
            let mut record = DeployRecord::new(deploy_id, state);
            record.required = self.required.lock().unwrap().clone();
            record.required_functions = self.required_functions.lock().unwrap().clone();
            if state == DeployState::Error {
                record.error_message = Some("build exploded".into());
            }
            record.ssl_url = Some("https://example.test".into());
            record.deploy_ssl_url = Some(format!("https://{deploy_id}--example.test"));
            Ok(record)
        })
    }

    fn cancel_deploy<'a>(&'a self, deploy_id: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.cancel_calls.lock().unwrap().push(deploy_id.to_string());
            Ok(())
        })
    }
}
