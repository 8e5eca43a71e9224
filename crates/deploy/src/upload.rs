//! Bounded-concurrency uploads with retry and backoff.
//!
//! Tasks are dispatched in list order with at most `concurrency` uploads in
//! flight. Transient store failures are retried with exponential backoff
//! until the [`RetryPolicy`] budget is spent. The first fatal error stops
//! further dispatch; uploads already in flight are allowed to finish.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures_util::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::DeployError;
use crate::options::RetryPolicy;
use crate::store::{AssetStore, StoreError};
use crate::types::{AssetKind, UploadTask};

/// Live upload counters.
#[derive(Debug, Default)]
pub struct UploadStats {
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    attempts: AtomicUsize,
    completed: AtomicUsize,
}

impl UploadStats {
    fn begin(&self) {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
    }

    fn end(&self, success: bool) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if success {
            self.completed.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub fn snapshot(&self) -> UploadStatsSnapshot {
        UploadStatsSnapshot {
            in_flight: self.in_flight.load(Ordering::SeqCst),
            peak_in_flight: self.peak_in_flight.load(Ordering::SeqCst),
            attempts: self.attempts.load(Ordering::SeqCst),
            completed: self.completed.load(Ordering::SeqCst),
        }
    }
}

/// Point-in-time copy of [`UploadStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadStatsSnapshot {
    pub in_flight: usize,
    pub peak_in_flight: usize,
    /// Store calls made, retries included.
    pub attempts: usize,
    pub completed: usize,
}

/// Uploads required content for one deploy.
pub struct Uploader<'a> {
    store: &'a dyn AssetStore,
    deploy_id: &'a str,
    concurrency: usize,
    retry: RetryPolicy,
    cancel: CancellationToken,
    stats: Arc<UploadStats>,
}

impl<'a> Uploader<'a> {
    pub fn new(
        store: &'a dyn AssetStore,
        deploy_id: &'a str,
        concurrency: usize,
        retry: RetryPolicy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            deploy_id,
            concurrency: concurrency.max(1),
            retry,
            cancel,
            stats: Arc::new(UploadStats::default()),
        }
    }

    /// Shared handle to the counters, readable while uploads run.
    pub fn stats(&self) -> Arc<UploadStats> {
        Arc::clone(&self.stats)
    }

    /// Uploads every task.
    ///
    /// `on_complete` is called with `(done, total, task)` after each
    /// successful upload. Returns the finished tasks in completion order,
    /// each carrying the number of attempts it took.
    pub async fn upload_all<F>(
        &self,
        tasks: Vec<UploadTask>,
        mut on_complete: F,
    ) -> Result<Vec<UploadTask>, DeployError>
    where
        F: FnMut(usize, usize, &UploadTask),
    {
        let total = tasks.len();
        let stop = self.cancel.child_token();

        let mut results = stream::iter(tasks.into_iter().map(|task| {
            let stop = stop.clone();
            async move {
                if stop.is_cancelled() {
                    return None;
                }
                Some(self.upload_one(task, &stop).await)
            }
        }))
        .buffer_unordered(self.concurrency);

        let mut finished = Vec::with_capacity(total);
        let mut first_error: Option<DeployError> = None;
        let mut skipped = 0;

        while let Some(result) = results.next().await {
            match result {
                Some(Ok(task)) => {
                    on_complete(finished.len() + 1, total, &task);
                    finished.push(task);
                }
                Some(Err(err)) => {
                    if first_error.is_none() {
                        stop.cancel();
                        first_error = Some(err);
                    }
                }
                None => skipped += 1,
            }
        }

        if let Some(err) = first_error {
            return Err(err);
        }
        if skipped > 0 {
            debug!(skipped, "uploads not dispatched after cancellation");
            return Err(DeployError::Cancelled);
        }
        Ok(finished)
    }

    async fn upload_one(
        &self,
        mut task: UploadTask,
        stop: &CancellationToken,
    ) -> Result<UploadTask, DeployError> {
        loop {
            let retry_count = task.attempt;
            task.attempt += 1;

            self.stats.begin();
            let result = self.send(&task, retry_count).await;
            self.stats.end(result.is_ok());

            let err = match result {
                Ok(()) => {
                    debug!(
                        path = %task.normalized_path,
                        kind = task.asset.label(),
                        attempts = task.attempt,
                        "uploaded"
                    );
                    return Ok(task);
                }
                Err(err) => err,
            };

            if !err.is_transient() || task.attempt >= self.retry.max_retry {
                return Err(DeployError::UploadFatal {
                    path: task.normalized_path,
                    attempts: task.attempt,
                    source: err,
                });
            }

            let delay = self.retry.delay_for_attempt(retry_count);
            warn!(
                path = %task.normalized_path,
                attempt = task.attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "upload failed, retrying"
            );
            tokio::select! {
                _ = stop.cancelled() => return Err(DeployError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn send(&self, task: &UploadTask, retry_count: u32) -> Result<(), StoreError> {
        match &task.asset {
            AssetKind::File => {
                self.store
                    .upload_file(self.deploy_id, &task.normalized_path, &task.source)
                    .await
            }
            AssetKind::Function(meta) => {
                let params = meta.upload_params();
                self.store
                    .upload_function(
                        self.deploy_id,
                        &task.normalized_path,
                        &task.source,
                        &params,
                        retry_count,
                    )
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{DEPLOY_ID, MockStore};
    use crate::types::FunctionMetadata;
    use sitesync_transfer::UploadSource;
    use std::path::PathBuf;
    use std::time::Duration;

    fn task(path: &str) -> UploadTask {
        UploadTask {
            normalized_path: path.to_string(),
            digest: format!("digest-{path}"),
            asset: AssetKind::File,
            source: UploadSource::File(PathBuf::from("/site").join(path)),
            attempt: 0,
        }
    }

    fn policy(max_retry: u32) -> RetryPolicy {
        RetryPolicy {
            max_retry,
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried() {
        let store = MockStore::new().fail_upload("a.txt", &[500, 500]);
        let uploader = Uploader::new(&store, DEPLOY_ID, 5, policy(3), CancellationToken::new());

        let done = uploader.upload_all(vec![task("a.txt")], |_, _, _| {}).await.unwrap();
        assert_eq!(store.upload_count("a.txt"), 3);
        assert_eq!(done[0].attempt, 3);
        let stats = uploader.stats().snapshot();
        assert_eq!(stats.attempts, 3);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.in_flight, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_are_fatal() {
        let store = MockStore::new().fail_upload("a.txt", &[503, 503, 503]);
        let uploader = Uploader::new(&store, DEPLOY_ID, 5, policy(3), CancellationToken::new());

        let err = uploader
            .upload_all(vec![task("a.txt")], |_, _, _| {})
            .await
            .unwrap_err();
        match err {
            DeployError::UploadFatal { path, attempts, .. } => {
                assert_eq!(path, "a.txt");
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(store.upload_count("a.txt"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_law_holds_for_every_k() {
        let max_retry = 4;
        for k in 0..max_retry {
            let failures = vec![502u16; k as usize];
            let store = MockStore::new().fail_upload("f", &failures);
            let uploader =
                Uploader::new(&store, DEPLOY_ID, 1, policy(max_retry), CancellationToken::new());
            uploader.upload_all(vec![task("f")], |_, _, _| {}).await.unwrap();
            assert_eq!(store.upload_count("f"), k as usize + 1);
        }
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        for status in [400, 401, 403, 404, 422] {
            let store = MockStore::new().fail_upload("a.txt", &[status]);
            let uploader =
                Uploader::new(&store, DEPLOY_ID, 2, policy(5), CancellationToken::new());
            let err = uploader
                .upload_all(vec![task("a.txt")], |_, _, _| {})
                .await
                .unwrap_err();
            assert!(matches!(err, DeployError::UploadFatal { attempts: 1, .. }));
            assert_eq!(store.upload_count("a.txt"), 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_is_retried() {
        let store = MockStore::new().fail_upload("a.txt", &[429]);
        let uploader = Uploader::new(&store, DEPLOY_ID, 2, policy(5), CancellationToken::new());
        uploader.upload_all(vec![task("a.txt")], |_, _, _| {}).await.unwrap();
        assert_eq!(store.upload_count("a.txt"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_is_bounded() {
        let store = MockStore::new().with_upload_delay(Duration::from_millis(50));
        let uploader = Uploader::new(&store, DEPLOY_ID, 3, policy(5), CancellationToken::new());
        let tasks = (0..20).map(|i| task(&format!("f{i}.txt"))).collect();

        let mut ticks = Vec::new();
        let done = uploader
            .upload_all(tasks, |done, total, _| ticks.push((done, total)))
            .await
            .unwrap();

        assert_eq!(done.len(), 20);
        assert_eq!(ticks.last(), Some(&(20, 20)));
        let stats = uploader.stats().snapshot();
        assert_eq!(stats.peak_in_flight, 3);
        assert!(store.peak_in_flight.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_error_stops_dispatch() {
        let store = MockStore::new()
            .with_upload_delay(Duration::from_millis(10))
            .fail_upload("f0.txt", &[403]);
        let uploader = Uploader::new(&store, DEPLOY_ID, 1, policy(5), CancellationToken::new());
        let tasks = (0..5).map(|i| task(&format!("f{i}.txt"))).collect();

        let err = uploader.upload_all(tasks, |_, _, _| {}).await.unwrap_err();
        assert!(matches!(err, DeployError::UploadFatal { .. }));
        assert_eq!(store.uploads.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_drains_in_flight_and_skips_rest() {
        let cancel = CancellationToken::new();
        let store = MockStore::new()
            .with_upload_delay(Duration::from_millis(10))
            .cancel_on_upload(cancel.clone());
        let uploader = Uploader::new(&store, DEPLOY_ID, 2, policy(5), cancel);
        let tasks = (0..6).map(|i| task(&format!("f{i}.txt"))).collect();

        let err = uploader.upload_all(tasks, |_, _, _| {}).await.unwrap_err();
        assert!(err.is_cancelled());
        // Uploads already in flight were allowed to finish.
        let recorded = store.uploads.lock().unwrap().len();
        assert!((1..=2).contains(&recorded), "{recorded} uploads recorded");
    }

    #[tokio::test(start_paused = true)]
    async fn functions_carry_metadata_and_retry_count() {
        let store = MockStore::new().fail_upload("hello", &[500]);
        let uploader = Uploader::new(&store, DEPLOY_ID, 1, policy(5), CancellationToken::new());
        let meta = FunctionMetadata {
            name: "hello".into(),
            runtime: Some("js".into()),
            timeout: Some(26),
            ..Default::default()
        };
        let mut function = task("hello");
        function.asset = AssetKind::Function(Arc::new(meta));

        uploader.upload_all(vec![function], |_, _, _| {}).await.unwrap();

        let calls = store.uploads.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert!(calls.iter().all(|c| c.function));
        assert_eq!(calls[0].retry_count, 0);
        assert_eq!(calls[1].retry_count, 1);
        let params = calls[1].params.as_ref().unwrap();
        assert_eq!(params.runtime.as_deref(), Some("js"));
        assert_eq!(params.timeout, Some(26));
    }
}
