//! Debounced, memoized builds.
//!
//! A [`BuildCache`] is shared by reference between deploy runs so repeated
//! deploys do not rebuild functions that were just built. Per key it keeps
//! the current build task, when it started, and at most one follow-up build.
//!
//! | Request arrives                      | Result                        |
//! |--------------------------------------|-------------------------------|
//! | no entry, or stale/failed build      | [`BuildOutcome::Started`]     |
//! | build finished within the window     | [`BuildOutcome::Cached`]      |
//! | build running, within the window     | [`BuildOutcome::Debounced`]   |
//! | build running, window elapsed        | [`BuildOutcome::Coalesced`]   |
//!
//! Coalesced requests all share a single follow-up build that starts when
//! the running one completes.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Failure of a memoized build, cloneable so every waiter can see it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    #[error("{0}")]
    Failed(String),

    #[error("build task was aborted")]
    Aborted,
}

/// How a request was served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildOutcome {
    /// A new build was started for this request.
    Started,
    /// A finished build younger than the debounce window was reused.
    Cached,
    /// Joined a build still running within the debounce window.
    Debounced,
    /// Joined the single follow-up queued behind a running build.
    Coalesced,
}

type SharedBuild<T> = Shared<BoxFuture<'static, Result<T, BuildError>>>;

struct Entry<T> {
    task: SharedBuild<T>,
    timestamp: Instant,
    enqueued_follow_up: Option<SharedBuild<T>>,
}

/// Memoizes builds per key with a debounce window.
pub struct BuildCache<T> {
    debounce: Duration,
    entries: Mutex<HashMap<String, Entry<T>>>,
}

impl<T> BuildCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the result for `key`, building it with `build` only when the
    /// cached state calls for it.
    pub async fn request<F, Fut>(&self, key: &str, build: F) -> (BuildOutcome, Result<T, BuildError>)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, BuildError>> + Send + 'static,
    {
        let (outcome, task) = {
            let mut entries = self.entries.lock().await;
            let now = Instant::now();

            match entries.get_mut(key) {
                None => {
                    let task = spawn_build(build);
                    entries.insert(key.to_string(), Entry::new(task.clone(), now));
                    (BuildOutcome::Started, task)
                }
                Some(entry) => {
                    entry.promote_follow_up(now);
                    let fresh = now.duration_since(entry.timestamp) < self.debounce;

                    match entry.task.peek() {
                        Some(Ok(_)) if fresh => (BuildOutcome::Cached, entry.task.clone()),
                        Some(_) => {
                            let task = spawn_build(build);
                            *entry = Entry::new(task.clone(), now);
                            (BuildOutcome::Started, task)
                        }
                        None if fresh => (BuildOutcome::Debounced, entry.task.clone()),
                        None => {
                            let running = entry.task.clone();
                            let follow_up = entry
                                .enqueued_follow_up
                                .get_or_insert_with(move || {
                                    spawn_build(move || async move {
                                        // Outcome of the running build does not matter.
                                        let _ = running.await;
                                        build().await
                                    })
                                })
                                .clone();
                            (BuildOutcome::Coalesced, follow_up)
                        }
                    }
                }
            }
        };

        debug!(key, ?outcome, "build requested");
        (outcome, task.await)
    }
}

impl<T: Clone> Entry<T> {
    fn new(task: SharedBuild<T>, timestamp: Instant) -> Self {
        Self {
            task,
            timestamp,
            enqueued_follow_up: None,
        }
    }

    /// Once the running build is done, its queued follow-up becomes the
    /// current build.
    fn promote_follow_up(&mut self, now: Instant) {
        if self.task.peek().is_none() {
            return;
        }
        if let Some(next) = self.enqueued_follow_up.take() {
            self.task = next;
            self.timestamp = now;
        }
    }
}

fn spawn_build<T, F, Fut>(build: F) -> SharedBuild<T>
where
    T: Clone + Send + Sync + 'static,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, BuildError>> + Send + 'static,
{
    let handle = tokio::spawn(async move { build().await });
    async move { handle.await.unwrap_or(Err(BuildError::Aborted)) }
        .boxed()
        .shared()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const WINDOW: Duration = Duration::from_secs(120);

    fn counting_build(
        counter: &Arc<AtomicUsize>,
        duration: Duration,
    ) -> impl FnOnce() -> BoxFuture<'static, Result<usize, BuildError>> + Send + 'static {
        let counter = Arc::clone(counter);
        move || {
            async move {
                let run = counter.fetch_add(1, Ordering::SeqCst) + 1;
                tokio::time::sleep(duration).await;
                Ok(run)
            }
            .boxed()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn finished_build_is_reused_within_window() {
        let cache = BuildCache::new(WINDOW);
        let builds = Arc::new(AtomicUsize::new(0));

        let (outcome, result) = cache
            .request("fns", counting_build(&builds, Duration::from_secs(1)))
            .await;
        assert_eq!(outcome, BuildOutcome::Started);
        assert_eq!(result, Ok(1));

        tokio::time::advance(Duration::from_secs(30)).await;
        let (outcome, result) = cache
            .request("fns", counting_build(&builds, Duration::from_secs(1)))
            .await;
        assert_eq!(outcome, BuildOutcome::Cached);
        assert_eq!(result, Ok(1));
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_build_is_rebuilt() {
        let cache = BuildCache::new(WINDOW);
        let builds = Arc::new(AtomicUsize::new(0));

        let (_, result) = cache
            .request("fns", counting_build(&builds, Duration::from_secs(1)))
            .await;
        assert_eq!(result, Ok(1));
        tokio::time::advance(WINDOW + Duration::from_secs(1)).await;
        let (outcome, result) = cache
            .request("fns", counting_build(&builds, Duration::from_secs(1)))
            .await;
        assert_eq!(outcome, BuildOutcome::Started);
        assert_eq!(result, Ok(2));
    }

    #[tokio::test(start_paused = true)]
    async fn request_during_build_joins_it() {
        let cache = Arc::new(BuildCache::new(WINDOW));
        let builds = Arc::new(AtomicUsize::new(0));

        let first = {
            let cache = Arc::clone(&cache);
            let build = counting_build(&builds, Duration::from_secs(60));
            tokio::spawn(async move { cache.request("fns", build).await })
        };
        tokio::time::sleep(Duration::from_secs(10)).await;

        let (outcome, result) = cache
            .request("fns", counting_build(&builds, Duration::from_secs(60)))
            .await;
        assert_eq!(outcome, BuildOutcome::Debounced);
        assert_eq!(result, Ok(1));
        assert_eq!(first.await.unwrap(), (BuildOutcome::Started, Ok(1)));
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn late_requests_coalesce_into_one_follow_up() {
        let cache = Arc::new(BuildCache::new(WINDOW));
        let builds = Arc::new(AtomicUsize::new(0));
        let long = Duration::from_secs(300);

        let first = {
            let cache = Arc::clone(&cache);
            let build = counting_build(&builds, long);
            tokio::spawn(async move { cache.request("fns", build).await })
        };
        tokio::time::sleep(Duration::from_secs(150)).await;

        let mut followers = Vec::new();
        for _ in 0..3 {
            let cache = Arc::clone(&cache);
            let build = counting_build(&builds, long);
            followers.push(tokio::spawn(async move { cache.request("fns", build).await }));
            tokio::time::sleep(Duration::from_secs(5)).await;
        }

        assert_eq!(first.await.unwrap(), (BuildOutcome::Started, Ok(1)));
        for follower in followers {
            assert_eq!(follower.await.unwrap(), (BuildOutcome::Coalesced, Ok(2)));
        }
        assert_eq!(builds.load(Ordering::SeqCst), 2);

        // The follow-up is now the current build and fresh.
        let (outcome, result) = cache
            .request("fns", counting_build(&builds, long))
            .await;
        assert_eq!(outcome, BuildOutcome::Cached);
        assert_eq!(result, Ok(2));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_build_is_not_cached() {
        let cache: BuildCache<usize> = BuildCache::new(WINDOW);
        let (outcome, result) = cache
            .request("fns", || async { Err(BuildError::Failed("syntax error".into())) })
            .await;
        assert_eq!(outcome, BuildOutcome::Started);
        assert_eq!(result, Err(BuildError::Failed("syntax error".into())));

        let (outcome, result) = cache.request("fns", || async { Ok(7) }).await;
        assert_eq!(outcome, BuildOutcome::Started);
        assert_eq!(result, Ok(7));
    }

    #[tokio::test(start_paused = true)]
    async fn keys_are_independent() {
        let cache = BuildCache::new(WINDOW);
        let (a, _) = cache.request("a", || async { Ok(1) }).await;
        let (b, _) = cache.request("b", || async { Ok(2) }).await;
        assert_eq!((a, b), (BuildOutcome::Started, BuildOutcome::Started));

        let (a, result) = cache.request("a", || async { Ok(3) }).await;
        assert_eq!(a, BuildOutcome::Cached);
        assert_eq!(result, Ok(1));
    }
}
