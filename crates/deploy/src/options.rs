//! Tunables for a deploy run.
//!
//! Options are plain serde data so the host application can keep them in
//! its TOML configuration:
//!
//! ```toml
//! concurrent_hash = 100
//! concurrent_upload = 5
//! hash_algorithm = "sha1"
//! deploy_timeout_ms = 1200000
//!
//! [retry]
//! max_retry = 5
//! initial_delay_ms = 5000
//! ```

use std::path::Path;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use sitesync_transfer::HashAlgorithm;

use crate::error::DeployError;

pub const DEFAULT_CONCURRENT_HASH: usize = 100;
pub const DEFAULT_CONCURRENT_UPLOAD: usize = 5;
pub const DEFAULT_MAX_RETRY: u32 = 5;
/// 20 minutes.
pub const DEFAULT_DEPLOY_TIMEOUT_MS: u64 = 1_200_000;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_ASYNC_THRESHOLD: usize = 100;
pub const DEFAULT_CONFIG_FILE_NAME: &str = "site.toml";
/// 2 minutes.
pub const DEFAULT_BUILD_DEBOUNCE_MS: u64 = 120_000;

/// Engine options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployOptions {
    /// Files hashed at the same time.
    pub concurrent_hash: usize,
    /// Uploads in flight at the same time.
    pub concurrent_upload: usize,
    pub hash_algorithm: HashAlgorithm,
    /// Digest used for function artifacts.
    pub function_hash_algorithm: HashAlgorithm,
    /// Upper bound on waiting for the store to process the deploy.
    pub deploy_timeout_ms: u64,
    pub poll_interval_ms: u64,
    /// Abort before negotiating when the file manifest is larger than this.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync_file_limit: Option<usize>,
    /// Manifests larger than this are diffed asynchronously by the store.
    pub async_threshold: usize,
    /// Manifest path of the injected site configuration entry.
    pub config_file_name: String,
    /// Window in which a finished function build is reused.
    pub build_debounce_ms: u64,
    pub retry: RetryPolicy,
}

impl Default for DeployOptions {
    fn default() -> Self {
        Self {
            concurrent_hash: DEFAULT_CONCURRENT_HASH,
            concurrent_upload: DEFAULT_CONCURRENT_UPLOAD,
            hash_algorithm: HashAlgorithm::default(),
            function_hash_algorithm: HashAlgorithm::Sha256,
            deploy_timeout_ms: DEFAULT_DEPLOY_TIMEOUT_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            sync_file_limit: None,
            async_threshold: DEFAULT_ASYNC_THRESHOLD,
            config_file_name: DEFAULT_CONFIG_FILE_NAME.to_string(),
            build_debounce_ms: DEFAULT_BUILD_DEBOUNCE_MS,
            retry: RetryPolicy::default(),
        }
    }
}

impl DeployOptions {
    /// Parses options from TOML; missing keys take their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self, DeployError> {
        let options: DeployOptions =
            toml::from_str(content).map_err(|e| DeployError::Config(e.to_string()))?;
        options.validate()?;
        Ok(options)
    }

    /// Reads options from a TOML file.
    pub fn load(path: &Path) -> Result<Self, DeployError> {
        let content = std::fs::read_to_string(path)?;
        let options = Self::from_toml_str(&content)?;
        tracing::debug!(path = %path.display(), "deploy options loaded");
        Ok(options)
    }

    /// Rejects values the engine cannot run with.
    pub fn validate(&self) -> Result<(), DeployError> {
        if self.concurrent_hash == 0 {
            return Err(DeployError::Config("concurrent_hash must be at least 1".into()));
        }
        if self.concurrent_upload == 0 {
            return Err(DeployError::Config(
                "concurrent_upload must be at least 1".into(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(DeployError::Config("poll_interval_ms must be positive".into()));
        }
        if self.config_file_name.is_empty() {
            return Err(DeployError::Config("config_file_name must not be empty".into()));
        }
        self.retry.validate()
    }

    pub fn deploy_timeout(&self) -> Duration {
        Duration::from_millis(self.deploy_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn build_debounce(&self) -> Duration {
        Duration::from_millis(self.build_debounce_ms)
    }
}

/// Retry budget and backoff for uploads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts per upload, first one included.
    pub max_retry: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Fraction of the delay that may be shaved off at random, in `[0, 1]`.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retry: DEFAULT_MAX_RETRY,
            initial_delay_ms: 5_000,
            max_delay_ms: 90_000,
            jitter: 0.5,
        }
    }
}

impl RetryPolicy {
    pub fn validate(&self) -> Result<(), DeployError> {
        if self.max_retry == 0 {
            return Err(DeployError::Config("retry.max_retry must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(DeployError::Config("retry.jitter must be within [0, 1]".into()));
        }
        if self.initial_delay_ms > self.max_delay_ms {
            return Err(DeployError::Config(
                "retry.initial_delay_ms exceeds retry.max_delay_ms".into(),
            ));
        }
        Ok(())
    }

    /// Upper bound of the delay before retry number `retry` (0-based):
    /// `min(max_delay, initial_delay * 2^retry)`.
    pub fn base_delay(&self, retry: u32) -> Duration {
        let exp = retry.min(32);
        let millis = self
            .initial_delay_ms
            .saturating_mul(1u64 << exp)
            .min(self.max_delay_ms);
        Duration::from_millis(millis)
    }

    /// Randomized delay before retry number `retry` (0-based).
    ///
    /// The base delay is scaled by a factor drawn from `[1 - jitter, 1]`,
    /// so the result never exceeds `max_delay`.
    pub fn delay_for_attempt(&self, retry: u32) -> Duration {
        let base = self.base_delay(retry);
        if self.jitter <= 0.0 {
            return base;
        }
        let factor = rand::thread_rng().gen_range((1.0 - self.jitter)..=1.0);
        base.mul_f64(factor)
    }
}
