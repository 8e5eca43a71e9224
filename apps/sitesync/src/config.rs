//! CLI configuration.
//!
//! Settings come from a TOML file (`sitesync.toml` in the working directory
//! unless `--config` says otherwise). Command-line flags, or their
//! `SITESYNC_*` environment variables, override the file:
//!
//! ```toml
//! site_id = "my-site"
//! api_url = "https://store.example.com/api/v1"
//! dirs = ["dist"]
//! functions_dir = ".functions"
//!
//! [deploy]
//! concurrent_upload = 8
//! ```

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use serde::Deserialize;
use sitesync_deploy::DeployOptions;

pub const DEFAULT_CONFIG_FILE: &str = "sitesync.toml";

pub const ENV_TOKEN: &str = "SITESYNC_AUTH_TOKEN";

/// Deploy configuration for one run.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub site_id: String,
    /// Root of the store API.
    pub api_url: String,
    /// Prefer the environment variable over keeping this in the file.
    pub token: Option<String>,
    /// Publish directories; the working directory when empty.
    pub dirs: Vec<PathBuf>,
    /// Built functions directory holding a `manifest.json`.
    pub functions_dir: Option<PathBuf>,
    /// TOML file injected into the deploy as the site configuration.
    pub site_config: Option<PathBuf>,
    pub branch: Option<String>,
    pub title: Option<String>,
    pub draft: bool,
    pub deploy_id: Option<String>,
    pub deploy: DeployOptions,
}

impl Config {
    /// Reads the configuration file; a missing file yields defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no configuration file, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Config =
            toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
        config.deploy.validate()?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Overrides file values with command-line flags and their environment
    /// variables.
    pub fn apply_args(mut self, args: &Args) -> Self {
        if !args.dirs.is_empty() {
            self.dirs = args.dirs.clone();
        }
        if let Some(site_id) = &args.site {
            self.site_id = site_id.clone();
        }
        if let Some(api_url) = &args.api_url {
            self.api_url = api_url.clone();
        }
        if args.auth.is_some() {
            self.token = args.auth.clone();
        }
        if let Some(dir) = &args.functions {
            self.functions_dir = Some(dir.clone());
        }
        if args.branch.is_some() {
            self.branch = args.branch.clone();
        }
        if args.title.is_some() {
            self.title = args.title.clone();
        }
        if args.deploy_id.is_some() {
            self.deploy_id = args.deploy_id.clone();
        }
        self.draft |= args.draft;
        self
    }
}

/// Deploy a site to a content-addressed asset store
#[derive(Debug, Clone, Parser)]
#[command(name = "sitesync")]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Configuration file
    #[arg(long = "config", default_value = DEFAULT_CONFIG_FILE)]
    pub config_path: PathBuf,

    /// Site to deploy to
    #[arg(long, env = "SITESYNC_SITE_ID")]
    pub site: Option<String>,

    /// Root of the store API
    #[arg(long, env = "SITESYNC_API_URL")]
    pub api_url: Option<String>,

    /// Store auth token
    #[arg(long, env = ENV_TOKEN, hide_env_values = true)]
    pub auth: Option<String>,

    /// Built functions directory
    #[arg(long)]
    pub functions: Option<PathBuf>,

    #[arg(long)]
    pub branch: Option<String>,

    /// Title for a new deploy
    #[arg(long)]
    pub title: Option<String>,

    /// Reuse an existing deploy instead of creating one
    #[arg(long)]
    pub deploy_id: Option<String>,

    /// Publish as a draft deploy
    #[arg(long)]
    pub draft: bool,

    /// Publish directories
    pub dirs: Vec<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Result<Args, clap::Error> {
        Args::try_parse_from(std::iter::once("sitesync").chain(list.iter().copied()))
    }

    #[test]
    fn parses_flags_and_dirs() {
        let parsed = args(&["--draft", "--title", "preview", "dist", "public"]).unwrap();
        assert!(parsed.draft);
        assert_eq!(parsed.title.as_deref(), Some("preview"));
        assert_eq!(parsed.dirs, vec![PathBuf::from("dist"), PathBuf::from("public")]);
        assert_eq!(parsed.config_path, PathBuf::from(DEFAULT_CONFIG_FILE));
    }

    #[test]
    fn rejects_unknown_and_incomplete_flags() {
        assert!(args(&["--verbose"]).is_err());
        assert!(args(&["--title"]).is_err());
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Args::command().debug_assert();
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("nope.toml")).unwrap();
        assert!(config.site_id.is_empty());
        assert_eq!(config.deploy, DeployOptions::default());
    }

    #[test]
    fn loads_file_with_nested_options() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_CONFIG_FILE);
        std::fs::write(
            &path,
            r#"
site_id = "site-1"
api_url = "https://store.test/api/v1"
dirs = ["dist"]

[deploy]
concurrent_upload = 8

[deploy.retry]
max_retry = 2
"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.site_id, "site-1");
        assert_eq!(config.dirs, vec![PathBuf::from("dist")]);
        assert_eq!(config.deploy.concurrent_upload, 8);
        assert_eq!(config.deploy.retry.max_retry, 2);
        assert_eq!(config.deploy.concurrent_hash, DeployOptions::default().concurrent_hash);
    }

    #[test]
    fn invalid_options_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_CONFIG_FILE);
        std::fs::write(&path, "[deploy]\nconcurrent_upload = 0\n").unwrap();
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn args_override_file() {
        let config = Config {
            site_id: "from-file".into(),
            dirs: vec![PathBuf::from("dist")],
            ..Default::default()
        };

        let parsed = args(&[
            "--site",
            "from-args",
            "--auth",
            "secret",
            "--branch",
            "main",
        ])
        .unwrap();
        let config = config.apply_args(&parsed);
        assert_eq!(config.site_id, "from-args");
        assert_eq!(config.token.as_deref(), Some("secret"));
        assert_eq!(config.branch.as_deref(), Some("main"));
        assert_eq!(config.dirs, vec![PathBuf::from("dist")]);
    }
}
