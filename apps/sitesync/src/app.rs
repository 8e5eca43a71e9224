//! Wires the store client and the deploy engine together.

use std::path::PathBuf;

use anyhow::{Context, bail};
use sitesync_deploy::{DeployConfig, DeployEvent, DeployOrchestrator, EventPhase, FunctionsInput};
use sitesync_store_client::Client;

use crate::config::{Config, ENV_TOKEN};

/// Runs one deploy to completion or cancellation.
pub async fn run(config: Config) -> anyhow::Result<()> {
    if config.site_id.is_empty() {
        bail!("no site id configured");
    }
    if config.api_url.is_empty() {
        bail!("no store API URL configured");
    }
    let token = config
        .token
        .as_deref()
        .with_context(|| format!("no auth token, set {ENV_TOKEN}"))?;

    let client = Client::new(&config.api_url, token)?;
    let deploy_config = deploy_config(&config)?;

    let mut orchestrator = DeployOrchestrator::new(&client, config.deploy.clone())
        .with_status_callback(Box::new(log_event));

    let cancel = orchestrator.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling deploy");
            cancel.cancel();
        }
    });

    let outcome = orchestrator.deploy(deploy_config).await?;
    tracing::info!(
        deploy_id = %outcome.deploy_id,
        uploaded = outcome.upload_list.len(),
        attempts = outcome.upload_stats.attempts,
        url = outcome.site_url.as_deref().unwrap_or("-"),
        "deploy is live"
    );
    Ok(())
}

fn deploy_config(config: &Config) -> anyhow::Result<DeployConfig> {
    let dirs = if config.dirs.is_empty() {
        vec![PathBuf::from(".")]
    } else {
        config.dirs.clone()
    };

    let site_config = match &config.site_config {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            Some(
                toml::from_str::<toml::Table>(&content)
                    .with_context(|| format!("parsing {}", path.display()))?,
            )
        }
        None => None,
    };

    let functions = match &config.functions_dir {
        Some(dir) => FunctionsInput::Source(dir.clone()),
        None => FunctionsInput::None,
    };

    Ok(DeployConfig {
        site_id: config.site_id.clone(),
        dirs,
        functions,
        site_config,
        filter: None,
        branch: config.branch.clone(),
        title: config.title.clone(),
        draft: config.draft,
        deploy_id: config.deploy_id.clone(),
    })
}

fn log_event(event: &DeployEvent) {
    match event.phase {
        EventPhase::Error => tracing::error!(kind = %event.kind, "{}", event.msg),
        EventPhase::Progress => {
            let (current, total) = event.progress.unwrap_or_default();
            tracing::debug!(kind = %event.kind, current, total, "{}", event.msg);
        }
        EventPhase::Start | EventPhase::Stop => tracing::info!(kind = %event.kind, "{}", event.msg),
    }
}
