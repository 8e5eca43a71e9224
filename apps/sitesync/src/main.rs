//! sitesync command-line entry point.

mod app;
mod config;

use clap::Parser;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = config::Args::parse();
    let config = config::Config::load(&args.config_path)?.apply_args(&args);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        site_id = %config.site_id,
        "starting deploy"
    );

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(app::run(config))?;
    Ok(())
}
