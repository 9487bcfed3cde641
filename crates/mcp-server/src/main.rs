use std::{path::Path, sync::Arc};

use common::config::AppConfig;
use mcp_server::{CoreContext, serve_stdio};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .json()
        .with_writer(std::io::stderr)
        .init();

    let config_path =
        std::env::var("QUARRY_CONFIG").unwrap_or_else(|_| "quarry.toml".to_string());
    let config = AppConfig::load(Path::new(&config_path))?;
    let ctx = Arc::new(CoreContext::open(config)?);
    info!(data_dir = %ctx.config.data_dir, "server ready on stdio");

    serve_stdio(ctx).await
}
