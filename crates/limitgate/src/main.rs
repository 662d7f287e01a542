use std::path::PathBuf;

use anyhow::Context;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    limitgate::telemetry::init_logging();

    let path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("limitgate.yaml"));
    let config = limitgate::Config::load(&path)
        .with_context(|| format!("loading configuration from {}", path.display()))?;

    info!(config = %path.display(), "starting limitgate");
    limitgate::app::run(config).await
}
