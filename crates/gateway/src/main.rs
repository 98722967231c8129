use anyhow::Context;
use tracing_subscriber::EnvFilter;

use tether_domain::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = Config::load().context("loading configuration")?;
    tether_gateway::bootstrap::run(config).await
}

fn init_tracing() {
    let filter = std::env::var("TETHER_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();
}
