use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // JSON logs in production (RELAYCHAT_LOG_JSON=1), human-readable otherwise
    let json_logs = std::env::var("RELAYCHAT_LOG_JSON").unwrap_or_default() == "1";
    let filter = EnvFilter::from_default_env().add_directive("relaychat_server=info".parse()?);
    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .init();
    }

    let config = relaychat_server::config::ServerConfig::parse();
    tracing::info!(
        "Starting relaychat on {} (clients) and {} (peers)",
        config.client_addr(),
        config.peer_addr()
    );
    let server = relaychat_server::server::Server::new(config);
    server.run().await
}
