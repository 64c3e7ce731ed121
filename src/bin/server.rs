use anyhow::Context;
use sharethings::api::create_api_server;
use sharethings::config::ServerConfig;
use sharethings::relay::{RelayHub, RelayHubConfig};
use sharethings::session::SessionRegistry;
use sharethings::store::ContentStore;
use sharethings::transport::ConnectionFabric;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ServerConfig::load().context("failed to load configuration")?;

    println!("\n╔══════════════════════════════════════════════════╗");
    println!("║        ShareThings - Encrypted Relay Server       ║");
    println!("╚══════════════════════════════════════════════════╝\n");

    tokio::fs::create_dir_all(&config.db_path)
        .await
        .context("failed to create data directory")?;

    println!("💾 Session Registry: {}", config.sessions_db_path().display());
    let registry = Arc::new(
        SessionRegistry::new(config.sessions_db_path())
            .await
            .context("failed to open session registry")?,
    );

    println!("📦 Content Store:    {}", config.content_db_path().display());
    let store = Arc::new(
        ContentStore::new(
            config.content_db_path(),
            &config.storage_path,
            config.large_file_threshold,
        )
        .await
        .context("failed to open content store")?,
    );

    let fabric = Arc::new(ConnectionFabric::default());
    let hub = Arc::new(RelayHub::new(
        registry,
        store,
        fabric,
        RelayHubConfig {
            session_timeout_ms: config.session_timeout as i64,
            max_items_per_session: config.max_items_per_session,
            large_file_threshold: config.large_file_threshold,
            replay_page_size: config.max_items_per_session,
            expiry_check_interval: Duration::from_millis(config.expiry_check_interval),
        },
    ));

    let sweeper = hub.spawn_expiry_sweeper();

    let app = create_api_server(hub, &config);
    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;

    println!("\n✅ ShareThings relay is running!\n");
    println!("📍 Listen Address:  http://{}", config.listen_addr);
    println!("🏥 Health Check:    http://{}/health", config.listen_addr);
    println!("🔌 Event Stream:    ws://{}/ws", config.listen_addr);
    println!(
        "⬇️  Downloads:       http://{}/api/content/:id/download",
        config.listen_addr
    );
    println!(
        "\n⏱  Session timeout {} s, retention cap {} items, large-file threshold {} MiB",
        config.session_timeout / 1000,
        config.max_items_per_session,
        config.large_file_threshold / (1024 * 1024)
    );
    println!("\n🛑 Press Ctrl+C to stop the server\n");

    let result = axum::serve(listener, app).await;
    sweeper.abort();
    result.context("server error")
}
