//! signal-rs: trading signal relay server

use signal_rs::api::ApiServer;
use signal_rs::config::{Config, LoggingConfig};
use signal_rs::identity::IdentityStore;
use std::path::Path;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_CONFIG_PATH: &str = "signal-rs.toml";

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "signal_rs={level},tower_http={level}",
            level = logging.level
        ))
    });

    let registry = tracing_subscriber::registry().with(filter);
    if logging.format.eq_ignore_ascii_case("json") {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = if let Some(config_path) = std::env::args().nth(1) {
        Config::from_file(Path::new(&config_path))?
    } else if Path::new(DEFAULT_CONFIG_PATH).exists() {
        Config::from_file(DEFAULT_CONFIG_PATH)?
    } else {
        Config::default()
    };
    let config = config.with_env_overrides();
    config.validate()?;

    init_tracing(&config.logging);

    info!("Starting signal-rs v{}", env!("CARGO_PKG_VERSION"));
    info!("  Listening on: {}", config.server.listen_addr);
    info!("  Database: {}", config.storage.database_url);
    info!("  Sender: {}", config.auth.sender_username);
    if config.auth.admin_token.is_empty() {
        info!("  Admin endpoints disabled (no admin token)");
    }

    let pool = signal_rs::db::connect(&config.storage.database_url).await?;
    signal_rs::db::init_schema(&pool).await?;

    let identities = IdentityStore::new(pool.clone(), &config.auth.sender_username);
    if let Some(issued) = identities.ensure_sender(false).await? {
        // Shown once; only the digest is stored
        println!(
            "Sender token for {}: {}",
            issued.identity.username, issued.token
        );
    }

    let server = ApiServer::new(pool, config);
    server.run().await?;

    Ok(())
}
