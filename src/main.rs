//! pairgate - HTTP front door for linking a messaging account by pairing code
//!
//! Hands out pairing codes over HTTP, keeps the linked session alive and
//! republishes its credentials once the link completes.

use anyhow::Result;
use clap::Parser;
use pairgate_auth::{open_store, LifecycleController, LifecycleSettings};
use pairgate_client::{GatewayConnector, GatewayOptions};
use pairgate_core::{
    Config, PublisherKind, ReconnectPolicy, SessionIdMode, StoreBackend, DEFAULT_SESSION_PREFIX,
};
use pairgate_publish::build_publisher;
use pairgate_server::{create_router, AppState};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;

/// pairgate - Link a messaging account with a pairing code
#[derive(Parser, Debug)]
#[command(name = "pairgate")]
#[command(version, about, long_about = None)]
struct Args {
    /// Server port
    #[arg(short, long, default_value = "3000", env = "PORT")]
    port: u16,

    /// Address to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Base URL of the protocol gateway
    #[arg(long, default_value = "http://127.0.0.1:8787")]
    gateway_url: String,

    /// Bearer token for the protocol gateway
    #[arg(long)]
    gateway_token: Option<String>,

    /// Root directory for per-session auth files
    #[arg(long, default_value = "./session")]
    auth_dir: PathBuf,

    /// Session store backend (file, memory, postgres)
    #[arg(long, default_value = "file")]
    store: String,

    /// Path of the JSON session store (file backend)
    #[arg(long)]
    store_path: Option<PathBuf>,

    /// Postgres connection URL (postgres backend)
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// How to republish credentials (pastebin, relay)
    #[arg(long, default_value = "pastebin")]
    publisher: String,

    /// Pastebin developer API key
    #[arg(long, env = "PASTEBIN_API_KEY")]
    paste_api_key: Option<String>,

    /// Title of the uploaded paste
    #[arg(long, default_value = "creds.json")]
    paste_title: String,

    /// Paste endpoint for the relay publisher
    #[arg(long)]
    relay_url: Option<String>,

    /// Prefix of the message carrying the published pointer
    #[arg(long, default_value = pairgate_core::config::DEFAULT_MARKER)]
    marker: String,

    /// Prefix of generated session IDs
    #[arg(long, default_value = DEFAULT_SESSION_PREFIX)]
    session_prefix: String,

    /// Require callers to pass their own sessionId
    #[arg(long)]
    require_session_id: bool,

    /// Serve pages from this directory instead of the embedded ones
    #[arg(long)]
    pages_dir: Option<PathBuf>,

    /// Delay before requesting a pairing code, in milliseconds
    #[arg(long, default_value = "1500")]
    code_delay_ms: u64,

    /// Delay between link and publishing, in milliseconds
    #[arg(long, default_value = "5000")]
    publish_delay_ms: u64,

    /// Consecutive reconnects before giving up (0 = never give up)
    #[arg(long, default_value = "10")]
    max_reconnects: u32,

    /// First reconnect delay, in milliseconds
    #[arg(long, default_value = "1000")]
    reconnect_base_ms: u64,

    /// Reconnect delay ceiling, in milliseconds
    #[arg(long, default_value = "30000")]
    reconnect_max_ms: u64,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn into_config(self) -> Result<Config> {
        let store: StoreBackend = self.store.parse().map_err(|e: String| anyhow::anyhow!(e))?;
        let publisher: PublisherKind =
            self.publisher.parse().map_err(|e: String| anyhow::anyhow!(e))?;
        let mode = if self.require_session_id {
            SessionIdMode::CallerSupplied
        } else {
            SessionIdMode::Generated
        };
        let reconnect = ReconnectPolicy {
            max_attempts: (self.max_reconnects > 0).then_some(self.max_reconnects),
            base_delay: Duration::from_millis(self.reconnect_base_ms),
            max_delay: Duration::from_millis(self.reconnect_max_ms),
        };

        Ok(Config::new()
            .with_host(self.host)
            .with_port(self.port)
            .with_gateway(self.gateway_url, self.gateway_token)
            .with_auth_dir(self.auth_dir)
            .with_store(store, self.store_path, self.database_url)
            .with_publisher(publisher)
            .with_pastebin(self.paste_api_key, self.paste_title)
            .with_relay_url(self.relay_url)
            .with_marker(self.marker)
            .with_session_ids(mode, self.session_prefix)
            .with_pages_dir(self.pages_dir)
            .with_delays(
                Duration::from_millis(self.code_delay_ms),
                Duration::from_millis(self.publish_delay_ms),
            )
            .with_reconnect(reconnect))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging, keeping client libraries quiet
    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::from_default_env()
        .add_directive(log_level.into())
        .add_directive("sqlx=warn".parse()?)
        .add_directive("hyper=warn".parse()?)
        .add_directive("reqwest=warn".parse()?);
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .with_env_filter(filter)
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();

    info!("pairgate v{}", env!("CARGO_PKG_VERSION"));

    let config = args.into_config()?;

    // Session storage
    let store = open_store(&config)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to open session store: {}", e))?;

    // Protocol client
    let gateway = GatewayOptions::new(config.gateway_url.clone())
        .with_token(config.gateway_token.clone());
    let connector = GatewayConnector::new(gateway)
        .map_err(|e| anyhow::anyhow!("Failed to create gateway client: {}", e))?;
    info!("Protocol gateway: {}", config.gateway_url);

    // Credential publisher
    let publisher = build_publisher(&config)
        .map_err(|e| anyhow::anyhow!("Failed to create publisher: {}", e))?;
    if config.publisher == PublisherKind::Pastebin {
        warn!("Linked credentials will be uploaded to pastebin as unlisted pastes.");
        warn!("Anyone holding the paste key can take over the linked account.");
    }
    info!("Publisher: {}", publisher.name());

    let controller = LifecycleController::new(
        store,
        Arc::new(connector),
        publisher,
        LifecycleSettings::from_config(&config),
    );

    match config.session_id_mode {
        SessionIdMode::Generated => info!("Session IDs: generated ({}...)", config.session_prefix),
        SessionIdMode::CallerSupplied => info!("Session IDs: supplied by caller"),
    }
    match config.reconnect.max_attempts {
        Some(max) => info!("Reconnects: up to {} in a row", max),
        None => warn!("Reconnects: unlimited"),
    }

    // Create app state and router
    let bind_addr = config.bind_addr();
    let state = Arc::new(AppState::new(config, controller.clone()));
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("Listening on http://{}", listener.local_addr()?);
    info!("Press Ctrl+C to stop.");

    let shutdown = async {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutting down...");
    };

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;

    // End live protocol connections
    controller.shutdown().await;

    info!("Goodbye!");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_map_onto_config() {
        let args = Args::parse_from([
            "pairgate",
            "--port",
            "8080",
            "--store",
            "memory",
            "--publisher",
            "relay",
            "--relay-url",
            "https://relay.example/paste",
            "--require-session-id",
            "--max-reconnects",
            "0",
        ]);
        let config = args.into_config().unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.store, StoreBackend::Memory);
        assert_eq!(config.publisher, PublisherKind::Relay);
        assert_eq!(config.session_id_mode, SessionIdMode::CallerSupplied);
        assert_eq!(config.reconnect.max_attempts, None);
        assert_eq!(config.code_request_delay, Duration::from_millis(1500));
    }

    #[test]
    fn test_rejects_unknown_store() {
        let args = Args::parse_from(["pairgate", "--store", "redis"]);
        assert!(args.into_config().is_err());
    }
}
