//! HTTP front end and process lifecycle for the wagate gateway.
//!
//! The embedding binary supplies the protocol backend:
//!
//! ```ignore
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = wagate_server::ServerArgs::parse();
//!     wagate_server::run(args, Arc::new(MyStore::open()?), Arc::new(MyFactory)).await
//! }
//! ```

pub mod boot;
pub mod config;
pub mod routes;

use anyhow::Context;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use wagate::{ConnectionFactory, DeviceStore, Gateway, GatewayOptions};
use wagate_cron::Crontab;

pub use clap::Parser;
pub use config::GatewayConfig;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "multi-session messaging gateway")]
pub struct ServerArgs {
    /// Environment name; selects config.<env>.toml.
    #[arg(long, default_value = "local")]
    pub env: String,

    /// Explicit config file, skipping the search path.
    #[arg(long)]
    pub config: Option<PathBuf>,
}

/// Install the fmt subscriber. `RUST_LOG` wins over `level`.
pub fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("wagate={level},wagate_server={level},wagate_cron={level}").into()
    });
    // A subscriber installed by the embedding binary takes precedence.
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

pub async fn run(
    args: ServerArgs,
    store: Arc<dyn DeviceStore>,
    factory: Arc<dyn ConnectionFactory>,
) -> anyhow::Result<()> {
    let config = GatewayConfig::load(&args)?;
    init_tracing(&config.log_level);
    match &config.source {
        Some(path) => tracing::info!(path = %path.display(), env = %config.env, "config loaded"),
        None => tracing::warn!(env = %config.env, "no config file found, using defaults"),
    }

    let gateway = Gateway::new(
        store,
        factory,
        GatewayOptions {
            max_concurrency: config.dispatch.max_concurrency,
        },
    );

    if config.startup.enable_auto_login {
        boot::spawn_auto_login(gateway.clone());
    }

    let cron = Crontab::new();
    boot::register_jobs(&cron, &config, &gateway);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind http listener on {addr}"))?;
    tracing::info!(%addr, env = %config.env, "wagate listening");

    axum::serve(listener, routes::router(gateway.clone()))
        .with_graceful_shutdown(boot::shutdown_signal())
        .await
        .context("http server failed")?;

    boot::shutdown(&gateway, &cron, &config).await;
    tracing::info!("wagate stopped");
    Ok(())
}
