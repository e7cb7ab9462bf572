use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use turnstile::config::TurnstileConfig;
use turnstile::http::{cors_layer, AdmissionControl, ClientResolver, HttpServer};
use turnstile::ratelimit::{LimitConfig, Sweeper, VisitorRegistry};

/// Per-client admission control in front of an HTTP service.
#[derive(Debug, Parser)]
#[command(name = "turnstile", version, about)]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the HTTP listen address
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    info!("Starting Turnstile");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = TurnstileConfig::load(cli.config.as_deref())?;
    config.override_listen(cli.listen);
    let limits = LimitConfig::from(&config.rate_limiting);
    info!(
        http_addr = %config.server.http_addr,
        rate = limits.rate,
        burst = limits.burst,
        sweep_interval_secs = config.rate_limiting.sweep_interval_secs,
        trust_proxy_header = config.rate_limiting.trust_proxy_header,
        "Configuration loaded"
    );

    let resolver = ClientResolver::from_config(&config.rate_limiting)?;
    let cors = cors_layer(&config.cors)?;

    let registry = Arc::new(VisitorRegistry::new(limits));
    let sweeper = Sweeper::start(Arc::clone(&registry), config.rate_limiting.sweep_interval())?;

    let control = AdmissionControl::new(registry, resolver);
    let server = HttpServer::new(config.server.http_addr, control, cors);

    let served = server.serve_with_shutdown(shutdown_signal()).await;

    sweeper.stop().await;
    served?;

    info!("Turnstile stopped");
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
