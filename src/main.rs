use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use glass_relay::config::RelayConfig;
use glass_relay::state::AppState;
use glass_relay::web;

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

/// glass-relay command line arguments
#[derive(Parser, Debug)]
#[command(name = "glass-relay")]
#[command(version, about = "One-to-many WebRTC H264 relay with glass-to-glass latency measurement", long_about = None)]
struct CliArgs {
    /// Listen address
    #[arg(short = 'a', long, value_name = "ADDRESS", default_value = "0.0.0.0")]
    address: String,

    /// HTTP port
    #[arg(short = 'p', long, value_name = "PORT", default_value_t = 8081)]
    port: u16,

    /// STUN server URL (repeatable; defaults to Google STUN)
    #[arg(long = "stun", value_name = "URL")]
    stun_servers: Vec<String>,

    /// Directory the consumer page is served from
    #[arg(long, value_name = "DIR", default_value = "./static")]
    static_dir: PathBuf,

    /// Advisory producer label reported by /config
    #[arg(long, value_name = "LABEL")]
    sender_url: Option<String>,

    /// Log level
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_level);

    let mut config = RelayConfig::default();
    if !args.stun_servers.is_empty() {
        config.stun_servers = args.stun_servers.clone();
    }
    if let Some(label) = args.sender_url {
        config.sender_url = label;
    }
    config.static_dir = args.static_dir;

    let state = AppState::new(config);
    let app = web::create_router(state);

    let addr: SocketAddr = format!("{}:{}", args.address, args.port).parse()?;

    tracing::info!("============================================================");
    tracing::info!(
        "glass-relay v{} - glass-to-glass latency measurement",
        env!("CARGO_PKG_VERSION")
    );
    tracing::info!("  H264 video forwarding (one producer, many consumers)");
    tracing::info!("  frame timestamps: producer socket -> consumer side-channel");
    tracing::info!("  clock-sync ping/pong on the `timestamps` channel");
    tracing::info!("============================================================");
    tracing::info!("signaling endpoint: ws://{addr}/ws");
    tracing::info!("offer endpoint:     http://{addr}/offer");
    tracing::info!("consumer page:      http://{addr}/");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("shutdown signal listener failed: {e}");
    }
    tracing::info!("shutting down");
}

fn init_logging(level: LogLevel) {
    let level = match level {
        LogLevel::Error => "error",
        LogLevel::Warn => "warn",
        LogLevel::Info => "info",
        LogLevel::Debug => "debug",
        LogLevel::Trace => "trace",
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "glass_relay={level},tower_http=warn,webrtc=warn"
        ))
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
