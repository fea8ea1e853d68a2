// ABOUTME: Entry point for the userd binary.
// ABOUTME: Parses CLI arguments, initializes tracing, and either serves the HTTP API or prints the event log.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use userd_server::{AppState, UserdConfig, create_router};
use userd_store::JsonlEventLog;

#[derive(Debug, Parser)]
#[command(name = "userd", version, about = "User-record service with a read-through cache and event log")]
struct Cli {
    /// Data directory (overrides USERD_HOME).
    #[arg(long, global = true)]
    home: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve the HTTP API (the default).
    Serve {
        /// Address to bind (overrides USERD_BIND).
        #[arg(long)]
        bind: Option<SocketAddr>,
    },
    /// Print the user events recorded in the event log.
    Events {
        /// Keep polling for new events after printing the existing ones.
        #[arg(long)]
        follow: bool,

        /// Poll interval in milliseconds when following.
        #[arg(long, default_value_t = 500)]
        interval_ms: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("userd=debug,tower_http=debug")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = UserdConfig::from_env().context("invalid configuration")?;
    if let Some(home) = cli.home {
        config.home = home;
    }

    match cli.command.unwrap_or(Command::Serve { bind: None }) {
        Command::Serve { bind } => {
            if let Some(bind) = bind {
                config.bind = bind;
            }
            serve(config).await
        }
        Command::Events {
            follow,
            interval_ms,
        } => print_events(&config, follow, Duration::from_millis(interval_ms)).await,
    }
}

async fn serve(config: UserdConfig) -> anyhow::Result<()> {
    tracing::info!("userd starting up, home {}", config.home.display());

    let state = AppState::from_config(&config)
        .await
        .context("failed to initialise collaborators")?;
    let app = create_router(Arc::new(state));

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;
    tracing::info!("listening on http://{}", config.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("userd shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}

async fn print_events(config: &UserdConfig, follow: bool, interval: Duration) -> anyhow::Result<()> {
    let path = config.event_log_path();
    let mut offset = 0;

    loop {
        if path.exists() {
            let (entries, next) = JsonlEventLog::read_since(&path, offset)
                .with_context(|| format!("failed to read {}", path.display()))?;
            for entry in entries {
                println!(
                    "topic={} kind={} value={}",
                    entry.topic,
                    entry.kind.as_str(),
                    serde_json::to_string(&entry.record)?
                );
            }
            offset = next;
        } else if !follow {
            anyhow::bail!("no event log at {}", path.display());
        }

        if !follow {
            return Ok(());
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }
    }
}
