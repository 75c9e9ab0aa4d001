use anyhow::{Context, Result};
use clap::Parser;
use infinite_git::GitStorage;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "infinite-git")]
#[command(about = "Git server that generates a new commit on every fetch", long_about = None)]
struct Cli {
    /// Port to listen on
    #[arg(long, env = "INFINITE_GIT_PORT", default_value_t = 8080)]
    port: u16,

    /// Path to the served git repository
    #[arg(long, env = "INFINITE_GIT_REPO", default_value = "./infinite-repo")]
    repo: PathBuf,

    /// Log level (debug, info, warn, error)
    #[arg(long, env = "INFINITE_GIT_LOG", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(path = %cli.repo.display(), "initializing repository");
    let storage = Arc::new(
        GitStorage::open(&cli.repo).context("failed to initialize repository")?,
    );

    let app = infinite_git::http::router(storage);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", cli.port))
        .await
        .with_context(|| format!("failed to listen on port {}", cli.port))?;

    info!(addr = %listener.local_addr()?, "starting HTTP server");
    info!("to clone: git clone http://localhost:{}", cli.port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
        return;
    }
    info!("shutting down server");
}
