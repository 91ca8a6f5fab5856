//! Tandem Server
//!
//! Stores conversations and generates replies over a WebSocket push
//! channel and a plain HTTP fallback endpoint.

mod auth;
mod chat;
mod http;
mod logging;
mod paths;
mod persistence;
mod provider;
mod state;
mod websocket;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing::info;

use crate::persistence::Store;
use crate::provider::Providers;
use crate::state::AppState;

#[derive(Debug, Parser)]
#[command(name = "tandem-server", version, about = "Tandem generation server")]
struct Cli {
    /// Address to listen on
    #[arg(long, env = "TANDEM_SERVER_BIND", default_value = "127.0.0.1:4000")]
    bind: SocketAddr,

    /// Data directory (database and logs)
    #[arg(long, env = "TANDEM_SERVER_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Require this token on every request except /health
    #[arg(long, env = "TANDEM_AUTH_TOKEN")]
    auth_token: Option<String>,

    /// Use OpenAI unless a request asks otherwise
    #[arg(long, env = "USE_OPENAI")]
    use_openai: bool,

    /// Pause between streamed chunks, in milliseconds
    #[arg(long, env = "TANDEM_CHUNK_DELAY_MS", default_value_t = 30)]
    chunk_delay_ms: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let data_dir = paths::resolve_data_dir(cli.data_dir.as_deref())?;
    paths::ensure_dirs(&data_dir)?;
    let logging = logging::init_logging(&paths::log_dir(&data_dir))?;

    info!(
        component = "server",
        event = "server.starting",
        run_id = %logging.run_id,
        log_path = %logging.log_path.display(),
        data_dir = %data_dir.display(),
        use_openai = cli.use_openai,
        auth = cli.auth_token.is_some(),
        "Starting Tandem Server"
    );

    let store = Store::open(&paths::db_path(&data_dir)).await?;
    let state = AppState::new(
        store,
        Providers::new(cli.use_openai),
        Duration::from_millis(cli.chunk_delay_ms),
    );
    let auth_token = cli.auth_token.filter(|t| !t.trim().is_empty());
    let app = http::build_router(state, auth_token);

    let listener = tokio::net::TcpListener::bind(cli.bind).await?;
    info!(
        component = "server",
        event = "server.listening",
        bind = %cli.bind,
        "Listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!(
        component = "server",
        event = "server.stopped",
        "Server stopped"
    );
    drop(logging);
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
