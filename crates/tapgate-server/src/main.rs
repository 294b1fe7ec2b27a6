//! `TapGate` server
//!
//! HTTP and WebSocket backend for RFID/NFC card readers and the admin
//! dashboard.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tracing::info;

use tapgate_core::config::{self, Config};
use tapgate_core::tracing_init::init_tracing;

use tapgate_server::gate::Gate;
use tapgate_server::notifier::EventNotifier;
use tapgate_server::retention::spawn_event_retention;
use tapgate_server::routes::{AppState, build_router};
use tapgate_server::storage::Database;

#[derive(Parser, Debug)]
#[command(name = "tapgate-server")]
#[command(version, about = "TapGate server - card tap access control backend")]
struct Args {
    /// Path to a JSON settings file.
    #[arg(long, env = "TAPGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on.
    #[arg(long)]
    addr: Option<SocketAddr>,

    /// Path to SQLite database file.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long)]
    log_json: bool,

    /// Deny site-bound cards tapped at another site.
    #[arg(long)]
    site_scoping: Option<bool>,

    /// Delete tap events older than this many days (0 keeps everything).
    #[arg(long)]
    event_retention_days: Option<u32>,
}

impl Args {
    fn apply(&self, config: &mut Config) {
        if let Some(addr) = self.addr {
            config.server.listen_addr = addr;
        }
        if let Some(path) = &self.db_path {
            config.server.database_path = Some(path.clone());
        }
        if self.log_json {
            config.server.log_json = true;
        }
        if let Some(scoping) = self.site_scoping {
            config.access.site_scoping = scoping;
        }
        if let Some(days) = self.event_retention_days {
            config.access.event_retention_days = Some(days).filter(|d| *d > 0);
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = config::load_config(args.config.as_deref())?;
    args.apply(&mut config);

    init_tracing(config.server.log_json);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %config.server.listen_addr,
        site_scoping = config.access.site_scoping,
        "Starting tapgate-server"
    );

    let db_path = match &config.server.database_path {
        Some(path) => path.clone(),
        None => default_db_path()?,
    };
    info!(path = %db_path.display(), "Opening card database");
    let db = Database::open(&db_path).await?;
    info!(
        cards = db.count_cards().await?,
        events = db.count_events().await?,
        "Card database ready"
    );

    let notifier = EventNotifier::new(config.notifier.broadcast_capacity);
    let gate = Gate::new(db.clone(), notifier, config.access.policy());

    if let Some(days) = config.access.event_retention_days {
        spawn_event_retention(db, days);
    }

    let app = build_router(AppState { gate });
    let listener = tokio::net::TcpListener::bind(config.server.listen_addr).await?;
    info!(addr = %config.server.listen_addr, "TapGate server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Received shutdown signal");
        })
        .await?;

    info!("TapGate server stopped");
    Ok(())
}

fn default_db_path() -> anyhow::Result<PathBuf> {
    if let Some(path) = config::database_path() {
        return Ok(path);
    }
    let home =
        dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Cannot determine home directory"))?;
    Ok(home.join(".config").join("tapgate").join("tapgate.db"))
}
