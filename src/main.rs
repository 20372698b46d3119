use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use vote_kiosk::api::{self, AppState};
use vote_kiosk::config::{KioskConfig, RETRY_DELAY, SCAN_COOLDOWN, SHEETS_SYNC_DEBOUNCE};
use vote_kiosk::kiosk::spawn_scan_consumer;
use vote_kiosk::nfc;
use vote_kiosk::setup::run_setup;
use vote_kiosk::sheets::{GoogleConnector, SheetsSync};
use vote_kiosk::store::{Database, LibSqlBackend};
use vote_kiosk::voting::TokenSigner;

/// NFC voting kiosk server.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Run the first-time setup wizard and exit
    #[arg(long)]
    setup: bool,

    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    #[arg(long, default_value_t = 5000)]
    port: u16,
}

/// Stdout plus `<log_dir>/app.log`. The guard must outlive the program.
fn init_tracing(config: &KioskConfig) -> anyhow::Result<tracing_appender::non_blocking::WorkerGuard> {
    std::fs::create_dir_all(&config.log_dir)
        .with_context(|| format!("creating log dir {}", config.log_dir.display()))?;
    let file_appender = tracing_appender::rolling::never(&config.log_dir, "app.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_target(false))
        .with(fmt::layer().with_ansi(false).with_writer(file_writer))
        .init();
    Ok(guard)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = KioskConfig::from_env()?;

    if cli.setup {
        return run_setup(&config, &cli.host, cli.port).await;
    }

    if !config.database_path.exists() {
        eprintln!("Database not found. Run with --setup");
        std::process::exit(1);
    }

    let _log_guard = init_tracing(&config)?;

    // ── Database ─────────────────────────────────────────────────────────
    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(&config.database_path)
            .await
            .with_context(|| format!("opening {}", config.database_path.display()))?,
    );

    // ── Core services ───────────────────────────────────────────────────
    let signer = TokenSigner::new(config.load_secret_key()?);
    let sheets = Arc::new(SheetsSync::new(
        Arc::clone(&db),
        Arc::new(GoogleConnector),
        config.credentials_path.clone(),
        SHEETS_SYNC_DEBOUNCE,
    ));
    let state = AppState::new(db, signer, sheets);

    // ── NFC reader ──────────────────────────────────────────────────────
    let reader = nfc::open_reader(&config);
    let uids = nfc::spawn_reader(reader, RETRY_DELAY, SCAN_COOLDOWN)
        .context("starting NFC reader thread")?;
    spawn_scan_consumer(uids, Arc::clone(&state.scans));

    api::spawn_sweep_task(Arc::clone(&state.admin_sessions));

    // ── HTTP server ─────────────────────────────────────────────────────
    let app = api::router(state);
    let addr = format!("{}:{}", cli.host, cli.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(addr = %addr, "Vote kiosk server started");
    axum::serve(listener, app).await?;

    Ok(())
}
