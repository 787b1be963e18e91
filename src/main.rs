//! Hardware-wallet swap console - Main executable
//!
//! Requests quotes from the swap provider, walks the user through the
//! summary and device confirmation, broadcasts the signed transaction and
//! keeps a history of every swap.
use anyhow::Context;
use dotenv::dotenv;
use log::{error, info, warn};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use swap_flow::device::{DeviceTransport, EmulatedDevice, TcpDeviceTransport};
use swap_flow::history::{HistoryReader, HistoryStore, InMemoryHistoryStore, PgHistoryStore};
use swap_flow::{
    parse_command, AppConfig, ConsoleCommand, ConsoleSwapView, ServiceContainer,
    SwapFlowController, SwapPresenter, SwapPresenterImpl, UserIntent,
};
use tokio::io::{AsyncBufReadExt, BufReader};

const EMULATOR_ADDR: &str = "emulator";
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

async fn open_history(
    config: &AppConfig,
) -> anyhow::Result<(Arc<dyn HistoryStore>, Arc<dyn HistoryReader>)> {
    let Some(database_url) = config.database_url.as_deref() else {
        warn!("SWAP_DATABASE_URL not set, swap history is kept in memory only");
        let store = Arc::new(InMemoryHistoryStore::new());
        let history: Arc<dyn HistoryStore> = store.clone();
        let reader: Arc<dyn HistoryReader> = store;
        return Ok((history, reader));
    };

    // Setup database connection pool
    info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await
        .context("Failed to create database connection pool")?;

    // Run database migrations
    info!("Running database migrations...");
    if let Err(e) = sqlx::migrate!("./migrations").run(&db_pool).await {
        error!("Failed to run migrations: {}", e);
        return Err(anyhow::Error::from(e));
    }
    info!("Migrations completed successfully");

    let store = Arc::new(PgHistoryStore::new(Arc::new(db_pool)));
    let history: Arc<dyn HistoryStore> = store.clone();
    let reader: Arc<dyn HistoryReader> = store;
    Ok((history, reader))
}

fn open_device(config: &AppConfig) -> Arc<dyn DeviceTransport> {
    if config.device_addr == EMULATOR_ADDR {
        info!("Using emulated device");
        Arc::new(EmulatedDevice::new("emulator-1", &config.exchange_app_name))
    } else {
        info!("Using device bridge at {}", config.device_addr);
        Arc::new(TcpDeviceTransport::new(&config.device_addr))
    }
}

/// Application entry point
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenv().ok();

    // Initialize logging with default level of "info"
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));
    info!("Starting swap console v{}", swap_flow::VERSION);

    let config = AppConfig::from_env()?;
    let (history, history_reader) = open_history(&config).await?;
    let transport = open_device(&config);

    let buy_supported = config.buy_supported();
    let container = ServiceContainer::new(config, history, history_reader, transport);

    let flow = SwapFlowController::spawn(container.flow_deps());
    let presenter = Arc::new(SwapPresenterImpl::new(
        Arc::new(ConsoleSwapView::new()),
        container.history_reader(),
        buy_supported,
    ));
    tokio::spawn(presenter.clone().run(flow.subscribe()));

    presenter.present_usage().await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read from stdin")?,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        };
        let Some(line) = line else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        let command = match parse_command(&line) {
            Ok(command) => command,
            Err(e) => {
                presenter.present_error(&e.to_string()).await?;
                continue;
            }
        };

        match command {
            ConsoleCommand::Intent(intent) => flow.send(intent)?,
            ConsoleCommand::History => presenter.present_history().await?,
            ConsoleCommand::Device => {
                presenter
                    .present_device(&container.device().session())
                    .await?
            }
            ConsoleCommand::Help => presenter.present_usage().await?,
            ConsoleCommand::Quit => break,
        }
    }

    // Leave the device idle if a confirmation is still pending
    if flow.state().is_device_step() {
        flow.send(UserIntent::Cancel)?;
        let settled = flow.wait_for(|state| !state.is_device_step());
        if tokio::time::timeout(SHUTDOWN_GRACE, settled).await.is_err() {
            warn!("Swap still in progress at shutdown: {}", flow.state());
        }
    }

    info!("Swap console stopped");
    Ok(())
}
