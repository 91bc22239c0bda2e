#![allow(clippy::result_large_err)]

use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use ecosense::{
    broker::{BrokerHandle, ConnectParams},
    config::{self, Credentials, Settings},
    core::{DocumentRef, SensorKind},
    dashboard::{Dashboard, DataSource, server},
    entities::ReadingModel,
    errors::{Error, Result},
    importer,
    ingest::{IngestBridge, TopicMap},
    relay::ConfigRelay,
};
use sea_orm::DatabaseConnection;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// EcoSense telemetry station
#[derive(Debug, Parser)]
#[command(name = "ecosense", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Ingest sensor readings and relay threshold changes to the device
    Bridge,
    /// Serve the dashboard, reading from the store
    Dashboard,
    /// Bridge, relay and a live-fed dashboard in one process
    Serve,
    /// Import historical readings from CSV files
    Import {
        /// Sensor kind of every row (temperature or humidity)
        #[arg(long)]
        kind: SensorKind,
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
        /// CSV files with `timestamp,value` columns
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Initialize tracing (as early as possible)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    // 2. Load .env file, non-fatal: env vars can be set externally
    dotenv().ok();
    info!("Attempted to load .env file.");

    // 3. Load the main application configuration
    let settings = config::load_app_configuration()
        .inspect_err(|e| error!("Critical error loading application configuration: {e}"))?;
    info!("Successfully processed application configuration.");

    // 4. Credentials must exist before any connection is made
    let credentials = config::load_credentials(&settings.credentials_path)
        .inspect_err(|e| error!("Cannot start without credentials: {e}"))?;

    // 5. Initialize the store
    let db = config::database::create_connection(&settings.store.database_url)
        .await
        .inspect(|_| info!("Database initialized successfully."))
        .inspect_err(|e| error!("Failed to initialize database: {e}"))?;

    match cli.command {
        Command::Bridge => run_bridge(&settings, &credentials, db).await,
        Command::Dashboard => run_dashboard(&settings, db).await,
        Command::Serve => run_serve(&settings, &credentials, db).await,
        Command::Import { kind, yes, files } => run_import(&settings, db, kind, yes, &files).await,
    }
}

/// Shutdown broadcast, flipped to `true` on Ctrl-C or by the caller.
fn shutdown_signal() -> Arc<watch::Sender<bool>> {
    let (tx, _) = watch::channel(false);
    let tx = Arc::new(tx);
    let on_signal = Arc::clone(&tx);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Ctrl-C received, shutting down"),
            Err(e) => error!("Failed to listen for Ctrl-C: {e}"),
        }
        on_signal.send_replace(true);
    });
    tx
}

fn config_document(settings: &Settings) -> DocumentRef {
    DocumentRef::new(
        settings.store.config_collection.clone(),
        settings.store.config_doc_id.clone(),
    )
}

/// Running bridge: broker session plus the ingest and relay tasks.
struct BridgeTasks {
    broker: BrokerHandle,
    tasks: Vec<JoinHandle<()>>,
}

impl BridgeTasks {
    async fn stop(self) {
        self.broker.shutdown().await;
        for task in self.tasks {
            if let Err(e) = task.await {
                error!("Task ended abnormally: {e}");
            }
        }
    }
}

async fn start_bridge(
    settings: &Settings,
    credentials: &Credentials,
    db: &DatabaseConnection,
    shutdown: &watch::Receiver<bool>,
    relay_wakeup: Arc<Notify>,
    live_feed: Option<mpsc::Sender<ReadingModel>>,
) -> Result<BridgeTasks> {
    let topics = TopicMap::from_settings(&settings.topics);
    let (inbound_tx, inbound_rx) = mpsc::channel(settings.mqtt.queue_capacity);
    let broker = BrokerHandle::new(
        ConnectParams {
            settings: settings.mqtt.clone(),
            credentials: credentials.mqtt.clone(),
            subscriptions: topics.topics(),
        },
        inbound_tx,
    );

    let relay = ConfigRelay::new(
        db.clone(),
        config_document(settings),
        broker.clone(),
        settings.topics.config.clone(),
        settings.relay.retain,
    );
    relay
        .bootstrap()
        .await
        .inspect_err(|e| error!("Failed to bootstrap threshold document: {e}"))?;

    broker.connect().await;

    let mut bridge = IngestBridge::new(db.clone(), settings.store.data_collection.clone(), topics);
    if let Some(feed) = live_feed {
        bridge = bridge.with_live_feed(feed);
    }

    let tasks = vec![
        tokio::spawn(bridge.run(inbound_rx, shutdown.clone())),
        tokio::spawn(relay.run(
            Duration::from_secs(settings.relay.poll_secs),
            relay_wakeup,
            shutdown.clone(),
        )),
    ];
    Ok(BridgeTasks { broker, tasks })
}

async fn run_bridge(
    settings: &Settings,
    credentials: &Credentials,
    db: DatabaseConnection,
) -> Result<()> {
    let signal = shutdown_signal();
    let mut shutdown = signal.subscribe();
    let bridge = start_bridge(
        settings,
        credentials,
        &db,
        &shutdown,
        Arc::new(Notify::new()),
        None,
    )
    .await?;

    let _ = shutdown.wait_for(|stop| *stop).await;
    bridge.stop().await;
    Ok(())
}

async fn run_dashboard(settings: &Settings, db: DatabaseConnection) -> Result<()> {
    let shutdown = shutdown_signal().subscribe();
    let dashboard = Arc::new(Dashboard::new(
        db,
        settings.dashboard.clone(),
        settings.store.data_collection.clone(),
        config_document(settings),
        DataSource::Store {
            collection: settings.store.data_collection.clone(),
        },
        None,
        Arc::new(Notify::new()),
    ));

    serve_dashboard(dashboard, &settings.dashboard.bind_addr, shutdown).await
}

async fn run_serve(
    settings: &Settings,
    credentials: &Credentials,
    db: DatabaseConnection,
) -> Result<()> {
    let signal = shutdown_signal();
    let shutdown = signal.subscribe();
    let relay_wakeup = Arc::new(Notify::new());
    let (feed_tx, feed_rx) = mpsc::channel(settings.mqtt.queue_capacity);

    let bridge = start_bridge(
        settings,
        credentials,
        &db,
        &shutdown,
        Arc::clone(&relay_wakeup),
        Some(feed_tx),
    )
    .await?;

    let dashboard = Arc::new(Dashboard::new(
        db,
        settings.dashboard.clone(),
        settings.store.data_collection.clone(),
        config_document(settings),
        DataSource::Live(feed_rx),
        Some(bridge.broker.clone()),
        relay_wakeup,
    ));

    let served = serve_dashboard(dashboard, &settings.dashboard.bind_addr, shutdown).await;
    // the server may have failed without a Ctrl-C; stop the bridge loops too
    signal.send_replace(true);
    bridge.stop().await;
    served
}

/// Runs the tick loop and the HTTP server until shutdown, or until the server
/// fails to start.
async fn serve_dashboard(
    dashboard: Arc<Dashboard>,
    addr: &str,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let ticks = tokio::spawn(Arc::clone(&dashboard).run_ticks(shutdown.clone()));
    let served = server::serve(dashboard, addr, shutdown).await;
    if served.is_err() {
        ticks.abort();
    }
    match ticks.await {
        Err(e) if !e.is_cancelled() => error!("Dashboard tick task ended abnormally: {e}"),
        _ => {}
    }
    served
}

async fn run_import(
    settings: &Settings,
    db: DatabaseConnection,
    kind: SensorKind,
    yes: bool,
    files: &[PathBuf],
) -> Result<()> {
    let collection = &settings.store.data_collection;
    if !yes {
        let prompt = format!(
            "Import {} file(s) as {kind} readings into {collection}?",
            files.len()
        );
        if !confirm(&prompt)? {
            warn!("Import cancelled");
            return Ok(());
        }
    }

    let summary = importer::import_files(&db, collection, kind, files).await?;
    info!(
        "Import finished: {} rows written in {} batches, {} rows skipped",
        summary.rows_written, summary.batches_committed, summary.rows_skipped
    );
    Ok(())
}

/// Asks a yes/no question on the terminal. Anything but `y`/`yes` is a no.
fn confirm(prompt: &str) -> Result<bool> {
    let mut stdout = io::stdout();
    write!(stdout, "{prompt} [y/N] ")?;
    stdout.flush()?;

    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer).map_err(Error::from)?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}
