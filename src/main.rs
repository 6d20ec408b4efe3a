use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};

use crew_warden::config::{StoreBackend, WardenConfig};
use crew_warden::notify::{LogNotificationChannel, Mention, NotificationChannel};
use crew_warden::store::{MemoryStore, TransactionalStore};
use crew_warden::worker::{ProcessWorkerLauncher, WorkerLauncher};
use crew_warden::{
    init_telemetry, CoordinationBridge, EscalationNotifier, InstanceLock, ShutdownCoordinator, SystemClock,
};

#[derive(Parser)]
#[command(name = "crew-warden")]
#[command(about = "File ownership and liveness coordination for concurrent worker agents")]
#[command(long_about = "Crew Warden keeps a pool of workers from editing the same files at once, \
                       watches each worker for stalls and recovers it by nudging, restarting or \
                       escalating to an operator. Start the coordinator with 'crew-warden run'.")]
struct Cli {
    /// Configuration file (defaults to ./crew-warden.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the coordinator, reading directives from stdin
    Run {
        /// Name directives read from stdin are attributed to
        #[arg(long, default_value = "operator")]
        operator: String,
    },
    /// Print the effective configuration
    Config {
        /// Also write it to this file
        #[arg(long)]
        write: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    WardenConfig::load_env_file()?;
    let config = WardenConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Run { operator } => {
            let runtime = tokio::runtime::Runtime::new()?;
            let result = runtime.block_on(async { run_command(config, operator).await });
            // A pending stdin read would otherwise hold the runtime open
            runtime.shutdown_background();
            result
        }
        Commands::Config { write } => config_command(&config, write),
    }
}

fn config_command(config: &WardenConfig, write: Option<PathBuf>) -> Result<()> {
    print!("{}", config.to_toml()?);
    if let Some(path) = write {
        config.save_to_file(&path)?;
        eprintln!("Configuration written to {}", path.display());
    }
    Ok(())
}

async fn open_store(config: &WardenConfig) -> Result<Arc<dyn TransactionalStore>> {
    match config.store.backend {
        StoreBackend::Memory => Ok(Arc::new(MemoryStore::new())),
        #[cfg(feature = "database")]
        StoreBackend::Sqlite => {
            let url = config.database_url();
            let retry = crew_warden::store::StoreRetry::new(config.store.retry.clone());
            let store = retry
                .run("open", || crew_warden::store::SqliteStore::open(&url))
                .await
                .map_err(|e| anyhow::Error::new(e).context(format!("Failed to open coordination store at {url}")))?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "database"))]
        StoreBackend::Sqlite => anyhow::bail!("store.backend = \"sqlite\" requires the 'database' feature"),
    }
}

async fn run_command(config: WardenConfig, operator: String) -> Result<()> {
    init_telemetry(&config.observability)?;
    let _instance = InstanceLock::acquire(config.lock_path())?;
    let store = open_store(&config).await?;

    let launcher: Arc<dyn WorkerLauncher> = Arc::new(ProcessWorkerLauncher::new(config.worker.clone()));
    let log_channel = Arc::new(LogNotificationChannel::new());
    let channel: Arc<dyn NotificationChannel> = log_channel.clone();

    let runtime = CoordinationBridge::assemble(&config, store, launcher, channel.clone(), Arc::new(SystemClock));
    let bridge = runtime.bridge;

    let mut shutdown = ShutdownCoordinator::default();

    let monitor = bridge.monitor().clone();
    let rx = shutdown.subscribe();
    shutdown.track("health-monitor", tokio::spawn(async move { monitor.run(rx).await }));

    let recovery = bridge.recovery().clone();
    let rx = shutdown.subscribe();
    let signals = runtime.signals;
    shutdown.track("recovery", tokio::spawn(async move { recovery.run(signals, rx).await }));

    let notifier = EscalationNotifier::new(channel, config.recovery.operator.clone());
    let escalations = runtime.escalations;
    let mut rx = shutdown.subscribe();
    shutdown.track(
        "escalation-notifier",
        tokio::spawn(async move {
            tokio::select! {
                _ = notifier.run(escalations) => {}
                _ = rx.changed() => {}
            }
        }),
    );

    let pump = bridge.spawn_event_pump(shutdown.subscribe());
    shutdown.track("event-pump", pump);

    let inbox = bridge.subscribe_mentions();
    let server = bridge.clone();
    let rx = shutdown.subscribe();
    shutdown.track("directives", tokio::spawn(async move { server.serve(inbox, rx).await }));

    // Stdin is not tracked: a blocked read cannot observe the shutdown signal
    let reader_channel = log_channel.clone();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => {
                    reader_channel.inject_mention(Mention {
                        from: operator.clone(),
                        text: line,
                    });
                }
                Ok(None) => break,
                Err(e) => {
                    error!(error = %e, "Failed to read directives from stdin");
                    break;
                }
            }
        }
    });

    info!(
        state_dir = %config.state_dir.display(),
        poll_interval_secs = config.monitor.poll_interval_secs,
        "Coordinator running"
    );
    ShutdownCoordinator::wait_for_signal().await?;
    shutdown.shutdown_all_services().await;
    Ok(())
}
