use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use clap::Subcommand;
use tokio::sync::Mutex;
use tracing_subscriber::prelude::*;
use weatherxm::api;
use weatherxm::config::Config;
use weatherxm::engine::Engine;
use weatherxm::entry::IntervalUnit;
use weatherxm::flow::FlowResult;
use weatherxm::flow::FormErrors;
use weatherxm::flow::OptionsFlow;
use weatherxm::flow::OptionsInput;
use weatherxm::flow::SetupFlow;
use weatherxm::flow::SetupInput;
use weatherxm::provider::HttpWeatherClient;
use weatherxm::runtime::Runtime;
use weatherxm::store::ConfigStore;

const STORE_SYNC_INTERVAL: Duration = Duration::from_secs(30);

/// WeatherXM station integration
#[derive(Debug, Parser)]
#[command(name = "weatherxm", version, about)]
struct Cli {
    /// Path to the configuration file; defaults apply when it does not exist
    #[arg(long, short, default_value = "weatherxm.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Add a station after checking it against the provider
    Setup {
        #[arg(long)]
        device_id: String,

        #[arg(long)]
        cell_index: String,
    },

    /// Change how often a station is polled
    Options {
        entry_id: String,

        #[arg(long, allow_negative_numbers = true)]
        value: i64,

        /// seconds, minutes or hours
        #[arg(long, default_value_t = IntervalUnit::Minutes)]
        unit: IntervalUnit,
    },

    /// List configured stations
    List,

    /// Remove a configured station
    Remove { entry_id: String },

    /// Publish all configured stations and serve the HTTP API
    Run,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_exists = cli.config.exists();
    let config = if config_exists {
        Config::from_file(&cli.config)
            .with_context(|| format!("loading {}", cli.config.display()))?
    } else {
        Config::default()
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(config.logging.targets())
        .init();

    if config_exists {
        tracing::debug!("Loaded config from: {}", cli.config.display());
    } else {
        tracing::debug!("No config at {}, using defaults", cli.config.display());
    }

    match cli.command {
        Command::Setup {
            device_id,
            cell_index,
        } => setup(&config, device_id, cell_index).await,
        Command::Options {
            entry_id,
            value,
            unit,
        } => options(&config, &entry_id, value, unit),
        Command::List => list(&config),
        Command::Remove { entry_id } => {
            let mut store = open_store(&config)?;
            let record = store.remove(&entry_id)?;
            println!("Removed {} ({})", record.entry_id, record.display_name);
            Ok(())
        }
        Command::Run => run(config).await,
    }
}

fn open_store(config: &Config) -> anyhow::Result<ConfigStore> {
    ConfigStore::open(&config.weatherxm.store_path).with_context(|| {
        format!(
            "opening entry store {}",
            config.weatherxm.store_path.display()
        )
    })
}

fn http_client(config: &Config) -> anyhow::Result<HttpWeatherClient> {
    HttpWeatherClient::new(&config.weatherxm.base_url, config.weatherxm.timeout())
}

fn form_failure(errors: &FormErrors) -> anyhow::Error {
    let details: Vec<String> = errors
        .iter()
        .map(|(field, error)| format!("{}: {}", field, error))
        .collect();
    anyhow::anyhow!("rejected ({})", details.join(", "))
}

async fn setup(config: &Config, device_id: String, cell_index: String) -> anyhow::Result<()> {
    let client = http_client(config)?;
    let mut store = open_store(config)?;

    let mut flow = SetupFlow::new(&client, store.configured_ids());
    let input = SetupInput {
        device_id,
        cell_index,
    };
    match flow.submit(input).await {
        FlowResult::CreateEntry(record) => {
            println!(
                "Added {} ({}, device {})",
                record.entry_id, record.display_name, record.device
            );
            store.insert(record)?;
            Ok(())
        }
        FlowResult::ShowForm { errors, .. } => Err(form_failure(&errors)).context("setup"),
    }
}

fn options(config: &Config, entry_id: &str, value: i64, unit: IntervalUnit) -> anyhow::Result<()> {
    let mut store = open_store(config)?;
    let record = store
        .get(entry_id)
        .with_context(|| format!("no such entry: {}", entry_id))?;

    let input = OptionsInput {
        polling_interval_value: value,
        polling_interval_unit: unit,
    };
    match OptionsFlow::new(record.options).submit(input) {
        FlowResult::CreateEntry(options) => {
            let record = store.update_options(entry_id, options)?;
            println!(
                "{} now polls every {}",
                record.entry_id, record.options.polling_interval
            );
            Ok(())
        }
        FlowResult::ShowForm { errors, .. } => Err(form_failure(&errors)).context("options"),
    }
}

fn list(config: &Config) -> anyhow::Result<()> {
    let store = open_store(config)?;
    if store.is_empty() {
        println!("No stations configured");
        return Ok(());
    }
    for record in store.entries() {
        println!(
            "{}\t{}\t{}\tevery {}",
            record.entry_id, record.display_name, record.device, record.options.polling_interval
        );
    }
    Ok(())
}

async fn run(config: Config) -> anyhow::Result<()> {
    tracing::info!("weatherxm starting");

    let engine = Arc::new(Engine::new());
    let engine_task = tokio::spawn({
        let engine = engine.clone();
        async move { engine.run().await }
    });

    let client = Arc::new(http_client(&config)?);
    let runtime = Arc::new(Runtime::new(
        engine.clone(),
        client,
        config.weatherxm.language,
    ));

    let mut store = open_store(&config)?;
    runtime.activate_all(&mut store).await;
    let store = Arc::new(Mutex::new(store));
    let sync_task = tokio::spawn(sync_store(runtime.clone(), store.clone()));

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let api_task = tokio::spawn(api::serve(
        config.api.listen.clone(),
        config.api.port,
        api::AppState::new(runtime.clone(), store),
        shutdown_rx,
    ));

    tracing::info!("Press Ctrl+C to exit");
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received shutdown signal");
        }
        Err(e) => {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
        }
    }

    shutdown_tx.send(()).ok();
    sync_task.abort();
    runtime.unload_all().await;

    match api_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!("HTTP API server failed: {}", e),
        Err(e) => tracing::error!("HTTP API task panicked: {}", e),
    }
    // The engine loop never ends on its own; it owns a sender to itself
    engine_task.abort();

    tracing::info!("weatherxm shutdown complete");
    Ok(())
}

/// Unload stations that `weatherxm remove` deleted while the daemon runs.
async fn sync_store(runtime: Arc<Runtime>, store: Arc<Mutex<ConfigStore>>) {
    let mut interval = tokio::time::interval(STORE_SYNC_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    interval.tick().await;

    loop {
        interval.tick().await;
        let mut store = store.lock().await;
        if let Err(e) = store.reload() {
            tracing::warn!("Failed to re-read entry store: {}", e);
            continue;
        }
        runtime.unload_removed(&store).await;
    }
}
