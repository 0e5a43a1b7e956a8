use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use regsync_core::app::{AppBuilder, Backends};
use regsync_core::config::SyncConfig;
use regsync_core::domain::{ExecuteError, Outcome, Registry, RegistryType, Task};
use regsync_core::impls::{ChangeSources, ScriptedChangeSource};
use regsync_core::ports::{ChangeRecord, ChangeSource, Clock, SystemClock};
use regsync_core::typed::{Handler, SyncPackagePayload, UpdateProxyCachePayload};

#[derive(Parser, Debug)]
#[command(name = "regsync", about = "Registry mirror sync engine")]
struct Cli {
    /// Path to the TOML configuration file. Missing file means defaults.
    #[arg(short, long, env = "REGSYNC_CONFIG", default_value = "regsync.toml", global = true)]
    config: PathBuf,

    /// Debug logging (overridden by RUST_LOG).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load and validate the configuration, then print it.
    CheckConfig,

    /// Run the engine in memory against a scripted change feed.
    Run {
        /// Registries and their change feeds (JSON).
        #[arg(long, default_value = "demos/changes.json")]
        changes: PathBuf,

        /// Stop after this many seconds (Ctrl+C stops earlier).
        #[arg(long, default_value_t = 5)]
        duration_secs: u64,
    },
}

/// Demo fixture: registries and the change log of each.
#[derive(Debug, Deserialize)]
struct Fixture {
    registries: Vec<FixtureRegistry>,
    #[serde(default)]
    changes: BTreeMap<String, Vec<FixtureChange>>,
}

#[derive(Debug, Deserialize)]
struct FixtureRegistry {
    name: String,
    host: String,
    #[serde(default)]
    change_stream_url: Option<String>,
    #[serde(default = "default_registry_type")]
    registry_type: RegistryType,
    #[serde(default)]
    scopes: Vec<String>,
}

fn default_registry_type() -> RegistryType {
    RegistryType::NpmStyle
}

#[derive(Debug, Deserialize)]
struct FixtureChange {
    seq: u64,
    id: String,
}

/// Stand-in for the real package sync: logs and succeeds.
struct LoggingSync;

#[async_trait]
impl Handler<SyncPackagePayload> for LoggingSync {
    async fn handle(&self, task: &Task, payload: SyncPackagePayload) -> Result<Outcome, ExecuteError> {
        tracing::info!(
            task_id = %task.task_id,
            fullname = %payload.fullname,
            registry = %payload.registry_name,
            tips = payload.tips.as_deref().unwrap_or(""),
            "syncing package"
        );
        Ok(Outcome::success().with_summary(format!("synced {}", payload.fullname)))
    }
}

struct LoggingProxyCheck;

#[async_trait]
impl Handler<UpdateProxyCachePayload> for LoggingProxyCheck {
    async fn handle(&self, task: &Task, payload: UpdateProxyCachePayload) -> Result<Outcome, ExecuteError> {
        tracing::info!(
            task_id = %task.task_id,
            fullname = %payload.fullname,
            file_type = %payload.file_type,
            "checking proxy cache"
        );
        Ok(Outcome::success())
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose {
        "regsync=debug,regsync_core=debug"
    } else {
        "regsync=info,regsync_core=info"
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_fixture(path: &Path) -> Result<Fixture> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

async fn run(config: SyncConfig, changes: &Path, duration: Duration) -> Result<()> {
    let fixture = load_fixture(changes)?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let backends = Backends::in_memory(clock.clone());

    let source = Arc::new(ScriptedChangeSource::new(0u64));
    for registry in fixture.registries {
        let change_stream_url = registry
            .change_stream_url
            .unwrap_or_else(|| format!("{}/_changes", registry.host));
        backends
            .registries
            .create_registry(Registry {
                user_prefix: format!("{}:", registry.name),
                name: registry.name,
                host: registry.host,
                change_stream_url,
                registry_type: registry.registry_type,
                scopes: registry.scopes.into_iter().collect(),
                created_at: clock.now(),
            })
            .await
            .context("creating fixture registry")?;
    }
    for (registry, records) in fixture.changes {
        source
            .append(&registry, records.into_iter().map(|c| ChangeRecord::new(c.seq, c.id)))
            .await;
    }

    let app = AppBuilder::new(config, backends)
        .change_sources(ChangeSources::uniform(source as Arc<dyn ChangeSource>))
        .register::<SyncPackagePayload, _>(LoggingSync)?
        .register::<UpdateProxyCachePayload, _>(LoggingProxyCheck)?
        .build()
        .context("wiring the engine")?;

    app.start().await.context("engine startup")?;
    let workers = app.spawn();

    tokio::select! {
        _ = tokio::time::sleep(duration) => tracing::info!("run duration elapsed"),
        result = tokio::signal::ctrl_c() => {
            result.context("installing Ctrl+C handler")?;
            tracing::info!("received SIGINT");
        }
    }
    workers.shutdown_and_join().await;

    let status = app.status().await.context("collecting status")?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = SyncConfig::load(&cli.config)
        .with_context(|| format!("loading config from {}", cli.config.display()))?;
    tracing::debug!(config_path = %cli.config.display(), "configuration loaded");

    match cli.command {
        Command::CheckConfig => {
            println!("{config:#?}");
            Ok(())
        }
        Command::Run { changes, duration_secs } => {
            run(config, &changes, Duration::from_secs(duration_secs)).await
        }
    }
}
