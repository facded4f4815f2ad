use anyhow::{Context, Result};
use birthbook_rpc::{start_server, AppState};
use birthbook_storage::{MemoryStorage, SledStorage, UserStore};
use clap::{value_parser, Arg, ArgAction, Command};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod settings;
mod version;

use settings::{load_config_with_overrides, AppConfig, StorageBackend};
use version::{git_commit_hash, BIRTHBOOK_VERSION};

pub(crate) fn cli() -> Command {
    Command::new("birthbook-node")
        .version(BIRTHBOOK_VERSION)
        .about("Birthday registry and calculator HTTP service")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .global(true),
        )
        .arg(
            Arg::new("host")
                .long("host")
                .value_name("ADDR")
                .help("Bind address")
                .global(true),
        )
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .value_name("PORT")
                .value_parser(value_parser!(u16))
                .help("Bind port")
                .global(true),
        )
        .arg(
            Arg::new("db-path")
                .short('d')
                .long("db-path")
                .value_name("DIR")
                .help("User database location")
                .global(true),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .help("Log level (trace, debug, info, warn, error)")
                .global(true),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .value_parser(["pretty", "json"])
                .help("Log output format")
                .global(true),
        )
        .arg(
            Arg::new("debug")
                .long("debug")
                .action(ArgAction::SetTrue)
                .help("Enable debug logging")
                .global(true),
        )
        .arg(
            Arg::new("memory")
                .long("memory")
                .action(ArgAction::SetTrue)
                .help("Keep users in memory instead of on disk")
                .global(true),
        )
        .arg(
            Arg::new("no-seed")
                .long("no-seed")
                .action(ArgAction::SetTrue)
                .help("Do not insert the sample users into an empty store")
                .global(true),
        )
        .subcommand(Command::new("start").about("Run the HTTP service (default)"))
        .subcommand(Command::new("status").about("Check /ping on the configured address"))
        .subcommand(Command::new("version").about("Print version information"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();

    if let Some(("version", _)) = matches.subcommand() {
        print_version_info();
        return Ok(());
    }

    let config = load_config_with_overrides(&matches)?;

    if let Some(("status", _)) = matches.subcommand() {
        return check_status(&config).await;
    }

    init_logging(&config)?;
    run(config).await
}

async fn run(config: AppConfig) -> Result<()> {
    info!(
        "Starting birthbook {} (commit {})",
        BIRTHBOOK_VERSION,
        git_commit_hash()
    );
    if let Some(path) = &config.config_path {
        info!("Loaded configuration from {}", path.display());
    }

    let storage = open_storage(&config)?;
    if config.seed_sample_data {
        storage
            .initialize()
            .context("failed to initialize user store")?;
    }

    let state = AppState::new(storage.clone());
    start_server(state, &config.bind_address(), shutdown_signal()).await?;

    storage.flush().context("failed to flush user store")?;
    info!("Shutdown complete");
    Ok(())
}

fn open_storage(config: &AppConfig) -> Result<Arc<dyn UserStore + Send + Sync>> {
    match config.storage {
        StorageBackend::Sled => {
            let storage = SledStorage::open(&config.db_path).with_context(|| {
                format!("failed to open user store at {}", config.db_path.display())
            })?;
            info!(
                "Opened {} user store at {}",
                config.storage,
                config.db_path.display()
            );
            Ok(Arc::new(storage))
        }
        StorageBackend::Memory => {
            warn!("Using in-memory user store; records are lost on exit");
            Ok(Arc::new(MemoryStorage::new()))
        }
    }
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(err) => {
            warn!("Failed to listen for shutdown signal: {}", err);
            std::future::pending::<()>().await;
        }
    }
}

async fn check_status(config: &AppConfig) -> Result<()> {
    let url = format!("http://{}/ping", config.status_address());
    let response = reqwest::Client::new()
        .get(&url)
        .send()
        .await
        .with_context(|| format!("failed to reach {url}"))?;
    let status = response.status();
    let body = response.text().await?;
    println!("GET {url} -> {status}");
    println!("{body}");
    if status.is_success() {
        Ok(())
    } else {
        anyhow::bail!("Health check failed with status {status}")
    }
}

fn init_logging(config: &AppConfig) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    if config.log_format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init()?;
    }

    Ok(())
}

fn print_version_info() {
    println!("birthbook {} (commit {})", BIRTHBOOK_VERSION, git_commit_hash());
}
