//! readsel - select-all controls for a live reading page.
//!
//! Main entry point: attaches to a browser page over CDP and keeps the
//! augmenter running until Ctrl-C or until the page goes away.

mod cli;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use readsel_cdp::{CdpClient, CdpDocument};
use readsel_config::{Config, ConfigLoader, ConfigValidator, LoggingConfig};
use readsel_core::{Augmenter, Settings};

use crate::cli::{Cli, Commands, RunArgs};

/// Get the .readsel directory path.
fn readsel_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".readsel"))
        .unwrap_or_else(|| PathBuf::from(".readsel"))
}

/// Load the configuration.
///
/// An explicit path must exist; the default path falls back to built-in
/// defaults when absent.
fn load_config(path: Option<&Path>) -> Result<Config, Box<dyn std::error::Error>> {
    let config = match path {
        Some(path) => ConfigLoader::load(path)?,
        None => ConfigLoader::load_or_default(&readsel_dir().join("config.toml"))?,
    };
    Ok(config)
}

/// Initialize tracing with console and file output.
///
/// Log files are written to the configured directory with daily rotation.
fn init_tracing(logging: &LoggingConfig) -> Result<(), Box<dyn std::error::Error>> {
    let log_dir = PathBuf::from(ConfigLoader::expand_path(&logging.dir.to_string_lossy()));
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("readsel")
        .filename_suffix("log")
        .max_log_files(logging.max_files)
        .build(&log_dir)?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // Keep the writer flushing for the program duration.
    static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
        std::sync::OnceLock::new();
    let _ = GUARD.set(guard);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    tracing_subscriber::registry()
        .with(env_filter)
        // Console layer
        .with(fmt::layer().with_target(true).with_ansi(true))
        // File layer
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .init();

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Some(Commands::CheckConfig) => check_config(&config),
        Some(Commands::Run(args)) => {
            init_tracing(&config.logging)?;
            run(config, args).await
        }
        None => {
            init_tracing(&config.logging)?;
            run(config, RunArgs::default()).await
        }
    }
}

/// Print validation results; fails when the configuration has errors.
fn check_config(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let result = ConfigValidator::validate(config);

    for error in &result.errors {
        eprintln!("error: {}: {}", error.path, error.message);
    }
    for warning in &result.warnings {
        eprintln!("warning: {}: {}", warning.path, warning.message);
    }

    if !result.is_valid() {
        return Err(format!("configuration has {} error(s)", result.errors.len()).into());
    }

    // Patterns and shortcut are only checked when compiled.
    Settings::from_config(config)?;
    println!("Configuration OK ({} warning(s))", result.warnings.len());
    Ok(())
}

/// Attach to the page and augment it until interrupted.
async fn run(config: Config, args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    info!("Starting readsel v{}", env!("CARGO_PKG_VERSION"));

    let settings = Settings::from_config(&config)?;
    let endpoint = args.endpoint.unwrap_or(config.browser.endpoint);

    let client = CdpClient::connect(&endpoint).await?;
    info!("Connected to {}", client.browser_ws_url());

    let session = match args.open {
        Some(url) => client.open_page(&url).await?,
        None => {
            let fragment = args.page.unwrap_or(config.browser.page_url);
            let page = client.find_page(&fragment).await?;
            info!("Attaching to '{}' ({})", page.title, page.url);
            client.attach_page(&page.id).await?
        }
    };

    let document = Arc::new(CdpDocument::attach(session).await?);
    let augmenter = Augmenter::new(document.clone(), settings);

    // Every document the page loads gets its own run of the augmenter.
    loop {
        let mut loads = document.page_loads();
        match augmenter.start().await {
            Ok(()) => {
                tokio::select! {
                    result = tokio::signal::ctrl_c() => {
                        result?;
                        info!("Shutdown signal received");
                        augmenter.stop().await?;
                        break;
                    }
                    _ = augmenter.closed() => {
                        info!("Document replaced, waiting for the next one");
                        augmenter.stop().await?;
                    }
                }
            }
            Err(e) => warn!("Augmenter did not start: {}; waiting for the next document", e),
        }

        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                info!("Shutdown signal received");
                break;
            }
            changed = loads.changed() => {
                if changed.is_err() {
                    warn!("Page is gone, shutting down");
                    break;
                }
            }
        }
    }

    info!("readsel stopped");
    Ok(())
}
