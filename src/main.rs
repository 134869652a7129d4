//! Flowscope - Kafka records to live visualization events

use clap::Parser;
use flowscope::config::{merge_config_with_args, ConfigFile};
use flowscope::{Result, Server, ServerArgs, ServerConfig};
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn main() -> ExitCode {
    if let Err(e) = run() {
        eprintln!("Flowscope failed to start: {e}");
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn run() -> Result<()> {
    let mut args = ServerArgs::parse();

    let config_file = match args.config {
        Some(ref path) => match ConfigFile::load(path) {
            Ok(config) => Some(config),
            Err(e) => {
                eprintln!("Error loading configuration file: {}", e);
                return Err(e);
            }
        },
        None => ConfigFile::load_default(),
    };

    // CLI and environment take precedence over the file
    if let Some(ref config) = config_file {
        args = merge_config_with_args(args, config);
    }

    let log_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(log_filter)
        .init();

    if config_file.is_some() {
        info!("Configuration loaded from file");
    }

    let config = match ServerConfig::from_args(args) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Failed to create configuration");
            return Err(e);
        }
    };

    let server = match Server::new(config) {
        Ok(server) => server,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            return Err(e);
        }
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(server.run())
}
