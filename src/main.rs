// src/main.rs

//! Entry point: parses CLI flags, loads configuration, sets up logging,
//! prints the startup banner, and runs the server until a shutdown signal.

use std::env;
use tracing::error;
use tracing_subscriber::{filter::EnvFilter, prelude::*, reload};
use vigilroute::config::Config;
use vigilroute::{meta, server};

const EXIT_CONFIG: i32 = 1;
const EXIT_LOGGER: i32 = 2;
const EXIT_SERVER: i32 = 3;

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();

    if args.iter().any(|a| a == "--version") {
        println!("{}", meta::single_line());
        return;
    }

    let config_path = args
        .iter()
        .position(|a| a == "--config" || a == "-c")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
        .unwrap_or("config.json");

    let config = match Config::from_file(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("failed to load configuration from \"{config_path}\": {e}");
            std::process::exit(EXIT_CONFIG);
        }
    };

    if let Err(e) = init_logging(&config) {
        eprintln!("failed to initialize logging: {e}");
        std::process::exit(EXIT_LOGGER);
    }

    println!("{}", meta::banner());

    if let Err(e) = server::run(config).await {
        error!(error = %e, "server exited with an error");
        std::process::exit(EXIT_SERVER);
    }
}

fn init_logging(config: &Config) -> Result<(), anyhow::Error> {
    let initial_level = env::var("RUST_LOG").unwrap_or_else(|_| config.log.log_level.clone());
    let (filter, _reload_handle) = reload::Layer::new(EnvFilter::try_new(&initial_level)?);

    let registry = tracing_subscriber::registry().with(filter);
    if config.log.json {
        registry.with(tracing_subscriber::fmt::layer().json()).try_init()?;
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().compact().with_ansi(true))
            .try_init()?;
    }
    Ok(())
}
