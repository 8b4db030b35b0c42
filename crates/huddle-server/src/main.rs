//! # Huddle Server
//!
//! Realtime room-based chat relay.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! huddle
//!
//! # Run with custom config
//! huddle --config /path/to/huddle.toml
//!
//! # Run with environment variables
//! HUDDLE_PORT=8080 HUDDLE_HOST=0.0.0.0 huddle
//! ```

mod bootstrap;
mod config;
mod handlers;
mod metrics;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "huddle", version, about = "Realtime room-based chat relay")]
struct Args {
    /// Configuration file (TOML). Defaults to the first of the standard locations.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "huddle=debug,huddle_core=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load(args.config.as_deref())?;

    tracing::info!("Starting Huddle server on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_args_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_config_flag() {
        let args = Args::try_parse_from(["huddle"]).unwrap();
        assert_eq!(args.config, None);

        let args = Args::try_parse_from(["huddle", "--config", "/tmp/huddle.toml"]).unwrap();
        assert_eq!(args.config, Some(PathBuf::from("/tmp/huddle.toml")));

        let args = Args::try_parse_from(["huddle", "--config=local.toml"]).unwrap();
        assert_eq!(args.config, Some(PathBuf::from("local.toml")));

        assert!(Args::try_parse_from(["huddle", "--config"]).is_err());
        assert!(Args::try_parse_from(["huddle", "--bogus"]).is_err());
    }
}
