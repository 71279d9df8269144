//! # converge
//!
//! Command-line entry point.
//!
//! - `converge simulate` replays a scripted status sequence through the
//!   reconciliation engine and prints the outcome as JSON. Exits 1 when the
//!   reconciliation did not converge.
//! - `converge check-config` validates a configuration file.
//!
//! Logging goes to stderr through `tracing`; set `RUST_LOG` to adjust.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]
#![deny(clippy::expect_used)]

use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use itertools::Itertools;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use converge::cli::{Cli, Commands};
use converge::simulate;
use converge_core::EngineConfig;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Commands::Simulate(args) => {
            let report = simulate::execute(&args).await?;
            let json = serde_json::to_string_pretty(&report)
                .context("Failed to serialize simulation report")?;
            println!("{json}");
            if report.success {
                Ok(ExitCode::SUCCESS)
            } else {
                error!(
                    resource = %report.resource,
                    error = report.error.as_deref().unwrap_or("unknown"),
                    "Reconciliation did not converge"
                );
                Ok(ExitCode::FAILURE)
            }
        }
        Commands::CheckConfig { config } => {
            check_config(&config)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Initialize tracing subscriber.
fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn check_config(path: &Path) -> Result<()> {
    let config = EngineConfig::from_file(path)
        .with_context(|| format!("Failed to load config from {}", path.display()))?
        .with_env_overrides();
    config.validate().context("Configuration is invalid")?;

    info!(
        path = %path.display(),
        profiles = config.profiles.len(),
        "Configuration is valid"
    );
    println!("{}", config.profiles.keys().join("\n"));
    Ok(())
}
