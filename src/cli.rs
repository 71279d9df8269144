//! CLI command definitions using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// converge - polling reconciliation engine
#[derive(Parser, Debug)]
#[command(name = "converge")]
#[command(version)]
#[command(about = "Wait for remote resources to settle into a target state")]
#[command(
    long_about = "converge drives resources on eventually-consistent control planes from \"request submitted\" to a terminal state. The simulate command replays a scripted status sequence through the engine."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Replay a scripted status sequence through the engine
    Simulate(SimulateArgs),

    /// Validate a configuration file and list its profiles
    CheckConfig {
        /// Configuration file (TOML, or JSON by extension)
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[derive(Args, Debug, Clone)]
pub struct SimulateArgs {
    /// Resource name used in logs and output
    #[arg(long, default_value = "simulated-1")]
    pub resource: String,

    /// Status returned by each successive read. `absent` reads as not
    /// found, `unreachable` as a transport failure.
    #[arg(long, value_delimiter = ',', required = true)]
    pub states: Vec<String>,

    /// Pending states (ignored with --profile)
    #[arg(long, value_delimiter = ',', default_value = "provisioning")]
    pub pending: Vec<String>,

    /// Target states (ignored with --profile)
    #[arg(long, value_delimiter = ',', default_value = "available")]
    pub target: Vec<String>,

    /// Permanent failure states (ignored with --profile)
    #[arg(long, value_delimiter = ',', default_value = "failed")]
    pub failed: Vec<String>,

    /// Overall deadline
    #[arg(long, default_value_t = 30)]
    pub timeout_secs: u64,

    /// Fixed wait between reads; 0 selects the backoff cadence
    #[arg(long, default_value_t = 500)]
    pub interval_ms: u64,

    /// Wait before the first read
    #[arg(long, default_value_t = 0)]
    pub initial_delay_ms: u64,

    /// Take states and timing from this configuration profile
    #[arg(long, requires = "config")]
    pub profile: Option<String>,

    /// Configuration file holding the profile
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Freeze the script at this read until a corrective restart
    #[arg(long)]
    pub stall_after: Option<usize>,

    /// Grace period before each corrective restart
    #[arg(long, default_value_t = 2)]
    pub grace_secs: u64,

    /// Number of restarts rejected with a concurrent-modification conflict
    /// before one is accepted
    #[arg(long, default_value_t = 0)]
    pub restart_conflicts: u32,

    /// Reject every restart outright
    #[arg(long, default_value_t = false)]
    pub reject_restart: bool,
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_parse_simulate() {
        let cli = Cli::try_parse_from([
            "converge",
            "simulate",
            "--states",
            "provisioning,provisioning,available",
            "--target",
            "available,ready",
            "--stall-after",
            "1",
        ])
        .unwrap();

        let Commands::Simulate(args) = cli.command else {
            unreachable!("parsed a different command");
        };
        assert_eq!(args.states.len(), 3);
        assert_eq!(args.target, ["available", "ready"]);
        assert_eq!(args.pending, ["provisioning"]);
        assert_eq!(args.stall_after, Some(1));
        assert_eq!(args.timeout_secs, 30);
    }

    #[test]
    fn test_profile_requires_config() {
        let result = Cli::try_parse_from([
            "converge",
            "simulate",
            "--states",
            "available",
            "--profile",
            "rds",
        ]);
        assert!(result.is_err());
    }
}
