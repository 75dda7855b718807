//! CLI argument parsing definitions

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Set the log level (trace, debug, info, warn, error)
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Ramp load against the target until the cluster changes state
    Run(RunArgs),

    /// Configuration management commands
    Config {
        #[command(subcommand)]
        config_cmd: ConfigCommands,
    },
}

/// Flags of `failprobe run`; each one overrides the file and environment
#[derive(Args, Debug, Default, Clone)]
pub struct RunArgs {
    /// URL that receives the load
    #[arg(long, value_name = "URL")]
    pub url: Option<String>,

    /// Seconds each attempt waits for a state change
    #[arg(long, value_name = "SECS")]
    pub duration: Option<u64>,

    /// Maximum number of concurrent requests
    #[arg(long, value_name = "N")]
    pub concurrency: Option<u32>,

    /// Concurrency added per burst; below --concurrency it ramps linearly
    #[arg(long, value_name = "N")]
    pub increment: Option<u32>,

    /// State change to wait for: version-bump, readability-loss, primary-change
    #[arg(long, value_name = "POLICY")]
    pub policy: Option<String>,

    /// Maximum number of attempts
    #[arg(long, value_name = "N")]
    pub attempts: Option<u32>,

    /// Seconds to wait between attempts
    #[arg(long, value_name = "SECS")]
    pub backoff: Option<u64>,

    /// Seconds of extra load after a match
    #[arg(long, value_name = "SECS")]
    pub grace: Option<u64>,

    /// Write the run report to this file instead of stdout
    #[arg(long, value_name = "PATH")]
    pub report: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Validate a configuration file
    Validate {
        /// Path to the configuration file
        #[arg(long, value_name = "PATH")]
        config_file: PathBuf,
    },

    /// Generate a sample configuration file
    Generate {
        /// Output file path
        #[arg(long, value_name = "PATH")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },

    /// Show current configuration in use
    Show {
        /// Output format: yaml, json
        #[arg(long, value_name = "FORMAT", default_value = "yaml")]
        format: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_flags() {
        let cli = Cli::try_parse_from([
            "failprobe",
            "--log-level",
            "debug",
            "run",
            "--url",
            "https://fn.example.com/",
            "--duration",
            "120",
            "--concurrency",
            "500",
            "--increment",
            "50",
            "--policy",
            "readability-loss",
            "--attempts",
            "3",
        ])
        .unwrap();

        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.url.as_deref(), Some("https://fn.example.com/"));
                assert_eq!(args.duration, Some(120));
                assert_eq!(args.concurrency, Some(500));
                assert_eq!(args.increment, Some(50));
                assert_eq!(args.policy.as_deref(), Some("readability-loss"));
                assert_eq!(args.attempts, Some(3));
                assert!(args.backoff.is_none());
                assert!(args.report.is_none());
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_global_config_after_subcommand() {
        let cli =
            Cli::try_parse_from(["failprobe", "config", "show", "--config", "probe.yaml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("probe.yaml")));
        match cli.command {
            Commands::Config {
                config_cmd: ConfigCommands::Show { format },
            } => assert_eq!(format, "yaml"),
            _ => panic!("expected config show"),
        }
    }

    #[test]
    fn test_rejects_non_numeric_concurrency() {
        assert!(Cli::try_parse_from(["failprobe", "run", "--concurrency", "lots"]).is_err());
        assert!(Cli::try_parse_from(["failprobe"]).is_err());
    }
}
