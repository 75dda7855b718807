mod cli;
mod commands;
mod settings;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands, ConfigCommands};
use commands::{
    handle_config_generate, handle_config_show, handle_config_validate, load_config, run_command,
    EXIT_FATAL,
};
use failprobe_config::{FailprobeConfig, LogLevel};
use failprobe_logging::init_logging_from_config;
use std::process::ExitCode;
use tracing::{error, info};

/// Initialize logging from config, with the command line level taking precedence
fn init_logging(config: &FailprobeConfig, log_level: Option<&String>) -> Result<()> {
    let mut logging = config.logging.clone();
    if let Some(level) = log_level {
        logging.level = level
            .parse::<LogLevel>()
            .map_err(|e| anyhow::anyhow!(e))
            .context("Invalid --log-level")?;
    }
    init_logging_from_config(&logging)
}

async fn dispatch(cli: Cli) -> Result<ExitCode> {
    // Load configuration first
    let mut config = load_config(cli.config.as_ref())?;
    init_logging(&config, cli.log_level.as_ref())?;
    info!("failprobe starting");

    match cli.command {
        Commands::Run(args) => {
            settings::apply_run_args(&mut config, &args)?;
            run_command(&config, args.report.as_deref()).await
        }
        Commands::Config { config_cmd } => {
            match config_cmd {
                ConfigCommands::Validate { config_file } => handle_config_validate(&config_file)?,
                ConfigCommands::Generate { output, force } => {
                    handle_config_generate(&output, force)?
                }
                ConfigCommands::Show { format } => handle_config_show(&config, &format)?,
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match dispatch(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::from(EXIT_FATAL)
        }
    }
}
