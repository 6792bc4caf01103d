mod cli;
mod commands;
mod config;
mod error;
mod output;

use crate::{
    cli::{Args, Commands, OutputFormat},
    commands::CommandExecutor,
    config::AppConfig,
    error::AppError,
    output::OutputManager,
};
use anyhow::Context;
use clap::Parser;
#[cfg(feature = "colored-output")]
use colored::*;
use stars_link::{CredentialStore, FileCredentialPersistence, StarsClient};
use std::{io::IsTerminal, process, sync::Arc};
use tracing::{Level, debug, error};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let output_override = args.output;

    if let Err(e) = run(args).await {
        let app_error = e.downcast_ref::<AppError>();
        match output_override {
            Some(OutputFormat::Json) => {
                let body = app_error.map(AppError::to_json).unwrap_or_else(|| {
                    serde_json::json!({
                        "status": "error",
                        "message": format!("{e:#}"),
                    })
                });
                println!("{body}");
            }
            _ => {
                error!("Application error: {:#}", e);
                #[cfg(feature = "colored-output")]
                {
                    eprintln!("{} {:#}", "Error:".red().bold(), e);
                }
                #[cfg(not(feature = "colored-output"))]
                {
                    eprintln!("Error: {:#}", e);
                }
                if let Some(AppError::Link(link)) = app_error
                    && link.requires_relogin()
                {
                    eprintln!("Run `stars login` to store a new credential");
                }
            }
        }
        process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    init_logging(args.verbose, args.quiet)?;

    let config_path = args.config.as_deref();

    // Configuration commands do not need a client
    match &args.command {
        Commands::Config { show, reset } => {
            if *reset {
                AppConfig::reset(config_path)?;
                println!("✓ Configuration reset to defaults");
            } else if *show {
                let config = AppConfig::load(config_path)?;
                println!("{}", config.show()?);
            } else {
                println!(
                    "Use --show to display current configuration or --reset to reset to defaults"
                );
            }
            return Ok(());
        }
        Commands::Completions { shell } => {
            use clap::CommandFactory;
            use clap_complete::generate;

            let mut cmd = Args::command();
            let bin_name = cmd.get_name().to_string();
            generate(*shell, &mut cmd, bin_name, &mut std::io::stdout());
            return Ok(());
        }
        _ => {}
    }

    let mut config = AppConfig::load(config_path).context("Failed to load configuration")?;
    if let Some(host) = args.host {
        config.link.host = host;
    }
    debug!(?config, "Effective configuration");

    let credentials_path = config.credentials_path(config_path)?;
    let persistence = Arc::new(FileCredentialPersistence::new(credentials_path));
    let store = CredentialStore::open(persistence)
        .await
        .map_err(AppError::from)
        .context("Failed to open the credential store")?;
    let client = StarsClient::new(config.link.clone(), store).map_err(AppError::from)?;

    let format = args.output.unwrap_or(config.output);
    let colored = std::io::stdout().is_terminal();
    let executor = CommandExecutor::new(client, OutputManager::new(format, colored));

    match args.command {
        Commands::Watch { topic, events } => executor.watch(&topic, &events).await?,
        Commands::Request { method, path, body } => {
            executor.request(&method, &path, body.as_deref()).await?
        }
        Commands::Places { target } => executor.places(target).await?,
        Commands::Place { kind, id } => executor.place(kind, &id).await?,
        Commands::AreaPlaces { area_id } => executor.area_places(&area_id).await?,
        Commands::Search { query, address } => executor.search(&query, address).await?,
        Commands::Login {
            access_token,
            refresh_token,
        } => executor.login(&access_token, &refresh_token).await?,
        Commands::Logout => executor.logout().await?,
        Commands::Whoami => executor.whoami()?,
        Commands::Config { .. } | Commands::Completions { .. } => {}
    }

    Ok(())
}

fn init_logging(verbose: bool, quiet: bool) -> Result<(), AppError> {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(verbose)
                .with_level(true),
        )
        .try_init()
        .map_err(|e| AppError::Config(format!("failed to initialize logging: {e}")))?;
    Ok(())
}
