//! Courier CLI - messaging session gateway.
//!
//! A command-line interface for running and configuring the gateway.

#![allow(clippy::print_stdout)] // CLI program intentionally uses stdout

use clap::{Args, Parser, Subcommand};
use courier_gateway::config::{GatewayConfig, config_path, init_config, load_config_from};
use courier_gateway::error::{ErrorContext, GatewayError, Result};
use courier_gateway::gateway::Gateway;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Courier - multi-tenant messaging session gateway
#[derive(Parser)]
#[command(name = "courier")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Configuration file path
    #[arg(short, long, env = "COURIER_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration
    Init(InitArgs),

    /// Start the HTTP gateway
    Serve(ServeArgs),

    /// Manage configuration
    Config(ConfigArgs),
}

/// Arguments for the init command
#[derive(Args)]
struct InitArgs {
    /// Force overwrite existing configuration
    #[arg(short, long)]
    force: bool,
}

/// Arguments for the serve command
#[derive(Args)]
struct ServeArgs {
    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Do not restart sessions with stored credentials
    #[arg(long)]
    no_recover: bool,
}

/// Arguments for the config command
#[derive(Args)]
struct ConfigArgs {
    #[command(subcommand)]
    command: ConfigCommands,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show effective configuration
    Show,
    /// Show configuration file path
    Path,
    /// Validate configuration
    Validate,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("failed to create tokio runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match rt.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

/// Initialize logging with the given verbosity level.
fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "courier={level},courier_gateway={level},{}",
            if verbosity >= 2 { "debug" } else { "warn" }
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbosity >= 2)
        .init();
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<()> {
    let config_file = cli.config.unwrap_or_else(config_path);
    match cli.command {
        Commands::Init(args) => cmd_init(args, &config_file).await,
        Commands::Serve(args) => cmd_serve(args, &config_file).await,
        Commands::Config(args) => cmd_config(args, &config_file).await,
    }
}

/// Load the file configuration with environment overrides applied.
async fn effective_config(path: &std::path::Path) -> Result<GatewayConfig> {
    let mut config = load_config_from(path)
        .await
        .with_context(|| format!("failed to load {}", path.display()))?;
    config.apply_env()?;
    Ok(config)
}

/// Initialize configuration.
async fn cmd_init(args: InitArgs, config_file: &std::path::Path) -> Result<()> {
    if config_file.exists() && !args.force {
        println!("Configuration already exists at: {}", config_file.display());
        println!("Use --force to overwrite.");
        return Ok(());
    }

    let config = init_config(config_file)
        .await
        .context("failed to initialize config")?;

    println!("Configuration created: {}", config_file.display());
    println!("Sessions directory:    {}", config.sessions.path.display());
    println!();
    println!("Next steps:");
    println!("  1. Set server.apiKey (or COURIER_API_KEY)");
    println!("  2. Choose a driver under \"driver\"");
    println!("  3. courier serve");

    Ok(())
}

/// Start the gateway.
async fn cmd_serve(args: ServeArgs, config_file: &std::path::Path) -> Result<()> {
    let mut config = effective_config(config_file).await?;
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if args.no_recover {
        config.sessions.recover = false;
    }

    let issues = config.validate();
    for issue in &issues {
        tracing::warn!("{issue}");
    }
    if issues.iter().any(|issue| issue.is_error()) {
        return Err(GatewayError::config("configuration has errors"));
    }

    let gateway = Gateway::new(config);
    println!(
        "Gateway listening on {}. Press Ctrl+C to stop.\n",
        gateway.config().bind_addr()
    );

    gateway
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
            }
            println!("\nShutting down...");
        })
        .await
}

/// Configuration management.
async fn cmd_config(args: ConfigArgs, config_file: &std::path::Path) -> Result<()> {
    match args.command {
        ConfigCommands::Path => {
            println!("{}", config_file.display());
        }
        ConfigCommands::Show => {
            let mut config = effective_config(config_file).await?;
            if config.server.api_key.is_some() {
                config.server.api_key = Some("********".to_string());
            }
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        ConfigCommands::Validate => {
            let config = match effective_config(config_file).await {
                Ok(config) => config,
                Err(e) => {
                    println!("error: {e}");
                    return Ok(());
                }
            };
            let issues = config.validate();
            if issues.is_empty() {
                println!("Configuration is valid");
            }
            for issue in issues {
                println!("{issue}");
            }
        }
    }

    Ok(())
}
