//! IoT Core Publisher - Main Entry Point
//!
//! Top-level error boundary: every failure ends up here, is logged with its
//! sanitized message and turns into exit status 1.

use clap::{Args, Parser, Subcommand};
use iotcore_publisher::auth::TokenMinter;
use iotcore_publisher::config::{ConfigError, ConfigOverrides, PublisherConfig};
use iotcore_publisher::error::{PublisherError, PublisherResult};
use iotcore_publisher::observability::init_default_logging;
use iotcore_publisher::publisher::FailurePolicy;
use iotcore_publisher::transport::mqtt::MqttSessionFactory;
use iotcore_publisher::workflow;
use std::path::{Path, PathBuf};
use std::process;
use tokio::{signal, sync::watch};
use tracing::{error, info, warn};

/// Publish device telemetry to Cloud IoT Core over MQTT
#[derive(Parser)]
#[command(name = "iotcore-publisher")]
#[command(about = "Publish device telemetry to Cloud IoT Core over MQTT")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "IOTCORE_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect, publish the configured messages and disconnect
    Run(RunArgs),
    /// Validate configuration
    Config {
        /// Show effective configuration as TOML
        #[arg(long)]
        show: bool,
    },
    /// Mint a device token and print its claims
    Token,
}

#[derive(Args)]
struct RunArgs {
    /// Root CA certificate (PEM or DER)
    #[arg(long, value_name = "FILE", env = "IOTCORE_ROOT_CA")]
    root_ca: Option<PathBuf>,

    /// RSA private key (PEM)
    #[arg(long, value_name = "FILE", env = "IOTCORE_PRIVATE_KEY")]
    private_key: Option<PathBuf>,

    /// Number of messages to publish
    #[arg(long, value_name = "N")]
    count: Option<u32>,

    /// Stop at the first failed publish
    #[arg(long)]
    fail_fast: bool,
}

impl From<RunArgs> for ConfigOverrides {
    fn from(args: RunArgs) -> Self {
        ConfigOverrides {
            root_ca_path: args.root_ca,
            private_key_path: args.private_key,
            message_count: args.count,
            failure_policy: args.fail_fast.then_some(FailurePolicy::Abort),
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging(cli.verbose);

    info!("Starting iotcore-publisher v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e.user_message());
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run(args) => run_publisher(config, args).await,
        Commands::Config { show } => handle_config_command(&config, show),
        Commands::Token => handle_token_command(&config),
    };

    if let Err(e) = result {
        error!("{}", e.user_message());
        process::exit(1);
    }
}

fn load_configuration(config_path: Option<&Path>) -> PublisherResult<PublisherConfig> {
    if let Some(path) = config_path {
        info!("Loading configuration from: {}", path.display());
        return Ok(PublisherConfig::load_from_file(path)?);
    }

    // Try default locations
    for path_str in ["iotcore.toml", "config/iotcore.toml"] {
        let path = Path::new(path_str);
        if path.exists() {
            info!("Loading configuration from: {}", path.display());
            return Ok(PublisherConfig::load_from_file(path)?);
        }
    }

    Err(ConfigError::InvalidConfig(
        "no configuration file found; pass -c/--config or create iotcore.toml".to_string(),
    )
    .into())
}

async fn run_publisher(mut config: PublisherConfig, args: RunArgs) -> PublisherResult<()> {
    config.apply_overrides(args.into())?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl-C, shutting down gracefully...");
            let _ = shutdown_tx.send(true);
        }
    });

    let minter = TokenMinter::new(config.device.project_id.clone());
    let report = workflow::run(&config, &minter, &MqttSessionFactory, shutdown_rx).await?;

    if report.publish.failed > 0 {
        warn!(
            failed = report.publish.failed,
            published = report.publish.published,
            "Some messages were not published"
        );
    }
    Ok(())
}

fn handle_config_command(config: &PublisherConfig, show: bool) -> PublisherResult<()> {
    info!("Configuration is valid");

    if show {
        let rendered = toml::to_string_pretty(config)
            .map_err(|e| PublisherError::Config(ConfigError::InvalidConfig(e.to_string())))?;
        println!("{rendered}");
    }
    Ok(())
}

fn handle_token_command(config: &PublisherConfig) -> PublisherResult<()> {
    let minter = TokenMinter::new(config.device.project_id.clone());
    let token = minter.mint_from_file(&config.credentials.private_key_path)?;

    let claims = serde_json::to_string_pretty(token.claims())
        .map_err(|e| PublisherError::signing(e.to_string()))?;
    println!("{claims}");
    if let Some(expires_at) = token.expires_at() {
        info!("Token expires at {}", expires_at.to_rfc3339());
    }
    println!("{}", token.as_str());
    Ok(())
}
