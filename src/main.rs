use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use uascout::App;
use uascout_core::config::LogFormat;
use uascout_core::{AppConfig, DiscoveryConfigModel, DiscoveryMode, DiscoveryRequestModel};
use uascout_discovery::{
    ChannelProgress, DiscoveryProgressType, LoggingProgress, ProgressFanOut,
    PROGRESS_CHANNEL_CAPACITY,
};

/// uascout - OPC UA server discovery and registry
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured log level
    #[arg(short, long, env = "UASCOUT_LOG_LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the standing discovery until interrupted
    Run,

    /// Run a single discovery request and print what was registered
    Discover {
        /// Discovery url to probe, may be repeated
        #[arg(short, long)]
        url: Vec<String>,

        /// Discovery mode: url, local, fast, network, scan
        #[arg(short, long, default_value = "url")]
        mode: DiscoveryMode,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<AppConfig> {
    let config = match path {
        Some(path) => AppConfig::from_config_builder(path)
            .with_context(|| format!("Failed to load config file: {:?}", path))?,
        None => AppConfig::default(),
    };
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn init_logging(config: &AppConfig, level: Option<&str>) {
    let level = level.unwrap_or(&config.logging.level);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("uascout={level},uascout_discovery={level},uascout_registry={level},uascout_net={level}")
            .into()
    });

    match config.logging.format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init(),
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(args.config.as_ref())?;
    init_logging(&config, args.log_level.as_deref());

    if let Some(path) = &args.config {
        info!("Configuration loaded from {:?}", path);
    }

    match args.command.unwrap_or(Command::Run) {
        Command::Run => run(config).await,
        Command::Discover { url, mode } => discover(config, url, mode).await,
    }
}

async fn run(config: AppConfig) -> Result<()> {
    info!("Starting uascout discovery service");
    let app = App::builder(config).start()?;
    app.configure_standing().await;

    shutdown_signal().await;

    app.shutdown().await;
    print_registrations(&app).await
}

async fn discover(config: AppConfig, urls: Vec<String>, mode: DiscoveryMode) -> Result<()> {
    if urls.is_empty() && !mode.is_scanning() {
        bail!("Nothing to discover: pass --url or a scanning --mode");
    }

    let (channel, events) = ChannelProgress::new(PROGRESS_CHANNEL_CAPACITY);
    let progress = ProgressFanOut::new()
        .with(Arc::new(LoggingProgress))
        .with(Arc::new(channel));
    let app = App::builder(config).progress(Arc::new(progress)).start()?;

    let request_id = format!("cli-{}", std::process::id());
    let configuration = DiscoveryConfigModel {
        discovery_urls: (!urls.is_empty()).then_some(urls),
        ..Default::default()
    };
    app.services()
        .discover(DiscoveryRequestModel::new(mode, configuration).with_id(request_id.clone()))
        .await?;

    let outcome = loop {
        let event = events
            .recv()
            .await
            .map_err(|_| anyhow!("Discovery progress stream closed"))?;
        if event.request_id.as_deref() == Some(request_id.as_str()) && event.event_type.is_terminal()
        {
            break event;
        }
    };

    app.shutdown().await;
    print_registrations(&app).await?;

    match outcome.event_type {
        DiscoveryProgressType::Error => {
            let reason = outcome.result.unwrap_or_default();
            error!(request_id, error = %reason, "Discovery failed");
            Err(anyhow!("Discovery failed: {}", reason))
        }
        DiscoveryProgressType::Cancelled => Err(anyhow!("Discovery cancelled")),
        _ => Ok(()),
    }
}

async fn print_registrations(app: &App) -> Result<()> {
    let registrations = app.registrations().await?;
    info!(applications = registrations.len(), "Registry content");
    let json = serde_json::to_string_pretty(&registrations)
        .context("Failed to serialize registrations")?;
    println!("{}", json);
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl-C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }
}
