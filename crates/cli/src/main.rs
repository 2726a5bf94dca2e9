//! The `ariadne` daemon.
//!
//! Supervises the agent runtime: load configuration, construct the component
//! graph (sessions → provider → engine → handler → gateway → channels), then
//! wait for either an interrupt or a configuration change. On change, stop
//! all channels, drain briefly, and rebuild everything with the fresh
//! configuration; on construction errors, back off and retry.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::mpsc;
use tracing::{error, info};

use ariadne_agent::{AgentEngine, ChatHandler};
use ariadne_channels::ChannelSource;
use ariadne_config::watcher::watch_config;
use ariadne_core::Error;
use ariadne_gateway::{GatewayBuilder, LogMonitor};
use ariadne_providers::from_config;
use ariadne_sessions::SessionManager;
use ariadne_tools::OsControlTool;

const BUILD_RETRY_WAIT: Duration = Duration::from_secs(5);
const DRAIN_WAIT: Duration = Duration::from_secs(1);

#[derive(Parser)]
#[command(
    name = "ariadne",
    about = "Ariadne — multi-channel conversational agent runtime",
    version
)]
struct Cli {
    /// Business configuration file
    #[arg(long, default_value = "config.json")]
    config: PathBuf,

    /// System configuration file
    #[arg(long, default_value = "system.json")]
    system: PathBuf,

    /// Session storage directory
    #[arg(long, default_value = "data/sessions")]
    data_dir: PathBuf,

    /// Enable verbose logging regardless of configuration
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initial load just to pick the log level before the supervisor loop.
    let initial_level = match ariadne_config::load_from(&cli.config, &cli.system) {
        Ok((_, sys)) => sys.log_level,
        Err(_) => "info".to_string(),
    };
    init_tracing(if cli.verbose { "debug" } else { &initial_level });

    let mut reload = watch_config(vec![cli.config.clone(), cli.system.clone()]);

    loop {
        match run_once(&cli, &mut reload).await {
            Ok(Exit::Interrupted) => {
                info!("Bye!");
                return;
            }
            Ok(Exit::Reload) => {
                info!("==== Configuration Reloaded ====");
            }
            Err(e) => {
                error!(error = %e, "System failed to start");
                info!("Waiting {}s before retrying...", BUILD_RETRY_WAIT.as_secs());
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => return,
                    _ = reload.recv() => {
                        info!("Configuration change detected while waiting, retrying immediately");
                    }
                    _ = tokio::time::sleep(BUILD_RETRY_WAIT) => {}
                }
            }
        }
    }
}

enum Exit {
    Interrupted,
    Reload,
}

/// One lifecycle of the runtime: build, run, tear down.
async fn run_once(cli: &Cli, reload: &mut mpsc::Receiver<()>) -> Result<Exit, Error> {
    let (app_cfg, sys_cfg) = ariadne_config::load_from(&cli.config, &cli.system)?;

    let sessions = Arc::new(SessionManager::new(Some(cli.data_dir.clone())));

    let client = from_config(&app_cfg.llm, &sys_cfg)?;

    let channels =
        ChannelSource::new().load(&app_cfg.channels, &sessions, &sys_cfg);

    let engine = Arc::new(AgentEngine::new(
        client,
        app_cfg,
        sys_cfg.clone(),
        Arc::clone(&sessions),
    ));
    engine.register_tool(Arc::new(OsControlTool::new(Vec::new())));

    let handler = Arc::new(ChatHandler::new(Arc::clone(&engine), Arc::clone(&sessions)));

    let gateway = GatewayBuilder::new()
        .with_system_config(sys_cfg)
        .with_monitor(Arc::new(LogMonitor::new()))
        .with_channels(channels)
        .with_handler(handler)
        .with_responder_aware(engine)
        .build()
        .await?;

    info!(channels = ?gateway.channel_ids(), "Ariadne is running");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal, stopping services...");
            gateway.stop_all().await;
            Ok(Exit::Interrupted)
        }
        _ = reload.recv() => {
            info!("Configuration changes detected, stopping services...");
            gateway.stop_all().await;
            info!("Draining connections before restart...");
            tokio::time::sleep(DRAIN_WAIT).await;
            Ok(Exit::Reload)
        }
    }
}

fn init_tracing(level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_target(false)
        .init();
}
