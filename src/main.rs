//! cuego-ddp CLI - watch and control CueGO workspaces.
//!
//! This is the main binary entry point. See the `cuego_ddp` library for the
//! core functionality.

// Rust guideline compliant 2026-02

use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cuego_ddp::{ConnectionStatus, CueGo, Config, WorkspaceStatus};
use mimalloc::MiMalloc;
use tokio::sync::mpsc;

/// Global allocator configured per M-MIMALLOC-APPS guideline.
/// mimalloc provides better multi-threaded performance than the system allocator.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// How long one-shot commands wait for the workspace list.
const INIT_TIMEOUT: Duration = Duration::from_secs(15);

/// How long one-shot commands wait for a method result.
const RESULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "cuego-ddp")]
#[command(version)]
#[command(about = "Mirror and control CueGO workspaces over DDP")]
struct Cli {
    /// WebSocket address (overrides config and CUEGO_URL)
    #[arg(long, global = true)]
    url: Option<String>,
    /// API key (overrides CUEGO_API_KEY)
    #[arg(long, global = true)]
    api_key: Option<String>,
    /// Do not reconnect after the connection drops
    #[arg(long, global = true)]
    no_reconnect: bool,
    /// Log every protocol frame at debug level
    #[arg(long, global = true)]
    debug_messages: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stay connected and log status and workspace changes until Ctrl-C
    Run,
    /// Print the user's workspaces
    Workspaces,
    /// Change a workspace status
    SetStatus {
        /// Workspace id
        #[arg(long)]
        workspace: String,
        /// clear, connecting or live
        #[arg(long)]
        status: WorkspaceStatus,
    },
    /// Trigger the next cue of a workspace
    Next {
        /// Workspace id
        #[arg(long)]
        workspace: String,
    },
    /// Print the effective configuration
    Config,
}

impl Cli {
    fn effective_config(&self) -> Result<Config> {
        let mut config = Config::load()?;
        if let Some(url) = &self.url {
            config.url.clone_from(url);
        }
        if let Some(api_key) = &self.api_key {
            config.api_key.clone_from(api_key);
        }
        if self.no_reconnect {
            config.reconnect = false;
        }
        if self.debug_messages {
            config.debug_messages = true;
        }
        Ok(config)
    }
}

/// Connects and logs every status and workspace change until Ctrl-C.
async fn run(config: &Config) -> Result<()> {
    let cuego = CueGo::new(config);
    let client = cuego.client();

    client.on_status_change(|status| log::info!("Status: {}", status));
    client.on_ready_transition(|| log::info!("Workspaces loaded"));

    let (change_tx, mut change_rx) = mpsc::unbounded_channel();
    client.on_collection_change(move |collection, id| {
        let _ = change_tx.send((collection.to_string(), id.to_string()));
    });

    cuego.start(config)?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                log::info!("Shutting down...");
                break;
            }
            Some((collection, id)) = change_rx.recv() => {
                match cuego.workspace(&id) {
                    Some(workspace) => log::info!(
                        "{} {} changed: {}",
                        collection,
                        id,
                        workspace.to_value()
                    ),
                    None => log::info!("{} {} removed", collection, id),
                }
            }
        }
    }

    cuego.stop()?;
    Ok(())
}

/// Starts a connection and waits until the workspace list is loaded.
async fn connect_and_wait(config: &Config) -> Result<CueGo> {
    let cuego = CueGo::new(config);
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();

    let ready_tx = event_tx.clone();
    cuego.client().on_ready_transition(move || {
        let _ = ready_tx.send(None);
    });
    cuego.client().on_status_change(move |status| {
        if let ConnectionStatus::BadConfig(reason) = status {
            let _ = event_tx.send(Some(reason.clone()));
        }
    });

    cuego.start(config)?;

    let event = tokio::time::timeout(INIT_TIMEOUT, event_rx.recv())
        .await
        .context("Timed out waiting for workspaces")?
        .context("Connection task stopped")?;
    if let Some(reason) = event {
        anyhow::bail!("Bad configuration: {reason}");
    }
    Ok(cuego)
}

/// Calls a workspace method and waits for the server's answer.
async fn call_and_wait(
    cuego: &CueGo,
    call: impl FnOnce(&CueGo) -> Result<u64, cuego_ddp::DdpError>,
) -> Result<()> {
    let (result_tx, mut result_rx) = mpsc::unbounded_channel();
    cuego.client().on_method_result(move |outcome| {
        let _ = result_tx.send(outcome.clone());
    });

    let id = call(cuego)?.to_string();
    let outcome = tokio::time::timeout(RESULT_TIMEOUT, async {
        while let Some(outcome) = result_rx.recv().await {
            if outcome.id == id {
                return Some(outcome);
            }
        }
        None
    })
    .await
    .context("Timed out waiting for the server")?
    .context("Connection task stopped")?;

    match outcome.outcome {
        Ok(_) => Ok(()),
        Err(error) => anyhow::bail!("Server error: {}", error.describe()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let cli = Cli::parse();
    let config = cli.effective_config()?;

    match cli.command {
        Commands::Run => run(&config).await?,
        Commands::Workspaces => {
            let cuego = connect_and_wait(&config).await?;
            for workspace in cuego.workspaces() {
                println!(
                    "{}\t{}\t{}",
                    workspace.id(),
                    cuego_ddp::cuego::workspace_name(&workspace),
                    workspace.get_str("status").unwrap_or("-")
                );
            }
            cuego.stop()?;
        }
        Commands::SetStatus { workspace, status } => {
            let cuego = connect_and_wait(&config).await?;
            call_and_wait(&cuego, |c| c.set_workspace_status(&workspace, status)).await?;
            println!("Workspace {} set to {}", workspace, status);
            cuego.stop()?;
        }
        Commands::Next { workspace } => {
            let cuego = connect_and_wait(&config).await?;
            call_and_wait(&cuego, |c| c.trigger_next_cue(&workspace)).await?;
            println!("Triggered next cue in workspace {}", workspace);
            cuego.stop()?;
        }
        Commands::Config => {
            println!("Config dir:       {}", Config::config_dir()?.display());
            println!("URL:              {}", config.url);
            println!("API key:          {}", config.redacted_api_key());
            println!("Reconnect:        {}", config.reconnect);
            println!("Reconnect delay:  {}s", config.reconnect_delay_secs);
            println!("Debug messages:   {}", config.debug_messages);
        }
    }

    Ok(())
}
