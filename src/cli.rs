use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

use crate::auth::HubAuth;
use crate::config::HubConfig;
use crate::error::Result;
use crate::session::{CheckpointOutcome, TrainingSession};
use crate::transport::HubTransport;

#[derive(Parser, Debug)]
#[command(name = "hubsync")]
#[command(version)]
#[command(about = "Keep a training run in sync with the model hub", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config directory (default.toml, {HUBSYNC_ENV}.toml)
    #[arg(short, long, default_value = "config")]
    pub config: PathBuf,

    /// Hub API key
    #[arg(long, env = "HUBSYNC_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fetch the model record and check local disk space for its dataset
    Check {
        /// Model id on the hub
        #[arg(short, long)]
        model: String,
    },
    /// Upload one checkpoint
    Upload {
        #[arg(short, long)]
        model: String,
        /// Weights file to upload
        #[arg(short, long)]
        weights: PathBuf,
        #[arg(short, long, default_value = "0")]
        epoch: u32,
        /// Mark the checkpoint as the best so far
        #[arg(long)]
        best: bool,
        /// Upload as the final model (no rate limit, longer retry budget)
        #[arg(long = "final")]
        final_: bool,
        /// mAP score sent with a final upload
        #[arg(long, default_value = "0.0")]
        map: f64,
    },
    /// Send heartbeats for a model until interrupted
    Heartbeat {
        #[arg(short, long)]
        model: String,
    },
}

impl Commands {
    pub fn model_id(&self) -> &str {
        match self {
            Commands::Check { model }
            | Commands::Upload { model, .. }
            | Commands::Heartbeat { model } => model,
        }
    }
}

/// Credentials from `--api-key`, else from the environment.
pub fn resolve_auth(api_key: Option<&str>) -> Result<HubAuth> {
    match api_key {
        Some(key) => HubAuth::api_key(key),
        None => HubAuth::from_env(),
    }
}

pub async fn run_check(
    config: HubConfig,
    model_id: &str,
    auth: &HubAuth,
    transport: Arc<dyn HubTransport>,
) -> Result<()> {
    let session = TrainingSession::connect(config, model_id, auth, transport).await?;
    let dataset = &session.model().dataset;

    println!("Model:    {}", session.model_id());
    println!("Page:     {}", session.model_url());
    println!(
        "Dataset:  {}",
        dataset.name.as_deref().unwrap_or("(unnamed)")
    );
    if let Some(size) = dataset.size {
        println!("Size:     {:.3} GB", size as f64 / (1u64 << 30) as f64);
    }

    session.check_disk_space().await?;
    println!("Disk:     OK");
    session.shutdown();
    Ok(())
}

pub async fn run_upload(
    config: HubConfig,
    model_id: &str,
    auth: &HubAuth,
    transport: Arc<dyn HubTransport>,
    upload: UploadArgs,
) -> Result<()> {
    let session = TrainingSession::connect(config, model_id, auth, transport).await?;
    let outcome = session
        .upload_checkpoint(
            upload.epoch,
            &upload.weights,
            upload.is_best,
            upload.final_,
            upload.map_score,
        )
        .await;
    session.shutdown();

    match outcome? {
        CheckpointOutcome::Uploaded { bytes } => {
            println!("Uploaded {} ({} bytes)", upload.weights.display(), bytes);
            Ok(())
        }
        CheckpointOutcome::RateLimited => {
            println!("Skipped: checkpoint rate limit");
            Ok(())
        }
        CheckpointOutcome::Failed(reason) => {
            Err(crate::error::HubError::Internal(format!("upload failed: {reason}")))
        }
    }
}

/// Arguments of a one-off checkpoint upload
#[derive(Debug, Clone)]
pub struct UploadArgs {
    pub weights: PathBuf,
    pub epoch: u32,
    pub is_best: bool,
    pub final_: bool,
    pub map_score: f64,
}

pub async fn run_heartbeat(
    config: HubConfig,
    model_id: &str,
    auth: &HubAuth,
    transport: Arc<dyn HubTransport>,
) -> Result<()> {
    let session = TrainingSession::connect(config, model_id, auth, transport).await?;
    info!(model_id = %session.model_id(), "Sending heartbeats, press Ctrl+C to stop");

    shutdown_signal().await;
    info!("Received shutdown signal");

    let status = session.heartbeat_status();
    session.shutdown();
    println!(
        "Sent {} heartbeats (agent id: {})",
        status.beats,
        status.agent_id.as_deref().unwrap_or("none")
    );
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_final_upload() {
        let cli = Cli::try_parse_from([
            "hubsync",
            "--api-key",
            "k",
            "upload",
            "--model",
            "m1",
            "--weights",
            "best.pt",
            "--epoch",
            "99",
            "--final",
            "--map",
            "0.55",
        ])
        .unwrap();

        assert_eq!(cli.api_key.as_deref(), Some("k"));
        assert_eq!(cli.command.model_id(), "m1");
        match cli.command {
            Commands::Upload {
                epoch,
                final_,
                map,
                best,
                ..
            } => {
                assert_eq!(epoch, 99);
                assert!(final_);
                assert!(!best);
                assert_eq!(map, 0.55);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_explicit_key_wins() {
        match resolve_auth(Some(" abc ")).unwrap() {
            HubAuth::ApiKey(key) => assert_eq!(key, "abc"),
            other => panic!("unexpected auth: {other:?}"),
        }
        assert!(resolve_auth(Some("")).is_err());
    }
}
