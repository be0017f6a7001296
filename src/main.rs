use anyhow::{anyhow, Context};
use clap::Parser;
use hubsync::cli::{self, Cli, Commands, UploadArgs};
use hubsync::config::HubConfig;
use hubsync::logging::{init_logging, init_logging_simple};
use hubsync::transport::{HubTransport, ReqwestTransport};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = HubConfig::load_from(&cli.config)
        .with_context(|| format!("loading config from {}", cli.config.display()))?;
    config
        .validate()
        .map_err(|errors| anyhow!("invalid configuration:\n  {}", errors.join("\n  ")))?;

    let auth = cli::resolve_auth(cli.api_key.as_deref())?;
    let transport: Arc<dyn HubTransport> = Arc::new(ReqwestTransport::new()?);
    let model_id = cli.command.model_id().to_string();

    match cli.command {
        Commands::Check { .. } => {
            init_logging_simple();
            cli::run_check(config, &model_id, &auth, transport).await?;
        }
        Commands::Upload {
            weights,
            epoch,
            best,
            final_,
            map,
            ..
        } => {
            init_logging(&config.logging);
            let args = UploadArgs {
                weights,
                epoch,
                is_best: best,
                final_,
                map_score: map,
            };
            cli::run_upload(config, &model_id, &auth, transport, args)
                .await
                .context("checkpoint upload failed")?;
        }
        Commands::Heartbeat { .. } => {
            init_logging(&config.logging);
            cli::run_heartbeat(config, &model_id, &auth, transport).await?;
        }
    }

    Ok(())
}
