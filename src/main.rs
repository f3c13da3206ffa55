//! MC Gateway Service (mcsrv)
//!
//! Thin service entry point: load configuration, connect to the controller,
//! start data set polling, and run until interrupted. Program deployment is
//! exposed as a one-shot command for operational use.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use mcsrv::{
    Communication, McClient, McSrvConfig, MemoryCacheStore, ProcessRuntime, TagPoller,
};

#[derive(Debug, Parser)]
#[command(name = "mcsrv", version, about = "MC-protocol gateway service")]
struct Args {
    /// Path to the service configuration file
    #[arg(short, long, default_value = "config/mcsrv.yaml", env = "MCSRV_CONFIG")]
    config: PathBuf,

    /// Validate the configuration and exit
    #[arg(long)]
    validate: bool,

    /// Pack and write one configured program to the controller, then exit
    #[arg(long, value_name = "PROGRAM_ID")]
    deploy_program: Option<i64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = McSrvConfig::load(&args.config)
        .with_context(|| format!("Failed to load configuration from {}", args.config.display()))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .init();

    config.validate().context("Invalid configuration")?;
    if args.validate {
        info!("Configuration is valid");
        return Ok(());
    }

    let client = McClient::new(config.plc.client_config());
    let communication: Arc<dyn Communication> = Arc::new(client.clone());

    if let Some(program_id) = args.deploy_program {
        let program = config
            .programs
            .iter()
            .find(|p| p.id == program_id)
            .with_context(|| format!("Program {} not found in configuration", program_id))?;
        client.connect().await?;
        let runtime = ProcessRuntime::new(communication.clone(), config.functions.clone());
        let result = runtime
            .deploy_program(program, config.process.deploy_options())
            .await?;
        info!(
            "Program {} deployed: {} words at D{}",
            program_id,
            result.words.len(),
            result.base_address
        );
        client.disconnect().await?;
        return Ok(());
    }

    let store = Arc::new(MemoryCacheStore::new());
    let poller = TagPoller::new(communication.clone(), store);
    poller
        .set_configuration(config.data_sets.clone(), config.tags.clone())
        .await?;

    if let Err(e) = client.connect().await {
        error!("Initial PLC connection failed: {} (will retry on demand)", e);
    }
    poller.start_polling().await?;
    info!(
        "mcsrv running against {}:{}; press Ctrl-C to stop",
        config.plc.host, config.plc.port
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    poller.stop_polling().await;
    client.disconnect().await?;
    Ok(())
}
