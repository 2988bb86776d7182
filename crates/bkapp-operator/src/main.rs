//! BkApp operator binary.

use std::path::PathBuf;

use bkapp_config::{LogFormat, OperatorConfig, load_operator_config};
use bkapp_operator::controller;
use clap::Parser;
use kube::Client;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "bkapp-operator")]
#[command(about = "Reconciles BkApp resources", long_about = None)]
struct Cli {
    /// Path to the operator configuration file
    #[arg(long, env = "BKAPP_OPERATOR_CONFIG")]
    config: Option<PathBuf>,

    /// Namespace to watch (all namespaces when unset)
    #[arg(long, env = "BKAPP_OPERATOR_NAMESPACE")]
    namespace: Option<String>,

    /// Number of applications reconciled in parallel
    #[arg(long)]
    concurrency: Option<u16>,

    /// Log output format: pretty or json
    #[arg(long)]
    log_format: Option<String>,
}

impl Cli {
    fn load_config(&self) -> anyhow::Result<OperatorConfig> {
        let mut config = match &self.config {
            Some(path) => load_operator_config(path)?,
            None => OperatorConfig::default(),
        };
        if let Some(ns) = &self.namespace {
            config.namespace = Some(ns.clone()).filter(|ns| !ns.is_empty());
        }
        if let Some(concurrency) = self.concurrency {
            anyhow::ensure!(concurrency > 0, "--concurrency must be at least 1");
            config.concurrency = concurrency;
        }
        if let Some(format) = &self.log_format {
            config.log.format = format.parse()?;
        }
        Ok(config)
    }
}

fn init_tracing(config: &OperatorConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log.filter));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match config.log.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.load_config()?;
    init_tracing(&config);

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested, cancelling in-flight passes");
            signal.cancel();
        }
    });

    let client = Client::try_default().await?;
    controller::run(client, config, shutdown).await;

    Ok(())
}
