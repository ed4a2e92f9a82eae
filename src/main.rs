use anyhow::Context;
use clap::Parser;
use code_exec::{CodeExecutionService, ExecConfig};
use code_exec_server::{create_app, run_server};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file; `CODE_EXEC_*` environment variables override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0")]
    host: IpAddr,

    /// Port to listen on
    #[arg(short, long, default_value = "3000")]
    port: u16,

    /// Maximum number of concurrent executions
    #[arg(short, long)]
    max_concurrent: Option<usize>,

    /// Directory for per-execution sandboxes
    #[arg(long)]
    sandbox_root: Option<PathBuf>,

    /// Seconds between idle session sweeps
    #[arg(long, default_value = "60")]
    sweep_interval: u64,
}

impl Args {
    fn exec_config(&self) -> anyhow::Result<ExecConfig> {
        let mut config = ExecConfig::load(self.config.as_deref())
            .context("Failed to load configuration")?;
        if let Some(max_concurrent) = self.max_concurrent {
            config.max_concurrent_executions = max_concurrent;
        }
        if let Some(root) = &self.sandbox_root {
            config.sandbox_root = root.clone();
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = args.exec_config()?;
    info!(
        default_time_ms = config.default_time_ms,
        max_concurrent = config.max_concurrent_executions,
        sandbox_root = %config.sandbox_root.display(),
        "Configuration loaded"
    );

    let service = CodeExecutionService::new(config)?;
    let sweeper = service
        .sessions()
        .spawn_sweeper(Duration::from_secs(args.sweep_interval.max(1)));

    let app = create_app(service);
    let result = run_server(app, SocketAddr::new(args.host, args.port)).await;

    sweeper.abort();
    result?;
    Ok(())
}
