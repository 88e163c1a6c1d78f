use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::info;

use codecanvas::config::Config;
use codecanvas::gateway;
use codecanvas::models;
use codecanvas::orchestrator::Orchestrator;
use codecanvas::persist::JsonProjectStore;

#[derive(Parser, Debug)]
#[command(
    name = "codecanvas",
    version,
    about = "Agent-driven React app builder over a virtual file system"
)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Override the gateway bind address from the config
    #[arg(long)]
    addr: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    {
        use tracing_subscriber::layer::SubscriberExt;
        use tracing_subscriber::util::SubscriberInitExt;

        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    let cli = Cli::parse();
    let mut config = Config::load(&cli.config).await?;
    if let Some(addr) = cli.addr {
        config.listen_addr = addr;
    }

    let backend: Arc<dyn models::ModelBackend> = models::build_backend(&config.model).into();
    let store: Arc<dyn codecanvas::persist::PersistenceHook> =
        Arc::new(JsonProjectStore::new(config.resolved_data_dir()));
    let orchestrator = Orchestrator::new(backend.clone(), config.budgets.clone(), Some(store));

    info!(
        backend = backend.name(),
        model = %config.model.model,
        "starting codecanvas"
    );

    let router = gateway::router(orchestrator, &backend);
    gateway::serve(&config.listen_addr, router).await
}
