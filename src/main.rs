use clap::Parser;
use clap::Subcommand;
use slotcache::node::open_storage_engine;
use slotcache::node::CacheServer;
use slotcache::node::StandaloneBuilder;
use slotcache::utils::logging::init_observability;
use slotcache::CacheConfig;
use slotcache::Error;
use slotcache::Result;
use tokio::signal::unix::signal;
use tokio::signal::unix::SignalKind;
use tokio::sync::watch;
use tracing::error;
use tracing::info;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Extra configuration file applied on top of CONFIG_PATH
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Commands {
    /// Proxy, metadata and the initial nodes in one process (default)
    Standalone,
    /// A single cache server node answering backend frames
    Node,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mode = cli.command.unwrap_or(Commands::Standalone);

    let mut config = CacheConfig::new()?;
    if let Some(path) = &cli.config {
        config = config.with_override_config(path)?;
    }
    let config = config.validate()?;

    // Initializing Logs
    let log_name = match mode {
        Commands::Standalone => "standalone".to_string(),
        Commands::Node => format!("node{}", config.node.node_id),
    };
    let _guard = init_observability(&config.cluster.log_dir, &log_name)?;

    // Initializing Shutdown Signal
    let (graceful_tx, graceful_rx) = watch::channel(());
    tokio::spawn(async {
        if let Err(e) = graceful_shutdown(graceful_tx).await {
            error!("Failed to shutdown: {:?}", e);
        }
    });

    let result = match mode {
        Commands::Standalone => run_standalone(config, graceful_rx).await,
        Commands::Node => run_node(config, graceful_rx).await,
    };
    if let Err(e) = &result {
        error!("slotcache stops: {:?}", e);
    }

    println!("Exiting program.");
    result
}

async fn run_standalone(
    config: CacheConfig,
    shutdown: watch::Receiver<()>,
) -> Result<()> {
    let cluster = StandaloneBuilder::new(config, shutdown).start().await?;
    info!(
        "Proxy ready on {}. Waiting for CTRL+C signal...",
        cluster.proxy_addr()
    );
    cluster.wait().await
}

async fn run_node(
    config: CacheConfig,
    shutdown: watch::Receiver<()>,
) -> Result<()> {
    let engine = open_storage_engine(&config.node, config.node.node_id)?;
    let server = CacheServer::bind(config.node.listen_address, engine, config.network.max_frame_len).await?;
    info!(
        node_id = config.node.node_id,
        "Cache server ready. Waiting for CTRL+C signal..."
    );
    server.serve(shutdown).await
}

async fn graceful_shutdown(graceful_tx: watch::Sender<()>) -> Result<()> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = sigint.recv() => {
            info!("SIGINT detected.");
        },
        _ = sigterm.recv() => {
            info!("SIGTERM detected.");
        },
    }

    graceful_tx.send(()).map_err(|e| {
        error!("Failed to send shutdown signal: {}", e);
        Error::Fatal(format!("Failed to send shutdown signal: {e}"))
    })?;

    info!("Shutdown signal sent");
    Ok(())
}
