//! glb - TCP and HTTP(S) load balancer
//!
//! Usage:
//!     glb --config <path>
//!
//! See --help for more options.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

use glb::config::{load_config, Config, ConfigWatcher, Protocol};
use glb::util::{init_logging, ShutdownSignal};
use glb::{Balancer, HttpBalancer, TcpBalancer, TlsSettings};

/// An embeddable TCP and HTTP(S) load balancer.
#[derive(Parser, Debug)]
#[command(name = "glb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, value_name = "FILE")]
    config: PathBuf,

    /// Override log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(&cli.config).with_context(|| {
        format!(
            "failed to load configuration from '{}'",
            cli.config.display()
        )
    })?;

    let log_level = cli.log_level.as_deref().unwrap_or(&config.log_level);
    init_logging(log_level, &config.log_format);

    if cli.validate {
        info!("Configuration is valid");
        println!("Configuration is valid.");
        println!("  Listen: {} ({:?})", config.listen, config.protocol);
        println!("  TLS: {}", if config.tls.is_some() { "on" } else { "off" });
        println!("  Nodes: {}", config.nodes.len());
        for node in &config.nodes {
            println!("    - {}", node);
        }
        return Ok(());
    }

    info!(
        config_path = %cli.config.display(),
        listen = %config.listen,
        protocol = ?config.protocol,
        nodes = config.nodes.len(),
        "glb starting"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;

    runtime.block_on(run_async(cli.config, config))
}

/// Build the balancer named by the config and run it.
async fn run_async(config_path: PathBuf, config: Config) -> Result<()> {
    match config.protocol {
        Protocol::Tcp => {
            let balancer = Arc::new(TcpBalancer::new(config.listen.clone(), None));
            run_balancer(balancer, config_path, config).await
        }
        Protocol::Http => {
            let tls = match &config.tls {
                Some(tls) => Some(
                    TlsSettings::from_pem_files(
                        &tls.cert_path,
                        &tls.key_path,
                        tls.client_ca_path.as_deref(),
                    )
                    .context("failed to load TLS material")?,
                ),
                None => None,
            };
            let balancer = Arc::new(HttpBalancer::new(config.listen.clone(), tls, None));
            run_balancer(balancer, config_path, config).await
        }
    }
}

async fn run_balancer<B>(balancer: Arc<B>, config_path: PathBuf, config: Config) -> Result<()>
where
    B: Balancer + 'static,
{
    balancer.set_nodes(config.nodes);

    // Keep the node list in sync with the config file
    let watcher_shutdown = ShutdownSignal::new();
    let watcher = {
        let balancer = Arc::clone(&balancer);
        ConfigWatcher::new(
            config_path,
            Box::new(move |new_config| balancer.set_nodes(new_config.nodes)),
        )
    };
    let watcher_handle = tokio::spawn(watcher.run(watcher_shutdown.clone()));

    let (ready_tx, ready_rx) = tokio::sync::oneshot::channel();
    let server = {
        let balancer = Arc::clone(&balancer);
        tokio::spawn(async move { balancer.serve(Some(ready_tx)).await })
    };

    if let Ok(addr) = ready_rx.await {
        info!(addr = %addr, "glb is running, press Ctrl+C to stop");

        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("received shutdown signal"),
            Err(e) => error!(error = %e, "failed to listen for shutdown signal"),
        }

        if let Err(e) = balancer.close() {
            error!(error = %e, "failed to close balancer");
        }
    }

    let result = server.await.context("balancer task panicked")?;

    watcher_shutdown.shutdown();
    let _ = watcher_handle.await;

    result.context("balancer stopped with an error")?;
    info!("glb shut down complete");
    Ok(())
}
