//! kernel-sandbox CLI

use clap::{Parser, Subcommand};
use kernel_sandbox::{Config, Orchestrator, Result, Server};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "kernel-sandbox")]
#[command(about = "Sandboxed code execution on pools of one-shot Jupyter kernels")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the pool manager and HTTP API
    Serve {
        /// Path to the configuration file
        #[arg(short, long)]
        config: PathBuf,
        /// Listen address, overrides server.address
        #[arg(short, long)]
        address: Option<String>,
        /// Enable debug logging
        #[arg(long)]
        debug: bool,
        /// Emit logs as JSON
        #[arg(long)]
        json: bool,
    },
    /// Validate a configuration file
    Check {
        /// Path to the configuration file
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, address, debug, json } => {
            init_tracing(debug, json);
            serve(config, address).await
        }
        Commands::Check { config } => check(config),
    }
}

fn init_tracing(debug: bool, json: bool) {
    let default = if debug {
        "kernel_sandbox=debug,tower_http=debug"
    } else {
        "kernel_sandbox=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn serve(path: PathBuf, address: Option<String>) -> Result<()> {
    let config = Config::load(&path)?;

    let address = address.unwrap_or_else(|| config.server.address.clone());
    let addr: SocketAddr = address
        .parse()
        .map_err(|e| kernel_sandbox::Error::Config(format!("invalid listen address {}: {}", address, e)))?;

    let manager = Arc::new(Orchestrator::from_config(&config.sandbox)?);
    for pool in manager.status() {
        tracing::info!(pool = %pool.name, min = pool.min, max = pool.max, "Pool configured");
    }

    let server = Server::new(manager.clone(), addr);
    let grace = Duration::from_secs(config.server.shutdown_timeout_secs);

    kernel_sandbox::runtime::run(manager, server, grace).await
}

fn check(path: PathBuf) -> Result<()> {
    let config = Config::load(&path)?;

    println!("Configuration OK: {}", path.display());
    println!("Listen address: {}", config.server.address);
    println!();
    println!("{:<16} {:<16} {:>4} {:>4}  {}", "POOL", "KERNELSPEC", "MIN", "MAX", "GATEWAY");
    println!("{}", "-".repeat(64));
    for kernel in &config.sandbox.kernels {
        println!(
            "{:<16} {:<16} {:>4} {:>4}  {}",
            kernel.name,
            kernel.kernelspec(),
            kernel.min,
            kernel.max,
            kernel.gateway.address
        );
    }

    Ok(())
}
