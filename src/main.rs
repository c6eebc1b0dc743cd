use std::sync::Arc;

use clap::Parser;
use mtls_l4_balancer::{Server, ServerCfg};

/// mTLS-terminating Layer-4 reverse proxy.
#[derive(Parser, Debug)]
#[command(name = "mtls-l4-balancer", long_about = None)]
struct Args {
    /// Path to a YAML config file. Falls back to a runnable demo config
    /// (fixture certs, three local upstreams) when omitted.
    #[arg(short, long)]
    config: Option<String>,

    /// Override the bind address from the config file.
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let args = Args::parse();

    let mut cfg = match args.config {
        Some(path) => ServerCfg::load(&path).unwrap_or_else(|e| {
            log::error!("failed to load config {}: {}", path, e);
            std::process::exit(1);
        }),
        None => {
            log::info!("no --config given, using the built-in demo configuration");
            ServerCfg::default_for_demo()
        }
    };

    if let Some(bind) = args.bind {
        cfg.bind = bind;
    }

    let server = Arc::new(Server::new(&cfg).unwrap_or_else(|e| {
        log::error!("failed to create server: {}", e);
        std::process::exit(1);
    }));

    if let Err(e) = server.start().await {
        log::error!("failed to start server: {}", e);
        std::process::exit(1);
    }

    log::info!("load balancer server started!");

    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            log::info!("received shutdown signal");
            server.stop();
        }
        Err(e) => log::error!("failed to listen for shutdown signal: {}", e),
    }
}
