use clap::Parser;
use tracing::{debug, error, info, warn};

use recman::config::Config;

mod log;
mod signal;

#[derive(Parser)]
#[command(version)]
struct Args {
    /// Set config file path
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let cfg = match Config::load(args.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("invalid configuration: {:#}", e);
            std::process::exit(2);
        }
    };

    log::set(format!(
        "liverec={},recman={},tower_http={}",
        cfg.log.level, cfg.log.level, cfg.log.level
    ));
    warn!("set log level : {}", cfg.log.level);
    debug!("config : {:?}", cfg);

    let listener = match tokio::net::TcpListener::bind(cfg.http.listen).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("failed to bind {}: {}", cfg.http.listen, e);
            std::process::exit(1);
        }
    };
    match listener.local_addr() {
        Ok(addr) => info!("Server listening on {}", addr),
        Err(e) => warn!("Server listening on unknown address: {}", e),
    }

    if let Err(e) = recman::server_up(cfg, listener, shutdown_signal()).await {
        error!("Server failed: {:#}", e);
        std::process::exit(1);
    }
    info!("Server shutdown");
}

async fn shutdown_signal() {
    let str = signal::wait_for_stop_signal().await;
    debug!("Received signal: {}", str);
}
