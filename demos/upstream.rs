//! Demo upstream: a thin TCP echo-ish server that the proxy can forward to.
//! Out of THE CORE (spec.md §1 scopes demo binaries out); grounded in
//! `original_source/cmd/upstream/main.go`.

use clap::Parser;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

#[derive(Parser, Debug)]
#[command(name = "demo-upstream", long_about = None)]
struct Args {
    /// Address to listen on, e.g. 127.0.0.1:8000.
    #[arg(short, long, default_value = "127.0.0.1:8000")]
    addr: String,
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let args = Args::parse();

    let listener = match TcpListener::bind(&args.addr).await {
        Ok(l) => l,
        Err(e) => {
            log::error!("failed to bind {}: {}", args.addr, e);
            std::process::exit(1);
        }
    };
    log::info!("upstream started {}", args.addr);

    loop {
        let (mut conn, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                log::error!("accept error: {}", e);
                continue;
            }
        };
        let addr = args.addr.clone();
        tokio::spawn(async move {
            let mut buf = [0u8; 1024];
            let n = match conn.read(&mut buf).await {
                Ok(n) => n,
                Err(e) => {
                    log::error!("{}", e);
                    return;
                }
            };
            log::info!("{} from {}: {}", addr, peer, String::from_utf8_lossy(&buf[..n]));

            let msg = format!("Reply from upstream {}", addr);
            if let Err(e) = conn.write_all(msg.as_bytes()).await {
                log::error!("{}", e);
            }
        });
    }
}
