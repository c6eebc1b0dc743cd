//! Demo client: dials the proxy over mTLS using a fixture client identity,
//! sends one line, prints the reply. Out of THE CORE (spec.md §1 scopes
//! demo binaries out); grounded in `original_source/pkg/client/client.go`.

use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;

use clap::Parser;
use rustls_pki_types::ServerName;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

#[derive(Parser, Debug)]
#[command(name = "demo-client", long_about = None)]
struct Args {
    /// Client identity; loads certs/<name>.crt and certs/<name>.key.
    #[arg(short, long, default_value = "alice")]
    name: String,

    /// Proxy address to dial.
    #[arg(short, long, default_value = "127.0.0.1:1234")]
    addr: String,

    /// Directory containing ca.crt and the client's cert/key pair.
    #[arg(short = 'd', long, default_value = "certs")]
    cert_dir: String,
}

fn load_certs(path: &str) -> Vec<rustls_pki_types::CertificateDer<'static>> {
    let file = File::open(path).unwrap_or_else(|e| panic!("could not open {}: {}", path, e));
    rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<Vec<_>, _>>()
        .unwrap_or_else(|e| panic!("could not parse {}: {}", path, e))
}

fn load_key(path: &str) -> rustls_pki_types::PrivateKeyDer<'static> {
    let file = File::open(path).unwrap_or_else(|e| panic!("could not open {}: {}", path, e));
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .unwrap_or_else(|e| panic!("could not parse {}: {}", path, e))
        .unwrap_or_else(|| panic!("no private key in {}", path))
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let args = Args::parse();

    let ca_path = format!("{}/ca.crt", args.cert_dir);
    let cert_path = format!("{}/{}.crt", args.cert_dir, args.name);
    let key_path = format!("{}/{}.key", args.cert_dir, args.name);

    let mut roots = rustls::RootCertStore::empty();
    for cert in load_certs(&ca_path) {
        roots.add(cert).expect("invalid CA certificate");
    }

    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    let client_config = rustls::ClientConfig::builder_with_provider(provider)
        .with_protocol_versions(&[&rustls::version::TLS12, &rustls::version::TLS13])
        .expect("supported protocol versions")
        .with_root_certificates(roots)
        .with_client_auth_cert(load_certs(&cert_path), load_key(&key_path))
        .expect("invalid client certificate/key pair");

    let connector = TlsConnector::from(Arc::new(client_config));
    let tcp = TcpStream::connect(&args.addr)
        .await
        .unwrap_or_else(|e| panic!("client dial error: {}", e));

    let server_name = ServerName::try_from("localhost").expect("valid server name");
    let mut conn = connector
        .connect(server_name, tcp)
        .await
        .unwrap_or_else(|e| panic!("tls handshake error: {}", e));

    let msg = format!("Hello from {}", args.name);
    conn.write_all(msg.as_bytes())
        .await
        .unwrap_or_else(|e| panic!("error write: {}", e));

    let mut buf = [0u8; 1024];
    match conn.read(&mut buf).await {
        Ok(0) => log::info!("connection closed with no reply"),
        Ok(n) => log::info!("{}", String::from_utf8_lossy(&buf[..n])),
        Err(e) => log::error!("error read: {}", e),
    }
}
