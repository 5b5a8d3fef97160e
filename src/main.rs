use std::{error::Error, path::PathBuf};

use clap::Parser;
use pivotsocks::{hop::HopSpec, proxy::ProxyRegistry, ssh::SshConnector};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Expose the far end of a chain of SSH hops as a local SOCKS5 proxy.
#[derive(Parser, Debug)]
#[command(name = "pivotsocks", version)]
struct Args {
    /// Name the proxy session is registered under
    #[arg(long, default_value = "pivot")]
    alias: String,

    /// Loopback port to accept SOCKS5 clients on (0 picks a free one)
    #[arg(long, default_value_t = 1080)]
    listen_port: u16,

    /// JSON file holding the hop list: [{"host", "port", "username", "secret"}, ...]
    #[arg(long, value_name = "FILE", required_unless_present = "hops_json")]
    hops: Option<PathBuf>,

    /// The hop list as an inline JSON array
    #[arg(long, value_name = "JSON", conflicts_with = "hops")]
    hops_json: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let hops = match (args.hops, args.hops_json) {
        (Some(path), _) => HopSpec::Json(tokio::fs::read_to_string(path).await?),
        (None, Some(json)) => HopSpec::Json(json),
        (None, None) => return Err("either --hops or --hops-json is required".into()),
    };

    let registry = ProxyRegistry::new(SshConnector::default());
    let session = registry.open(&args.alias, args.listen_port, hops).await?;
    println!("{}", serde_json::to_string(&session)?);

    tokio::signal::ctrl_c().await?;
    info!("Interrupted, closing proxies");
    registry.shutdown().await;
    Ok(())
}
