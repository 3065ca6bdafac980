//! camrelay binary
//!
//! Configuration comes from environment variables so it works the same
//! in a shell, a unit file, or a container:
//!
//!   CAMRELAY_RTMP_ADDR        RTMP listen address (default 0.0.0.0:1935)
//!   CAMRELAY_HTTP_ADDR        HTTP listen address (default 0.0.0.0:8000)
//!   CAMRELAY_ADVERTISED_ADDR  IP to print in URLs (default: route probe)
//!   CAMRELAY_GOP_CACHE        set to "0" to disable the GOP cache
//!   CAMRELAY_QUEUE_CAPACITY   per-subscriber queue depth (default 256)
//!   CAMRELAY_MAX_CONNECTIONS  RTMP connection cap, 0 = unlimited
//!   RUST_LOG                  log filter (default "camrelay=info")

use std::net::IpAddr;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use camrelay::server::netinfo;
use camrelay::{ControlServer, Result, RtmpServer, ServerConfig, StreamRegistry};

fn config_from_env() -> Result<ServerConfig> {
    let mut config = ServerConfig::default();

    if let Ok(addr) = std::env::var("CAMRELAY_RTMP_ADDR") {
        config.rtmp_addr = parse_env("CAMRELAY_RTMP_ADDR", &addr)?;
    }
    if let Ok(addr) = std::env::var("CAMRELAY_HTTP_ADDR") {
        config.http_addr = parse_env("CAMRELAY_HTTP_ADDR", &addr)?;
    }
    if let Ok(addr) = std::env::var("CAMRELAY_ADVERTISED_ADDR") {
        let ip: IpAddr = parse_env("CAMRELAY_ADVERTISED_ADDR", &addr)?;
        config.advertised_addr = Some(ip);
    }
    if let Ok(v) = std::env::var("CAMRELAY_GOP_CACHE") {
        config.gop_cache = v != "0";
    }
    if let Ok(v) = std::env::var("CAMRELAY_QUEUE_CAPACITY") {
        let capacity: usize = parse_env("CAMRELAY_QUEUE_CAPACITY", &v)?;
        config.subscriber_queue = capacity.max(1);
    }
    if let Ok(v) = std::env::var("CAMRELAY_MAX_CONNECTIONS") {
        config.max_connections = parse_env("CAMRELAY_MAX_CONNECTIONS", &v)?;
    }

    Ok(config)
}

fn parse_env<T>(name: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
{
    value
        .parse()
        .map_err(|_| camrelay::Error::InvalidRequest(format!("{}: cannot parse {:?}", name, value)))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("camrelay=info")),
        )
        .init();

    let config = config_from_env()?;
    let registry = Arc::new(StreamRegistry::with_config(config.registry_config()));

    let ip = netinfo::display_ip(config.advertised_addr);
    tracing::info!(
        "publish to rtmp://{}:{}/live/<stream>",
        ip,
        config.rtmp_addr.port()
    );
    tracing::info!(
        "watch at   http://{}:{}/live/<stream>.flv",
        ip,
        config.http_addr.port()
    );

    let rtmp = RtmpServer::new(config.clone(), Arc::clone(&registry));
    let http = ControlServer::new(config, registry);

    tokio::select! {
        result = rtmp.run() => result,
        result = http.run() => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down");
            Ok(())
        }
    }
}
