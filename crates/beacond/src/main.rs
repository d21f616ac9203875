//! beacond — Beacon discovery node.
//!
//! Announces one service and logs what it has discovered.
//!
//!   beacond [service-name] [service-uri]
//!
//! Arguments override the `[service]` section of the config file.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use anyhow::{Context, Result};

use beacon_core::config::BeaconConfig;
use beacond::Discovery;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = BeaconConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let mut config = BeaconConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        BeaconConfig::default()
    });

    let mut args = std::env::args().skip(1);
    if let Some(name) = args.next() {
        config.service.name = name;
    }
    if let Some(uri) = args.next() {
        config.service.uri = uri;
    }
    if config.service.name.is_empty() {
        config.service.name = "beacon".to_string();
    }
    if config.service.uri.is_empty() {
        let local = local_addr(&config)?;
        config.service.uri = format!("http://{}", SocketAddr::new(local, 8080));
    }

    let discovery = Discovery::new(
        config.discovery.clone(),
        config.service.name.clone(),
        config.service.uri.clone(),
    )?;
    let handle = discovery.start().context("failed to start discovery")?;

    // ── Registry printer ─────────────────────────────────────────────────────

    let printer = {
        let registry = discovery.registry().clone();
        let period = config.discovery.announce_period();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                let mut names = registry.service_names();
                names.sort();
                tracing::info!(count = names.len(), "registry snapshot");
                for name in names {
                    let mut uris: Vec<String> = registry
                        .known_uris_of(&name)
                        .into_iter()
                        .map(|ep| ep.to_string())
                        .collect();
                    uris.sort();
                    tracing::info!(service = %name, uris = ?uris, "  service");
                }
            }
        })
    };

    // ── Wait for exit ────────────────────────────────────────────────────────

    tokio::signal::ctrl_c().await.ok();
    tracing::info!("shutdown signal received");

    printer.abort();
    tokio::time::timeout(Duration::from_secs(5), handle.shutdown())
        .await
        .context("discovery tasks did not stop in time")?;

    Ok(())
}

/// The address this host would use to reach the discovery group.
fn local_addr(config: &BeaconConfig) -> Result<IpAddr> {
    let bind: SocketAddr = match config.discovery.group {
        IpAddr::V4(_) => "0.0.0.0:0".parse()?,
        IpAddr::V6(_) => "[::]:0".parse()?,
    };
    let probe = std::net::UdpSocket::bind(bind).context("failed to bind probe socket")?;
    probe
        .connect(beacond::discovery::broadcast::group_addr(&config.discovery))
        .context("no route to discovery group")?;
    Ok(probe.local_addr()?.ip())
}
