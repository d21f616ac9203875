//! Beacon integration test harness.
//!
//! Tests here run real discovery engines against each other over multicast
//! loopback on this host. Each test uses its own group and port so tests
//! can run in parallel.
//!
//! Hosts without a multicast route (some containers, CI sandboxes) cannot
//! deliver anything; tests print SKIP and return instead of failing.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use anyhow::{Context, Result};
pub use beacon_core::config::DiscoveryConfig;
pub use beacond::{Discovery, DiscoveryHandle};

mod discovery;

// ── Harness ───────────────────────────────────────────────────────────────────

/// Announce period used by test nodes.
pub const TEST_PERIOD_MS: u64 = 100;

/// How long to wait for a packet before deciding multicast is unavailable.
pub const DELIVERY_TIMEOUT: Duration = Duration::from_secs(3);

/// A discovery config on a per-test group and port.
pub fn test_config(slot: u8) -> DiscoveryConfig {
    DiscoveryConfig {
        group: IpAddr::V4(Ipv4Addr::new(239, 255, 42, slot)),
        port: 47_000 + slot as u16,
        announce_period_ms: TEST_PERIOD_MS,
        ..DiscoveryConfig::default()
    }
}

/// Build and start a node. `None` means multicast setup is unavailable here.
pub fn start_node(
    config: &DiscoveryConfig,
    name: &str,
    uri: &str,
) -> Option<(Discovery, DiscoveryHandle)> {
    let discovery = Discovery::new(config.clone(), name, uri).expect("valid node config");
    match discovery.start() {
        Ok(handle) => Some((discovery, handle)),
        Err(e) => {
            eprintln!("SKIP: cannot start discovery: {e}");
            None
        }
    }
}

/// Poll `cond` until it holds or `timeout` passes.
pub async fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    cond()
}

/// Send one raw datagram to the group, bypassing the announcer.
pub fn send_raw(config: &DiscoveryConfig, payload: &[u8]) -> Result<()> {
    let socket = std::net::UdpSocket::bind("0.0.0.0:0").context("bind raw sender")?;
    socket.set_multicast_loop_v4(true).context("IP_MULTICAST_LOOP")?;
    socket.set_multicast_ttl_v4(1).context("IP_MULTICAST_TTL")?;
    socket
        .send_to(payload, SocketAddr::new(config.group, config.port))
        .context("send raw datagram")?;
    Ok(())
}

/// Sorted literal URIs known for `name`.
pub fn uris(discovery: &Discovery, name: &str) -> Vec<String> {
    let mut uris: Vec<String> = discovery
        .known_uris_of(name)
        .into_iter()
        .map(|ep| ep.to_string())
        .collect();
    uris.sort();
    uris
}
