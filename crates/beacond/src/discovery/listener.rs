//! Service announcement listener.
//!
//! Joins the discovery multicast group and listens for announcements from
//! peers (and from this node, via multicast loopback). Valid announcements
//! are recorded in the service registry. A separate expiry task can drop
//! names that have gone quiet.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::broadcast;

use beacon_core::config::DiscoveryConfig;
use beacon_core::wire::MAX_ANNOUNCEMENT_LEN;
use beacon_core::{Announcement, Endpoint};
use beacon_services::ServiceRegistry;

/// Receives announcements and applies them to the registry.
pub struct Listener {
    socket: UdpSocket,
    registry: ServiceRegistry,
}

impl Listener {
    /// Bind the port and join the group. Must be called inside a Tokio
    /// runtime. Failing to join is fatal: a listener that never hears
    /// anything is worse than no listener.
    pub fn bind(config: &DiscoveryConfig, registry: ServiceRegistry) -> Result<Self> {
        let socket = make_listener_socket(config)
            .context("failed to create multicast listener socket")?;
        let socket = UdpSocket::from_std(socket).context("failed to convert to tokio UdpSocket")?;
        Ok(Self { socket, registry })
    }

    /// Receive until shutdown is signalled.
    ///
    /// Receive errors are logged and the loop carries on with the same
    /// socket, backing off between attempts so a socket that keeps failing
    /// settles into a quiet degraded state instead of a hot loop.
    ///
    /// # Arguments
    /// * `shutdown` - Stops the loop when a value is sent. A closed channel
    ///   (every sender dropped) is not a stop signal; the loop keeps going.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        // One spare byte so an over-long datagram shows up as oversized
        // rather than silently truncated to a valid-looking record.
        let mut buf = vec![0u8; MAX_ANNOUNCEMENT_LEN + 1];
        let mut consecutive_errors: u32 = 0;

        tracing::info!(addr = ?self.socket.local_addr().ok(), "announcement listener starting");

        loop {
            let received = tokio::select! {
                Ok(()) = shutdown.recv() => {
                    tracing::info!("announcement listener shutting down");
                    return;
                }
                r = self.socket.recv_from(&mut buf) => r,
            };

            let (len, peer_addr) = match received {
                Ok(r) => r,
                Err(e) => {
                    consecutive_errors = consecutive_errors.saturating_add(1);
                    if consecutive_errors == 1 {
                        tracing::warn!(error = %e, "recv_from failed");
                    } else {
                        tracing::trace!(error = %e, consecutive_errors, "recv_from still failing");
                    }

                    tokio::select! {
                        Ok(()) = shutdown.recv() => {
                            tracing::info!("announcement listener shutting down");
                            return;
                        }
                        _ = tokio::time::sleep(recv_error_backoff(consecutive_errors)) => {}
                    }
                    continue;
                }
            };

            if consecutive_errors > 0 {
                tracing::info!(consecutive_errors, "recv_from recovered");
                consecutive_errors = 0;
            }

            apply_datagram(&self.registry, &buf[..len], peer_addr);
        }
    }
}

/// Pause before the next receive after `consecutive` failures in a row:
/// 50ms doubling up to 2s.
pub fn recv_error_backoff(consecutive: u32) -> Duration {
    const BASE: Duration = Duration::from_millis(50);
    const MAX: Duration = Duration::from_secs(2);
    let shift = consecutive.saturating_sub(1).min(6);
    (BASE * (1u32 << shift)).min(MAX)
}

/// Decode one datagram and record it. Returns false if it was dropped.
///
/// Malformed payloads and unparseable URIs are both dropped whole; a
/// service name is never registered without a usable endpoint.
pub fn apply_datagram(registry: &ServiceRegistry, payload: &[u8], from: SocketAddr) -> bool {
    let announcement = match Announcement::decode(payload) {
        Ok(a) => a,
        Err(e) => {
            tracing::trace!(%from, error = %e, "dropping malformed announcement");
            return false;
        }
    };

    let endpoint = match Endpoint::parse(&announcement.service_uri) {
        Ok(ep) => ep,
        Err(e) => {
            tracing::trace!(%from, error = %e, "dropping announcement with invalid URI");
            return false;
        }
    };

    tracing::trace!(%from, service = %announcement.service_name, uri = %endpoint, "announcement received");

    if registry.record(&announcement.service_name, endpoint.clone()) {
        tracing::debug!(
            service = %announcement.service_name,
            uri = %endpoint,
            %from,
            "endpoint discovered"
        );
    }
    true
}

/// Remove registry entries that have not been refreshed within the TTL.
///
/// # Arguments
/// * `ttl` - Age past which a service name is dropped.
/// * `check_interval` - Time between sweeps.
/// * `shutdown` - Stops the loop when a value is sent.
pub async fn expiry_loop(
    registry: ServiceRegistry,
    ttl: Duration,
    check_interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut interval = tokio::time::interval(check_interval);

    loop {
        tokio::select! {
            Ok(()) = shutdown.recv() => return,
            _ = interval.tick() => {}
        }

        let removed = registry.evict_stale(ttl, SystemTime::now());
        if removed > 0 {
            tracing::debug!(removed, "expired service registry entries");
        }
    }
}

/// Create a UDP socket bound to the discovery port and joined to the group.
fn make_listener_socket(config: &DiscoveryConfig) -> Result<std::net::UdpSocket> {
    let socket = match config.group {
        IpAddr::V4(group) => {
            let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
                .context("socket()")?;
            set_reuse(&socket)?;
            // Bind the wildcard address, not the group: portable across
            // Linux, macOS and Windows
            let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, config.port);
            socket.bind(&bind_addr.into()).context("bind()")?;
            // 0.0.0.0 lets the kernel pick the interface from the routing table
            socket
                .join_multicast_v4(&group, &config.interface_addr)
                .context("IP_ADD_MEMBERSHIP")?;
            socket
        }
        IpAddr::V6(group) => {
            let socket = Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP))
                .context("socket()")?;
            set_reuse(&socket)?;
            // Keep IPv4 traffic on the same port out of this socket
            socket.set_only_v6(true).context("IPV6_V6ONLY")?;
            let bind_addr = SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, config.port, 0, 0);
            socket.bind(&bind_addr.into()).context("bind()")?;
            socket
                .join_multicast_v6(&group, config.interface_index)
                .context("IPV6_JOIN_GROUP")?;
            socket
        }
    };

    // Required by UdpSocket::from_std
    socket.set_nonblocking(true).context("set_nonblocking")?;
    Ok(socket.into())
}

/// Several nodes on one host all listen on the same port.
fn set_reuse(socket: &Socket) -> Result<()> {
    socket.set_reuse_address(true).context("SO_REUSEADDR")?;
    #[cfg(unix)]
    socket.set_reuse_port(true).context("SO_REUSEPORT")?;
    Ok(())
}
