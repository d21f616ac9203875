//! Service announcement broadcast.
//!
//! Periodically sends this node's `<name> TAB <uri>` datagram to the
//! discovery multicast group so peers can learn where the service lives.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio::time::{self, MissedTickBehavior};

use beacon_core::config::DiscoveryConfig;
use beacon_core::Announcement;

/// Sends one announcement per period until shut down.
pub struct Announcer {
    socket: UdpSocket,
    dest: SocketAddr,
    payload: Bytes,
    period: Duration,
}

impl Announcer {
    /// Create the send socket. Must be called inside a Tokio runtime.
    pub fn bind(config: &DiscoveryConfig, announcement: &Announcement) -> Result<Self> {
        let socket = make_broadcast_socket(config)
            .context("failed to create multicast broadcast socket")?;
        let socket = UdpSocket::from_std(socket).context("failed to convert to tokio UdpSocket")?;

        Ok(Self {
            socket,
            dest: group_addr(config),
            payload: announcement.encode(),
            period: config.announce_period(),
        })
    }

    /// Broadcast on a fixed period until shutdown is signalled.
    ///
    /// The first announcement goes out immediately. A failed send is logged
    /// and retried on the next tick, never sooner.
    ///
    /// # Arguments
    /// * `shutdown` - Stops the loop when a value is sent. A closed channel
    ///   (every sender dropped) is not a stop signal; the loop keeps going.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let mut interval = time::interval(self.period);
        // A stalled runtime must not cause a burst of catch-up datagrams.
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            dest = %self.dest,
            bytes = self.payload.len(),
            period_ms = self.period.as_millis() as u64,
            "announcement broadcast starting"
        );

        loop {
            tokio::select! {
                Ok(()) = shutdown.recv() => {
                    tracing::info!("announcement broadcast shutting down");
                    return;
                }
                _ = interval.tick() => {}
            }

            self.announce_once().await;
        }
    }

    /// Send the announcement once. Returns false if the send failed.
    pub async fn announce_once(&self) -> bool {
        match self.socket.send_to(&self.payload, self.dest).await {
            Ok(n) => {
                tracing::trace!(bytes = n, "announcement sent");
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, dest = %self.dest, "announcement send failed");
                false
            }
        }
    }
}

/// Where announcements are sent: the group, scoped to the configured
/// interface for IPv6.
pub fn group_addr(config: &DiscoveryConfig) -> SocketAddr {
    match config.group {
        IpAddr::V4(group) => SocketAddrV4::new(group, config.port).into(),
        IpAddr::V6(group) => {
            SocketAddrV6::new(group, config.port, 0, config.interface_index).into()
        }
    }
}

/// Create a UDP socket suitable for sending multicast to the configured group.
fn make_broadcast_socket(config: &DiscoveryConfig) -> Result<std::net::UdpSocket> {
    let socket = match config.group {
        IpAddr::V4(_) => {
            let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
                .context("socket()")?;
            // 0.0.0.0 leaves the outgoing interface to the routing table
            socket
                .set_multicast_if_v4(&config.interface_addr)
                .context("IP_MULTICAST_IF")?;
            // TTL 1 (the default) keeps announcements on the local link
            socket
                .set_multicast_ttl_v4(config.multicast_ttl)
                .context("IP_MULTICAST_TTL")?;
            // Loopback on so nodes sharing a host hear each other.
            socket.set_multicast_loop_v4(true).context("IP_MULTICAST_LOOP")?;
            // Ephemeral source port; only the listener needs the well-known one
            let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0);
            socket.bind(&bind_addr.into()).context("bind()")?;
            socket
        }
        IpAddr::V6(_) => {
            let socket = Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP))
                .context("socket()")?;
            // Interface index 0 = system default
            socket
                .set_multicast_if_v6(config.interface_index)
                .context("IPV6_MULTICAST_IF")?;
            socket
                .set_multicast_hops_v6(config.multicast_ttl)
                .context("IPV6_MULTICAST_HOPS")?;
            socket.set_multicast_loop_v6(true).context("IPV6_MULTICAST_LOOP")?;
            let bind_addr = SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, 0, 0, 0);
            socket.bind(&bind_addr.into()).context("bind()")?;
            socket
        }
    };

    // Required by UdpSocket::from_std
    socket.set_nonblocking(true).context("set_nonblocking")?;
    Ok(socket.into())
}
