//! beacond — multicast service discovery.
//!
//! Every node announces `(service name, URI)` on a shared multicast group
//! and collects the announcements of every other node into a registry.

pub mod discovery;

pub use beacon_core::{Announcement, Endpoint};
pub use beacon_services::{ServiceEntry, ServiceRegistry};
pub use discovery::{Discovery, DiscoveryError, DiscoveryHandle};
