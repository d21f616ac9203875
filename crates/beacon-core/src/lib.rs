//! beacon-core — shared types, wire format, and configuration.
//! All other Beacon crates depend on this one.

pub mod config;
pub mod endpoint;
pub mod wire;

pub use endpoint::{Endpoint, EndpointError};
pub use wire::{Announcement, WireError};
