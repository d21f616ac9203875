//! beacon-services — state shared between the discovery tasks and callers.

pub mod registry;

pub use registry::{ServiceEntry, ServiceRegistry};
