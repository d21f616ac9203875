//! Discovery engine — announce this node's service, collect everyone else's.
//!
//! Two tasks share one registry: the broadcast task sends this node's
//! announcement every period, the listener task records every announcement
//! it hears. An optional third task expires names that have gone quiet.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::task::JoinHandle;

use beacon_core::config::DiscoveryConfig;
use beacon_core::{Announcement, Endpoint, EndpointError, WireError};
use beacon_services::ServiceRegistry;

pub mod broadcast;
pub mod listener;

use self::broadcast::Announcer;
use self::listener::Listener;

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("discovery already started")]
    AlreadyStarted,
    #[error("invalid announcement: {0}")]
    InvalidAnnouncement(#[from] WireError),
    #[error("invalid service URI: {0}")]
    InvalidUri(#[from] EndpointError),
    #[error("invalid discovery config: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Setup(#[from] anyhow::Error),
}

/// A node's discovery engine.
///
/// Built once with everything it needs; nothing is reconfigurable after
/// that. Queries work before and after `start`.
pub struct Discovery {
    config: DiscoveryConfig,
    announcement: Announcement,
    registry: ServiceRegistry,
    started: AtomicBool,
}

impl Discovery {
    /// Validate the configuration and create an empty registry.
    ///
    /// Neither `service_name` nor `service_uri` may contain a tab.
    pub fn new(
        config: DiscoveryConfig,
        service_name: impl Into<String>,
        service_uri: impl Into<String>,
    ) -> Result<Self, DiscoveryError> {
        let announcement = Announcement::new(service_name, service_uri);
        announcement.validate()?;
        Endpoint::parse(&announcement.service_uri)?;

        if !config.group.is_multicast() {
            return Err(DiscoveryError::InvalidConfig(format!(
                "{} is not a multicast address",
                config.group
            )));
        }
        if config.announce_period_ms == 0 {
            return Err(DiscoveryError::InvalidConfig(
                "announce_period_ms must be greater than zero".into(),
            ));
        }

        Ok(Self {
            config,
            announcement,
            registry: ServiceRegistry::new(),
            started: AtomicBool::new(false),
        })
    }

    /// Bind and join, then spawn the announce and listen loops.
    ///
    /// Must be called from within a Tokio runtime. Socket setup happens
    /// before anything is spawned, so a node that cannot join the group
    /// gets an error here instead of a silent listener. Only one
    /// successful start is allowed per engine.
    pub fn start(&self) -> Result<DiscoveryHandle, DiscoveryError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(DiscoveryError::AlreadyStarted);
        }

        let sockets = Announcer::bind(&self.config, &self.announcement).and_then(|announcer| {
            Listener::bind(&self.config, self.registry.clone()).map(|l| (announcer, l))
        });
        let (announcer, listener) = match sockets {
            Ok(s) => s,
            Err(e) => {
                // Nothing was spawned; allow another attempt.
                self.started.store(false, Ordering::SeqCst);
                return Err(e.into());
            }
        };

        tracing::info!(
            group = %self.config.group,
            port = self.config.port,
            service = %self.announcement.service_name,
            uri = %self.announcement.service_uri,
            "starting discovery"
        );

        let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);
        let mut tasks = vec![
            tokio::spawn(announcer.run(shutdown_tx.subscribe())),
            tokio::spawn(listener.run(shutdown_tx.subscribe())),
        ];

        if let Some(ttl) = self.config.entry_ttl() {
            tracing::info!(ttl_ms = ttl.as_millis() as u64, "registry expiry enabled");
            tasks.push(tokio::spawn(listener::expiry_loop(
                self.registry.clone(),
                ttl,
                self.config.sweep_interval(),
                shutdown_tx.subscribe(),
            )));
        }

        Ok(DiscoveryHandle { shutdown_tx, tasks })
    }

    /// Endpoints currently known for `service_name`. Empty if never heard of.
    pub fn known_uris_of(&self, service_name: &str) -> Vec<Endpoint> {
        self.registry.known_uris_of(service_name)
    }

    /// The registry this engine fills, for freshness queries.
    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    pub fn announcement(&self) -> &Announcement {
        &self.announcement
    }
}

/// Running discovery tasks.
///
/// Dropping the handle detaches the tasks: they run until the process
/// exits. Only `shutdown` stops them.
pub struct DiscoveryHandle {
    shutdown_tx: tokio::sync::broadcast::Sender<()>,
    tasks: Vec<JoinHandle<()>>,
}

impl DiscoveryHandle {
    /// Stop every loop and wait for them to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "discovery task failed");
            }
        }
    }
}
