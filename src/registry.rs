//! The registry of managed server instances.
//!
//! Holds every descriptor by name and drives the supervisor for them. The
//! host program is required to call [`Registry::stop_all`] on exit through
//! its own deferred-cleanup mechanism; no implicit runtime exit hook is
//! installed, since those are not portable across targets and complicate
//! testing.

use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::errors::{ManagerError, Result};
use crate::server::Server;
use crate::settings::ManagerSettings;
use crate::supervisor;

pub struct Registry {
    settings: ManagerSettings,
    servers: HashMap<String, Server>,
    cancel: CancellationToken,
}

impl Registry {
    pub fn new(settings: ManagerSettings) -> Self {
        Self {
            settings,
            servers: HashMap::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn settings(&self) -> &ManagerSettings {
        &self.settings
    }

    /// Register a descriptor. Names are unique within a registry.
    pub fn register(&mut self, server: Server) -> Result<()> {
        if self.servers.contains_key(&server.name) {
            return Err(ManagerError::DuplicateServer(server.name.clone()));
        }
        self.servers.insert(server.name.clone(), server);
        Ok(())
    }

    /// Stop managing a descriptor, returning it to the caller.
    pub fn remove(&mut self, name: &str) -> Result<Server> {
        self.servers
            .remove(name)
            .ok_or_else(|| ManagerError::ServerNotFound(name.to_string()))
    }

    pub fn get(&self, name: &str) -> Result<&Server> {
        self.servers
            .get(name)
            .ok_or_else(|| ManagerError::ServerNotFound(name.to_string()))
    }

    pub fn get_mut(&mut self, name: &str) -> Result<&mut Server> {
        self.servers
            .get_mut(name)
            .ok_or_else(|| ManagerError::ServerNotFound(name.to_string()))
    }

    pub fn servers(&self) -> impl Iterator<Item = &Server> {
        self.servers.values()
    }

    /// Start the named server and wait for it to become ready.
    pub async fn start(&mut self, name: &str) -> Result<()> {
        let settings = self.settings.clone();
        let cancel = self.cancel.clone();
        let server = self.get_mut(name)?;
        supervisor::start_server(server, &settings, &cancel).await
    }

    /// Stop the named server, gracefully when possible.
    pub async fn stop(&mut self, name: &str) -> Result<()> {
        let settings = self.settings.clone();
        let cancel = self.cancel.clone();
        let server = self.get_mut(name)?;
        supervisor::stop_server(server, &settings, &cancel).await
    }

    /// Force-stop every descriptor still running. Already-stopped
    /// descriptors are skipped and per-descriptor failures are logged and
    /// swallowed, so the cleanup always visits every instance. Calling this
    /// twice is harmless; the second pass finds nothing to do.
    pub async fn stop_all(&mut self) {
        let settings = self.settings.clone();
        let cancel = self.cancel.clone();
        for (name, server) in self.servers.iter_mut() {
            if server.is_stopped() {
                continue;
            }
            warn!("found server {} still running on cleanup; stopping it", name);
            if let Err(e) = supervisor::stop_server(server, &settings, &cancel).await {
                warn!("failed to stop server {} on cleanup: {}", name, e);
            }
        }
    }

    /// Trip the registry-wide cancellation signal, cutting every bounded
    /// wait short. Used to abandon a run without waiting out full timeouts.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}
