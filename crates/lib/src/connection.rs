//! Connection state machine over the gateway health check.
//!
//! `disconnected → connecting → connected | error`. Every config mutation drops back to
//! `disconnected`; the gateway is only considered reachable again after the next check.

use crate::config::{is_valid, ConfigError, ConfigStore, GatewayConfig, PartialConfig};
use crate::error::ServiceError;
use crate::fallback;
use crate::gateway::{GatewayClient, HealthStatus};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Observable connection state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    pub error: Option<String>,
    /// Latency of the last completed check.
    pub latency_ms: Option<u64>,
}

pub struct ConnectionManager {
    client: Arc<GatewayClient>,
    store: ConfigStore,
    state: watch::Sender<ConnectionState>,
    /// Bumped on every config mutation; checks started under an older revision are discarded.
    revision: watch::Sender<u64>,
}

impl ConnectionManager {
    /// Load the stored config into `client` and start `disconnected`.
    pub fn new(client: Arc<GatewayClient>, store: ConfigStore) -> Self {
        client.update_config(store.load());
        Self {
            client,
            store,
            state: watch::channel(ConnectionState::default()).0,
            revision: watch::channel(0).0,
        }
    }

    pub fn client(&self) -> &Arc<GatewayClient> {
        &self.client
    }

    pub fn config(&self) -> GatewayConfig {
        self.client.config()
    }

    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.state.borrow().status
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Connected, enabled, and pointed at a valid URL.
    pub fn is_available(&self) -> bool {
        let config = self.client.config();
        self.status() == ConnectionStatus::Connected && config.enabled && is_valid(&config)
    }

    /// Run one health check and move to `connected` or `error`.
    pub async fn check_connection(&self) -> HealthStatus {
        let revision = *self.revision.borrow();
        self.state.send_modify(|s| {
            s.status = ConnectionStatus::Connecting;
            s.error = None;
        });
        let health = self.client.health_check().await;
        if *self.revision.borrow() != revision {
            log::debug!("connection: config changed during check, discarding result");
            return health;
        }
        self.state.send_modify(|s| {
            s.latency_ms = Some(health.latency_ms);
            if health.ok {
                s.status = ConnectionStatus::Connected;
                s.error = None;
            } else {
                s.status = ConnectionStatus::Error;
                s.error = health.error.clone();
            }
        });
        match &health.error {
            None => log::info!("connection: gateway connected ({}ms)", health.latency_ms),
            Some(e) => log::info!("connection: gateway check failed: {}", e),
        }
        health
    }

    /// Persist `partial`, push the merged config to the client, and reset to `disconnected`.
    pub fn update_config(&self, partial: &PartialConfig) -> Result<GatewayConfig, ConfigError> {
        let config = self.store.save(partial)?;
        self.apply(config.clone());
        Ok(config)
    }

    /// Remove the stored config and fall back to defaults.
    pub fn clear_config(&self) -> Result<GatewayConfig, ConfigError> {
        self.store.clear()?;
        let config = self.store.load();
        self.apply(config.clone());
        Ok(config)
    }

    fn apply(&self, config: GatewayConfig) {
        self.client.update_config(config);
        self.revision.send_modify(|r| *r += 1);
        self.state.send_replace(ConnectionState::default());
    }

    /// Run `primary` only when the gateway is available; degrade to `fallback` otherwise.
    pub async fn attempt<T, P, F>(&self, primary: P, fallback: F) -> T
    where
        P: Future<Output = Result<T, ServiceError>>,
        F: FnOnce() -> T,
    {
        fallback::attempt_when(self.is_available(), primary, fallback).await
    }

    /// Check now, again on every config change, and every `interval`.
    pub fn spawn_monitor(self: &Arc<Self>, interval: Duration) -> MonitorHandle {
        let manager = self.clone();
        let mut revision = self.revision.subscribe();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    changed = revision.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        ticker.reset();
                    }
                }
                manager.check_connection().await;
            }
        });
        MonitorHandle { task }
    }
}

/// Stops the health monitor when stopped or dropped.
pub struct MonitorHandle {
    task: JoinHandle<()>,
}

impl MonitorHandle {
    /// Cancel the monitor task. A check already in flight is dropped with it.
    pub fn stop(self) {
        self.task.abort();
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
