//! Multi-gateway registry.
//!
//! Keeps at most one live connection per gateway identifier and exposes
//! the typed operations keyed by that identifier. Credentials are looked
//! up on demand through a `CredentialProvider`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use log::{debug, error, info, warn};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::config::{ConnectionOptions, GatewayIdentity};
use crate::connection::{
    ConnectionState, GatewayConnection, StateChange, SubscriptionOutcome,
};
use crate::error::{GatewayError, Result};
use crate::schema::{
    BatteryReading, PushMessage, SensorMap, TemperatureReading, VibrationReading,
};
use crate::subscription::ListenerId;

const EVENT_CAPACITY: usize = 256;

/// Source of gateway credentials (configuration file, equipment database...).
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn credentials(&self, gateway_id: &str) -> Result<GatewayIdentity>;
}

/// Cheaply cloneable; clones share the same connections.
#[derive(Clone)]
pub struct GatewayRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    provider: Arc<dyn CredentialProvider>,
    options: ConnectionOptions,
    connections: Mutex<HashMap<String, GatewayConnection>>,
    /// Connections still opening or logging in. Locked after `connections`.
    opening: Mutex<HashMap<String, GatewayConnection>>,
    /// Serializes `connect` per gateway so concurrent callers share one connection.
    /// Idle entries are dropped on `disconnect`.
    connect_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    changes: broadcast::Sender<(String, StateChange)>,
}

/// Keeps a state-change listener alive. Dropping it also unregisters.
pub struct StateListener {
    task: JoinHandle<()>,
}

impl StateListener {
    pub fn dispose(self) {
        self.task.abort();
    }
}

impl Drop for StateListener {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl GatewayRegistry {
    pub fn new(provider: Arc<dyn CredentialProvider>, options: ConnectionOptions) -> Self {
        let (changes, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(RegistryInner {
                provider,
                options,
                connections: Mutex::new(HashMap::new()),
                opening: Mutex::new(HashMap::new()),
                connect_locks: Mutex::new(HashMap::new()),
                changes,
            }),
        }
    }

    fn connections(&self) -> std::sync::MutexGuard<'_, HashMap<String, GatewayConnection>> {
        self.inner
            .connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn opening(&self) -> std::sync::MutexGuard<'_, HashMap<String, GatewayConnection>> {
        self.inner
            .opening
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn connect_locks(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<String, Arc<tokio::sync::Mutex<()>>>> {
        self.inner
            .connect_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn connect_lock(&self, gateway_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.connect_locks()
            .entry(gateway_id.to_string())
            .or_default()
            .clone()
    }

    /// Forgets connect locks nobody is waiting on.
    fn prune_connect_locks(&self) {
        self.connect_locks()
            .retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    /// Returns an authenticated connection to `gateway_id`.
    ///
    /// An existing connection in `connected` or `authenticated` is returned
    /// as-is. A connection in any other state is discarded and replaced. A
    /// connection that fails to connect or authenticate is never stored,
    /// and neither is one cancelled by `disconnect` while it was opening.
    pub async fn connect(&self, gateway_id: &str) -> Result<GatewayConnection> {
        let lock = self.connect_lock(gateway_id);
        let _guard = lock.lock().await;

        let existing = self.get_connection(gateway_id);
        if let Some(existing) = existing {
            let state = existing.state();
            if state.is_live() {
                debug!("[{}] reusing {} connection", gateway_id, state);
                return Ok(existing);
            }
            info!("[{}] replacing connection in state {}", gateway_id, state);
            self.connections().remove(gateway_id);
            existing.disconnect().await;
        }

        let identity = self.inner.provider.credentials(gateway_id).await?;
        let connection = GatewayConnection::new(identity, self.inner.options.clone());
        let forwarder = self.forward_changes(&connection);
        self.opening()
            .insert(gateway_id.to_string(), connection.clone());

        let opened = async {
            connection.connect().await?;
            connection.authenticate().await
        }
        .await;

        let stored = {
            let mut connections = self.connections();
            let mut opening = self.opening();
            let ours = opening
                .get(gateway_id)
                .is_some_and(|c| c.same_as(&connection));
            if ours {
                opening.remove(gateway_id);
            }
            match opened {
                Ok(()) if ours => {
                    connections.insert(gateway_id.to_string(), connection.clone());
                    Ok(())
                }
                _ if !ours => Err(GatewayError::Disconnected),
                other => other,
            }
        };

        if let Err(e) = stored {
            error!("[{}] connect failed: {}", gateway_id, e);
            connection.disconnect().await;
            forwarder.abort();
            return Err(e);
        }

        info!("[{}] ready", gateway_id);
        Ok(connection)
    }

    /// Re-publishes a connection's transitions under its gateway id.
    ///
    /// The task ends on its own once the connection task stops.
    fn forward_changes(&self, connection: &GatewayConnection) -> JoinHandle<()> {
        let mut rx = connection.state_changes();
        let tx = self.inner.changes.clone();
        let gateway_id = connection.gateway_id().to_string();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(change) => {
                        let _ = tx.send((gateway_id.clone(), change));
                    }
                    Err(RecvError::Lagged(n)) => {
                        warn!("[{}] state forwarder lagged by {} events", gateway_id, n);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    /// Disconnects and forgets `gateway_id`, including a connection that is
    /// still opening; its `connect` call then fails. Unknown ids are ignored.
    pub async fn disconnect(&self, gateway_id: &str) {
        let removed: Vec<GatewayConnection> = {
            let mut connections = self.connections();
            let mut opening = self.opening();
            connections
                .remove(gateway_id)
                .into_iter()
                .chain(opening.remove(gateway_id))
                .collect()
        };
        for connection in removed {
            connection.disconnect().await;
        }
        self.prune_connect_locks();
    }

    pub async fn disconnect_all(&self) {
        let all: Vec<GatewayConnection> = {
            let mut connections = self.connections();
            let mut opening = self.opening();
            connections
                .drain()
                .chain(opening.drain())
                .map(|(_, c)| c)
                .collect()
        };
        for connection in all {
            connection.disconnect().await;
        }
        self.prune_connect_locks();
    }

    pub fn get_connection(&self, gateway_id: &str) -> Option<GatewayConnection> {
        self.connections().get(gateway_id).cloned()
    }

    pub fn get_all_connections(&self) -> HashMap<String, GatewayConnection> {
        self.connections().clone()
    }

    /// Calls `callback` with the current state right away if a connection
    /// exists, then on every transition of `gateway_id`, including
    /// connections created later.
    pub fn on_connection_state_change<F>(&self, gateway_id: &str, callback: F) -> StateListener
    where
        F: Fn(ConnectionState) + Send + Sync + 'static,
    {
        let mut rx = self.inner.changes.subscribe();
        if let Some(connection) = self.get_connection(gateway_id) {
            callback(connection.state());
        }

        let gateway_id = gateway_id.to_string();
        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok((id, change)) if id == gateway_id => callback(change.current),
                    Ok(_) => {}
                    Err(RecvError::Lagged(n)) => {
                        warn!("[{}] state listener lagged by {} events", gateway_id, n);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
        StateListener { task }
    }

    fn require(&self, gateway_id: &str) -> Result<GatewayConnection> {
        self.get_connection(gateway_id)
            .ok_or_else(|| GatewayError::NotConnected(gateway_id.to_string()))
    }

    // --------------------------------------------------------
    // Operations keyed by gateway id
    // --------------------------------------------------------

    pub async fn get_sensors(&self, gateway_id: &str) -> Result<SensorMap> {
        self.require(gateway_id)?.get_sensors().await
    }

    pub async fn get_connected_sensors(&self, gateway_id: &str) -> Result<SensorMap> {
        self.require(gateway_id)?.get_connected_sensors().await
    }

    pub async fn trigger_reading(&self, gateway_id: &str, serial: u64) -> Result<()> {
        self.require(gateway_id)?.trigger_reading(serial).await
    }

    pub async fn trigger_temperature_reading(&self, gateway_id: &str, serial: u64) -> Result<()> {
        self.require(gateway_id)?
            .trigger_temperature_reading(serial)
            .await
    }

    pub async fn trigger_battery_reading(&self, gateway_id: &str, serial: u64) -> Result<()> {
        self.require(gateway_id)?.trigger_battery_reading(serial).await
    }

    pub async fn get_readings(
        &self,
        gateway_id: &str,
        serial: u64,
        count: u32,
    ) -> Result<Vec<VibrationReading>> {
        self.require(gateway_id)?.get_readings(serial, count).await
    }

    pub async fn get_temperature_readings(
        &self,
        gateway_id: &str,
        serial: u64,
        count: u32,
    ) -> Result<Vec<TemperatureReading>> {
        self.require(gateway_id)?
            .get_temperature_readings(serial, count)
            .await
    }

    pub async fn get_battery_readings(
        &self,
        gateway_id: &str,
        serial: u64,
        count: u32,
    ) -> Result<Vec<BatteryReading>> {
        self.require(gateway_id)?
            .get_battery_readings(serial, count)
            .await
    }

    pub async fn subscribe(&self, gateway_id: &str, topics: &[&str]) -> Result<SubscriptionOutcome> {
        self.require(gateway_id)?
            .subscribe(topics.iter().copied())
            .await
    }

    pub async fn unsubscribe(&self, gateway_id: &str, topics: &[&str]) -> Result<SubscriptionOutcome> {
        self.require(gateway_id)?
            .unsubscribe(topics.iter().copied())
            .await
    }

    pub fn on_data<F>(&self, gateway_id: &str, pattern: &str, callback: F) -> Result<ListenerId>
    where
        F: Fn(&PushMessage) + Send + Sync + 'static,
    {
        self.require(gateway_id)?.on_data(pattern, callback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialects::DialectKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Missing;

    #[async_trait]
    impl CredentialProvider for Missing {
        async fn credentials(&self, gateway_id: &str) -> Result<GatewayIdentity> {
            Err(GatewayError::Credentials(gateway_id.to_string()))
        }
    }

    struct Unreachable;

    #[async_trait]
    impl CredentialProvider for Unreachable {
        async fn credentials(&self, gateway_id: &str) -> Result<GatewayIdentity> {
            Ok(GatewayIdentity {
                id: gateway_id.to_string(),
                // port 9 on loopback: nothing listens, connect is refused
                url: "ws://127.0.0.1:9".to_string(),
                username: "user".to_string(),
                password: "pass".to_string(),
                serial_number: String::new(),
                dialect: DialectKind::Classic,
            })
        }
    }

    #[tokio::test]
    async fn test_operations_on_unknown_gateway_fail_not_connected() {
        let registry = GatewayRegistry::new(Arc::new(Missing), ConnectionOptions::default());
        let err = registry.get_sensors("nowhere").await.unwrap_err();
        assert_eq!(err, GatewayError::NotConnected("nowhere".to_string()));
        assert!(registry.trigger_reading("nowhere", 1).await.is_err());
        assert!(registry.on_data("nowhere", "*", |_| {}).is_err());
    }

    #[tokio::test]
    async fn test_missing_credentials_are_reported() {
        let registry = GatewayRegistry::new(Arc::new(Missing), ConnectionOptions::default());
        let err = registry.connect("plant-z").await.unwrap_err();
        assert_eq!(err, GatewayError::Credentials("plant-z".to_string()));
        assert!(registry.get_all_connections().is_empty());
    }

    #[tokio::test]
    async fn test_failed_connect_is_not_stored() {
        let options = ConnectionOptions {
            connect_timeout_ms: 2_000,
            ..ConnectionOptions::default()
        };
        let registry = GatewayRegistry::new(Arc::new(Unreachable), options);
        assert!(registry.connect("plant-a").await.is_err());
        assert!(registry.get_connection("plant-a").is_none());
    }

    #[tokio::test]
    async fn test_state_listener_is_silent_without_connection() {
        let registry = GatewayRegistry::new(Arc::new(Missing), ConnectionOptions::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let listener = registry.on_connection_state_change("plant-a", move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        listener.dispose();
    }

    #[tokio::test]
    async fn test_disconnect_prunes_connect_locks() {
        let registry = GatewayRegistry::new(Arc::new(Unreachable), ConnectionOptions::default());
        assert!(registry.connect("plant-a").await.is_err());
        assert!(registry.connect("plant-b").await.is_err());
        assert_eq!(registry.connect_locks().len(), 2);

        registry.disconnect("plant-a").await;
        assert!(!registry.connect_locks().contains_key("plant-a"));

        registry.disconnect_all().await;
        assert!(registry.connect_locks().is_empty());
        assert!(registry.opening().is_empty());
    }
}
