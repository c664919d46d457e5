use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{broadcast, mpsc, oneshot, watch};

use super::driver::{self, Command, Reply, SubscriptionOutcome};
use super::state::{ConnectionState, ConnectionStats, StateChange};
use crate::config::{ConnectionOptions, GatewayIdentity};
use crate::error::{GatewayError, Result};
use crate::schema::{
    BatteryReading, InboundMessage, MessageKind, PushMessage, Request, SensorMap,
    TemperatureReading, VibrationReading,
};
use crate::subscription::{DataCallback, ListenerId, TopicRouter};

/// Handle to one gateway connection.
///
/// Cloning is cheap; every clone talks to the same connection task. The
/// task stops (closing the transport) when the last clone is dropped.
#[derive(Clone)]
pub struct GatewayConnection {
    inner: Arc<Inner>,
}

struct Inner {
    gateway_id: String,
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    stats: watch::Receiver<ConnectionStats>,
    changes: broadcast::Sender<StateChange>,
    errors: broadcast::Sender<GatewayError>,
    router: Arc<Mutex<TopicRouter>>,
}

impl fmt::Debug for GatewayConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayConnection")
            .field("gateway_id", &self.inner.gateway_id)
            .field("state", &self.state())
            .finish()
    }
}

impl GatewayConnection {
    /// Creates a disconnected connection. Must be called inside a tokio runtime.
    pub fn new(identity: GatewayIdentity, options: ConnectionOptions) -> Self {
        let gateway_id = identity.id.clone();
        let handles = driver::spawn(identity, options);
        Self {
            inner: Arc::new(Inner {
                gateway_id,
                commands: handles.commands,
                state: handles.state,
                stats: handles.stats,
                changes: handles.changes,
                errors: handles.errors,
                router: handles.router,
            }),
        }
    }

    pub fn gateway_id(&self) -> &str {
        &self.inner.gateway_id
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn stats(&self) -> ConnectionStats {
        self.inner.stats.borrow().clone()
    }

    /// Latest-value view of the state.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.clone()
    }

    /// Every transition from now on, in order.
    pub fn state_changes(&self) -> broadcast::Receiver<StateChange> {
        self.inner.changes.subscribe()
    }

    /// Errors not delivered to a specific caller. Nothing is buffered
    /// while nobody listens.
    pub fn errors(&self) -> broadcast::Receiver<GatewayError> {
        self.inner.errors.subscribe()
    }

    /// Both handles drive the same connection.
    pub fn same_as(&self, other: &GatewayConnection) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    async fn call<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.inner
            .commands
            .send(make(tx))
            .map_err(|_| GatewayError::Disconnected)?;
        rx.await.map_err(|_| GatewayError::Disconnected)
    }

    // --------------------------------------------------------
    // Lifecycle
    // --------------------------------------------------------

    /// Opens the transport. Resolves once the state is `connected`.
    pub async fn connect(&self) -> Result<()> {
        self.call(|reply| Command::Connect { reply }).await?
    }

    /// Logs in with the identity's credentials. Requires `connected`.
    ///
    /// A rejected or unanswered login tears the transport down and leaves
    /// the connection `disconnected`.
    pub async fn authenticate(&self) -> Result<()> {
        self.call(|reply| Command::Authenticate { reply }).await?
    }

    /// Closes the transport, cancels any pending reconnect and rejects
    /// every pending command. Always ends in `disconnected`.
    pub async fn disconnect(&self) {
        let _ = self.call(|reply| Command::Disconnect { reply }).await;
    }

    /// Caller-driven reconnect: disconnect, connect, authenticate.
    pub async fn reconnect(&self) -> Result<()> {
        self.disconnect().await;
        self.connect().await?;
        self.authenticate().await
    }

    // --------------------------------------------------------
    // Commands
    // --------------------------------------------------------

    /// Sends one request and waits according to its expectation.
    pub async fn send_command(&self, request: Request) -> Result<Reply> {
        self.call(|reply| Command::Send { request, reply }).await?
    }

    /// Asks the gateway to push the given topics.
    ///
    /// Resolves after the grace window unless the gateway answers with an
    /// error first, in which case the outcome is `Unsupported`. An error
    /// arriving after the window is only visible through `errors()`.
    pub async fn subscribe<I, S>(&self, topics: I) -> Result<SubscriptionOutcome>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let topics = topics.into_iter().map(Into::into).collect();
        self.call(|reply| Command::Subscription {
            topics,
            subscribe: true,
            reply,
        })
        .await?
    }

    pub async fn unsubscribe<I, S>(&self, topics: I) -> Result<SubscriptionOutcome>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let topics = topics.into_iter().map(Into::into).collect();
        self.call(|reply| Command::Subscription {
            topics,
            subscribe: false,
            reply,
        })
        .await?
    }

    /// Registers a local listener for push topics matching `pattern`.
    pub fn on_data<F>(&self, pattern: &str, callback: F) -> Result<ListenerId>
    where
        F: Fn(&PushMessage) + Send + Sync + 'static,
    {
        let callback: DataCallback = Arc::new(callback);
        self.router().add(pattern, callback)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.router().remove(id)
    }

    /// Patterns that currently have at least one listener.
    pub fn listener_patterns(&self) -> Vec<String> {
        self.router().patterns()
    }

    fn router(&self) -> std::sync::MutexGuard<'_, TopicRouter> {
        self.inner.router.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // --------------------------------------------------------
    // Typed operations
    // --------------------------------------------------------

    /// Every sensor the gateway knows, keyed by serial.
    pub async fn get_sensors(&self) -> Result<SensorMap> {
        self.fetch(Request::get_sensors(), MessageKind::SensorList, |m| match m {
            InboundMessage::SensorList(sensors) => Ok(sensors),
            other => Err(other),
        })
        .await
    }

    /// Sensors currently connected, keyed by serial.
    pub async fn get_connected_sensors(&self) -> Result<SensorMap> {
        self.fetch(
            Request::get_connected_sensors(),
            MessageKind::SensorList,
            |m| match m {
                InboundMessage::SensorList(sensors) => Ok(sensors),
                other => Err(other),
            },
        )
        .await
    }

    /// Result arrives as `reading/started/<serial>` then `reading/vibration/<serial>` pushes.
    pub async fn trigger_reading(&self, serial: u64) -> Result<()> {
        self.send_command(Request::trigger_reading(serial)).await.map(|_| ())
    }

    pub async fn trigger_temperature_reading(&self, serial: u64) -> Result<()> {
        self.send_command(Request::trigger_temperature_reading(serial))
            .await
            .map(|_| ())
    }

    pub async fn trigger_battery_reading(&self, serial: u64) -> Result<()> {
        self.send_command(Request::trigger_battery_reading(serial))
            .await
            .map(|_| ())
    }

    pub async fn get_readings(&self, serial: u64, count: u32) -> Result<Vec<VibrationReading>> {
        self.fetch(
            Request::get_readings(serial, count),
            MessageKind::ReadingHistory,
            |m| match m {
                InboundMessage::ReadingHistory(readings) => Ok(readings),
                other => Err(other),
            },
        )
        .await
    }

    pub async fn get_temperature_readings(
        &self,
        serial: u64,
        count: u32,
    ) -> Result<Vec<TemperatureReading>> {
        self.fetch(
            Request::get_temperature_readings(serial, count),
            MessageKind::TemperatureHistory,
            |m| match m {
                InboundMessage::TemperatureHistory(readings) => Ok(readings),
                other => Err(other),
            },
        )
        .await
    }

    pub async fn get_battery_readings(&self, serial: u64, count: u32) -> Result<Vec<BatteryReading>> {
        self.fetch(
            Request::get_battery_readings(serial, count),
            MessageKind::BatteryHistory,
            |m| match m {
                InboundMessage::BatteryHistory(readings) => Ok(readings),
                other => Err(other),
            },
        )
        .await
    }

    async fn fetch<T>(
        &self,
        request: Request,
        expected: MessageKind,
        extract: impl FnOnce(InboundMessage) -> std::result::Result<T, InboundMessage>,
    ) -> Result<T> {
        match self.send_command(request).await? {
            Reply::Message(message) => extract(message).map_err(|other| unexpected(expected, &other)),
            other => Err(GatewayError::Validation {
                message_type: expected.to_string(),
                reason: format!("no response payload ({other:?})"),
            }),
        }
    }
}

/// A correlated reply that could not be typed (failed validation upstream).
fn unexpected(expected: MessageKind, message: &InboundMessage) -> GatewayError {
    let reason = match message {
        InboundMessage::Unvalidated { data, .. } => format!("payload did not validate: {data}"),
        other => format!("unexpected reply {other:?}"),
    };
    GatewayError::Validation {
        message_type: expected.to_string(),
        reason,
    }
}
