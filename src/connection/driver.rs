use std::collections::BTreeSet;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{Instant, sleep_until, timeout};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{self, Message, Utf8Bytes};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use super::correlator::{Correlator, DeadlinePolicy, PendingCommand};
use super::reconnect::{Loss, ReconnectDecision, ReconnectScheduler};
use super::state::{ConnectionState, ConnectionStats, StateChange};
use crate::codec;
use crate::config::{ConnectionOptions, GatewayIdentity};
use crate::dialects::{GatewayDialect, get_dialect};
use crate::error::{GatewayError, Result};
use crate::metrics::{METRICS, bump};
use crate::schema::{Direction, Expectation, InboundMessage, MessageKind, PushMessage, Request};
use crate::subscription::TopicRouter;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);
const EVENT_CAPACITY: usize = 64;

/// What a successful command produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// The correlated response (possibly an unvalidated pass-through).
    Message(InboundMessage),

    /// Fire-and-forget command written to the transport.
    Sent,

    /// Grace window elapsed without an error.
    Assumed,
}

/// Result of a subscribe or unsubscribe attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionOutcome {
    /// Topics the gateway is assumed to have accepted.
    Accepted(Vec<String>),

    /// The gateway answered with an error; it does not implement subscriptions.
    Unsupported(String),
}

pub(crate) enum Command {
    Connect {
        reply: oneshot::Sender<Result<()>>,
    },
    Authenticate {
        reply: oneshot::Sender<Result<()>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    Send {
        request: Request,
        reply: oneshot::Sender<Result<Reply>>,
    },
    Subscription {
        topics: Vec<String>,
        subscribe: bool,
        reply: oneshot::Sender<Result<SubscriptionOutcome>>,
    },
}

/// Continuation attached to a pending command.
enum Completion {
    Reply(oneshot::Sender<Result<Reply>>),

    /// `None` when the login is an automatic session resume.
    Login(Option<oneshot::Sender<Result<()>>>),

    Subscription {
        topics: Vec<String>,
        subscribe: bool,
        reply: Option<oneshot::Sender<Result<SubscriptionOutcome>>>,
    },
}

/// A transport open in flight.
struct Attempt {
    id: u64,
    recovery: bool,
    waiters: Vec<oneshot::Sender<Result<()>>>,
}

struct Opened {
    id: u64,
    result: Result<WsStream>,
}

/// Receiving ends handed to `GatewayConnection`.
pub(crate) struct DriverHandles {
    pub commands: mpsc::UnboundedSender<Command>,
    pub state: watch::Receiver<ConnectionState>,
    pub stats: watch::Receiver<ConnectionStats>,
    pub changes: broadcast::Sender<StateChange>,
    pub errors: broadcast::Sender<GatewayError>,
    pub router: Arc<Mutex<TopicRouter>>,
}

/// Starts the task that owns one gateway connection.
///
/// Everything that mutates the connection (caller commands, inbound
/// frames, transport-open results, timers) is handled sequentially by
/// this task. The task ends once every `GatewayConnection` clone is
/// dropped.
pub(crate) fn spawn(identity: GatewayIdentity, options: ConnectionOptions) -> DriverHandles {
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
    let (stats_tx, stats_rx) = watch::channel(ConnectionStats::default());
    let (changes, _) = broadcast::channel(EVENT_CAPACITY);
    let (errors, _) = broadcast::channel(EVENT_CAPACITY);
    let (opened_tx, opened_rx) = mpsc::unbounded_channel();
    let router = Arc::new(Mutex::new(TopicRouter::new()));

    let driver = Driver {
        dialect: get_dialect(identity.dialect),
        reconnect: ReconnectScheduler::new(&options),
        identity,
        options,
        commands: commands_rx,
        state_tx,
        stats_tx,
        changes: changes.clone(),
        errors: errors.clone(),
        router: router.clone(),
        opened_tx,
        opened_rx,
        attempt: None,
        attempt_seq: 0,
        sink: None,
        source: None,
        peer_close: None,
        correlator: Correlator::new(),
        active_topics: BTreeSet::new(),
        resume_session: false,
    };
    tokio::spawn(driver.run());

    DriverHandles {
        commands: commands_tx,
        state: state_rx,
        stats: stats_rx,
        changes,
        errors,
        router,
    }
}

struct Driver {
    identity: GatewayIdentity,
    options: ConnectionOptions,
    dialect: Arc<dyn GatewayDialect>,

    commands: mpsc::UnboundedReceiver<Command>,
    state_tx: watch::Sender<ConnectionState>,
    stats_tx: watch::Sender<ConnectionStats>,
    changes: broadcast::Sender<StateChange>,
    errors: broadcast::Sender<GatewayError>,
    router: Arc<Mutex<TopicRouter>>,

    opened_tx: mpsc::UnboundedSender<Opened>,
    opened_rx: mpsc::UnboundedReceiver<Opened>,
    attempt: Option<Attempt>,
    attempt_seq: u64,

    sink: Option<WsSink>,
    source: Option<WsSource>,
    /// Set when the gateway sent a close frame; `true` for a normal close.
    peer_close: Option<bool>,

    correlator: Correlator<Completion>,
    reconnect: ReconnectScheduler,

    /// Gateway-side subscriptions to restore after a reconnect.
    active_topics: BTreeSet<String>,
    /// Log in again after the next successful automatic reconnect.
    resume_session: bool,
}

impl Driver {
    async fn run(mut self) {
        loop {
            let deadline = self.next_deadline();
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                Some(opened) = self.opened_rx.recv() => self.on_opened(opened).await,
                frame = next_frame(self.source.as_mut()) => self.on_frame(frame).await,
                _ = sleep_until_opt(deadline) => self.on_timer().await,
            }
        }

        debug!("[{}] all handles dropped, stopping", self.identity.id);
        self.teardown(GatewayError::Disconnected).await;
    }

    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn next_deadline(&self) -> Option<Instant> {
        match (self.correlator.next_deadline(), self.reconnect.deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    // --------------------------------------------------------
    // State machine
    // --------------------------------------------------------

    fn transition(&mut self, next: ConnectionState) {
        let previous = self.state();
        if previous == next {
            return;
        }
        if !previous.can_transition_to(next) {
            warn!("[{}] unexpected transition {} -> {}", self.identity.id, previous, next);
        }
        debug!("[{}] {} -> {}", self.identity.id, previous, next);
        self.state_tx.send_replace(next);
        let _ = self.changes.send(StateChange {
            previous,
            current: next,
        });
    }

    /// Counts an error and publishes it, if anyone is listening.
    fn record_error(&mut self, err: GatewayError) {
        self.stats_tx.send_modify(|s| s.errors += 1);
        self.publish_error(err);
    }

    fn publish_error(&self, err: GatewayError) {
        if self.errors.receiver_count() > 0 {
            let _ = self.errors.send(err);
        }
    }

    // --------------------------------------------------------
    // Caller commands
    // --------------------------------------------------------

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect { reply } => {
                let state = self.state();
                if state == ConnectionState::Connecting {
                    if let Some(attempt) = self.attempt.as_mut() {
                        attempt.waiters.push(reply);
                        return;
                    }
                }
                if !state.can_connect() {
                    let _ = reply.send(Err(GatewayError::InvalidState {
                        operation: "connect",
                        state,
                    }));
                    return;
                }
                self.reconnect.cancel();
                self.resume_session = false;
                self.begin_connect(false, Some(reply));
            }

            Command::Authenticate { reply } => {
                let state = self.state();
                if state != ConnectionState::Connected {
                    let _ = reply.send(Err(GatewayError::InvalidState {
                        operation: "authenticate",
                        state,
                    }));
                    return;
                }
                self.start_login(Some(reply)).await;
            }

            Command::Disconnect { reply } => {
                info!("[{}] disconnecting", self.identity.id);
                self.teardown(GatewayError::Disconnected).await;
                self.active_topics.clear();
                self.transition(ConnectionState::Disconnected);
                let _ = reply.send(());
            }

            Command::Send { request, reply } => {
                if request.kind == MessageKind::Login {
                    let _ = reply.send(Err(GatewayError::InvalidState {
                        operation: "send a login request outside authenticate",
                        state: self.state(),
                    }));
                    return;
                }
                if self.sink.is_none() {
                    let _ = reply.send(Err(GatewayError::InvalidState {
                        operation: "send",
                        state: self.state(),
                    }));
                    return;
                }
                if let Err(e) = self.write(request.kind, request.data).await {
                    let _ = reply.send(Err(e));
                    return;
                }
                match request.expect {
                    Expectation::FireAndForget => {
                        let _ = reply.send(Ok(Reply::Sent));
                    }
                    Expectation::Response(expected) => {
                        self.correlator.register(
                            request.kind,
                            Some(expected),
                            request.timeout.unwrap_or(self.options.command_timeout()),
                            DeadlinePolicy::Reject,
                            Completion::Reply(reply),
                        );
                    }
                    Expectation::Grace => {
                        self.correlator.register(
                            request.kind,
                            None,
                            request.timeout.unwrap_or(self.options.subscription_grace()),
                            DeadlinePolicy::AssumeSuccess,
                            Completion::Reply(reply),
                        );
                    }
                }
            }

            Command::Subscription {
                topics,
                subscribe,
                reply,
            } => {
                if self.sink.is_none() {
                    let _ = reply.send(Err(GatewayError::InvalidState {
                        operation: if subscribe { "subscribe" } else { "unsubscribe" },
                        state: self.state(),
                    }));
                    return;
                }
                match self.send_subscription(topics, subscribe, Some(reply)).await {
                    Ok(()) => {}
                    Err((e, Some(reply))) => {
                        let _ = reply.send(Err(e));
                    }
                    Err((_, None)) => {}
                }
            }
        }
    }

    /// Writes a (un)subscribe request and arms its grace window.
    ///
    /// Hands the reply channel back on write failure.
    async fn send_subscription(
        &mut self,
        topics: Vec<String>,
        subscribe: bool,
        reply: Option<oneshot::Sender<Result<SubscriptionOutcome>>>,
    ) -> std::result::Result<(), (GatewayError, Option<oneshot::Sender<Result<SubscriptionOutcome>>>)>
    {
        let request = if subscribe {
            Request::subscribe(&topics)
        } else {
            Request::unsubscribe(&topics)
        };
        if let Err(e) = self.write(request.kind, request.data).await {
            return Err((e, reply));
        }
        self.correlator.register(
            request.kind,
            None,
            self.options.subscription_grace(),
            DeadlinePolicy::AssumeSuccess,
            Completion::Subscription {
                topics,
                subscribe,
                reply,
            },
        );
        Ok(())
    }

    // --------------------------------------------------------
    // Transport lifecycle
    // --------------------------------------------------------

    fn begin_connect(&mut self, recovery: bool, waiter: Option<oneshot::Sender<Result<()>>>) {
        self.attempt_seq += 1;
        let id = self.attempt_seq;
        self.attempt = Some(Attempt {
            id,
            recovery,
            waiters: waiter.into_iter().collect(),
        });
        self.transition(ConnectionState::Connecting);

        let url = self.identity.url.clone();
        let opened = self.opened_tx.clone();
        let limit = self.options.connect_timeout();
        debug!("[{}] opening {}", self.identity.id, url);

        tokio::spawn(async move {
            let result = match timeout(limit, connect_async(url.as_str())).await {
                Ok(Ok((ws, _response))) => Ok(ws),
                Ok(Err(e)) => Err(GatewayError::from(e)),
                Err(_) => Err(GatewayError::Transport(format!(
                    "connect timed out after {limit:?}"
                ))),
            };
            let _ = opened.send(Opened { id, result });
        });
    }

    async fn on_opened(&mut self, opened: Opened) {
        let current = matches!(&self.attempt, Some(a) if a.id == opened.id);
        if !current {
            if let Ok(mut ws) = opened.result {
                debug!("[{}] discarding superseded transport", self.identity.id);
                tokio::spawn(async move {
                    let _ = ws.close(None).await;
                });
            }
            return;
        }
        let Some(attempt) = self.attempt.take() else {
            return;
        };

        match opened.result {
            Ok(ws) => {
                let (sink, source) = ws.split();
                self.sink = Some(sink);
                self.source = Some(source);
                self.peer_close = None;
                self.reconnect.reset();
                self.stats_tx.send_modify(|s| {
                    s.connected_at = Some(Utc::now());
                    s.reconnect_attempts = 0;
                });
                METRICS.connections_active.fetch_add(1, Ordering::Relaxed);
                info!("[{}] connected to {}", self.identity.id, self.identity.url);

                self.transition(ConnectionState::Connected);
                for waiter in attempt.waiters {
                    let _ = waiter.send(Ok(()));
                }

                if attempt.recovery && self.resume_session {
                    info!("[{}] resuming session", self.identity.id);
                    self.start_login(None).await;
                }
            }
            Err(e) => {
                warn!("[{}] connect failed: {}", self.identity.id, e);
                bump(&METRICS.connect_failures);
                self.record_error(e.clone());
                self.transition(ConnectionState::Error);
                for waiter in attempt.waiters {
                    let _ = waiter.send(Err(e.clone()));
                }
                if attempt.recovery {
                    self.after_loss(Loss {
                        previous: ConnectionState::Connecting,
                        clean: false,
                        caller_initiated: false,
                        during_recovery: true,
                    });
                }
            }
        }
    }

    async fn on_frame(&mut self, frame: Option<std::result::Result<Message, tungstenite::Error>>) {
        match frame {
            Some(Ok(Message::Text(text))) => self.on_text(&text).await,
            Some(Ok(Message::Close(close))) => {
                let clean = close.as_ref().is_none_or(|f| f.code == CloseCode::Normal);
                debug!("[{}] close frame received ({:?})", self.identity.id, close);
                self.peer_close = Some(clean);
            }
            // ping/pong are answered by tungstenite; binary is not part of the protocol
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                let clean = self.peer_close.unwrap_or(false);
                self.on_transport_lost(clean, e.to_string()).await;
            }
            None => {
                let clean = self.peer_close.unwrap_or(false);
                self.on_transport_lost(clean, "stream ended".to_string()).await;
            }
        }
    }

    /// The gateway side went away (no caller involvement).
    async fn on_transport_lost(&mut self, clean: bool, reason: String) {
        let previous = self.state();
        self.sink = None;
        self.source = None;
        self.peer_close = None;
        METRICS.connections_active.fetch_sub(1, Ordering::Relaxed);
        self.abandon_pending(GatewayError::Transport(reason.clone()));

        if clean {
            info!("[{}] gateway closed the connection", self.identity.id);
            self.resume_session = false;
            self.transition(ConnectionState::Disconnected);
            return;
        }

        error!("[{}] transport lost: {}", self.identity.id, reason);
        // a session-resume login still counts as part of the recovery
        let resuming = previous == ConnectionState::Authenticating && self.resume_session;
        match previous {
            ConnectionState::Authenticated => self.resume_session = true,
            ConnectionState::Connected => self.resume_session = false,
            _ => {}
        }
        self.record_error(GatewayError::Transport(reason));
        self.transition(ConnectionState::Error);
        self.after_loss(Loss {
            previous,
            clean: false,
            caller_initiated: false,
            during_recovery: resuming,
        });
    }

    fn after_loss(&mut self, loss: Loss) {
        match self.reconnect.on_loss(loss) {
            ReconnectDecision::Skip => {}
            ReconnectDecision::Scheduled { attempt, at } => {
                warn!(
                    "[{}] reconnect attempt {}/{} in {:?}",
                    self.identity.id,
                    attempt,
                    self.options.max_reconnect_attempts,
                    at.saturating_duration_since(Instant::now())
                );
                bump(&METRICS.reconnects_scheduled);
                self.stats_tx.send_modify(|s| s.reconnect_attempts = attempt);
                self.transition(ConnectionState::Reconnecting);
            }
            ReconnectDecision::Exhausted => {
                error!(
                    "[{}] giving up after {} reconnect attempts",
                    self.identity.id, self.options.max_reconnect_attempts
                );
                self.resume_session = false;
                self.transition(ConnectionState::Closed);
            }
        }
    }

    /// Caller-side teardown: no reconnection follows.
    async fn teardown(&mut self, reason: GatewayError) {
        self.reconnect.cancel();
        self.resume_session = false;

        if let Some(attempt) = self.attempt.take() {
            for waiter in attempt.waiters {
                let _ = waiter.send(Err(GatewayError::Disconnected));
            }
        }

        self.source = None;
        self.peer_close = None;
        if let Some(mut sink) = self.sink.take() {
            METRICS.connections_active.fetch_sub(1, Ordering::Relaxed);
            let frame = CloseFrame {
                code: CloseCode::Normal,
                reason: Utf8Bytes::from_static("client disconnect"),
            };
            let _ = timeout(CLOSE_TIMEOUT, async {
                let _ = sink.send(Message::Close(Some(frame))).await;
                let _ = sink.close().await;
            })
            .await;
        }

        self.abandon_pending(reason);
    }

    async fn on_timer(&mut self) {
        let now = Instant::now();

        for entry in self.correlator.expire(now) {
            match entry.policy {
                DeadlinePolicy::AssumeSuccess => self.settle(entry, Ok(Reply::Assumed)).await,
                DeadlinePolicy::Reject => {
                    bump(&METRICS.command_timeouts);
                    let err = GatewayError::CommandTimeout {
                        command: self.dialect.tag(entry.command).to_string(),
                        after: entry.timeout,
                    };
                    warn!("[{}] {}", self.identity.id, err);
                    self.settle(entry, Err(err)).await;
                }
            }
        }

        if self.reconnect.take_due(now) {
            self.begin_connect(true, None);
        }
    }

    // --------------------------------------------------------
    // Authentication
    // --------------------------------------------------------

    async fn start_login(&mut self, reply: Option<oneshot::Sender<Result<()>>>) {
        self.transition(ConnectionState::Authenticating);
        let payload = self.dialect.login_payload(&self.identity);
        if let Err(e) = self.write(MessageKind::Login, payload).await {
            self.fail_login(GatewayError::Authentication(e.to_string()), reply)
                .await;
            return;
        }
        self.correlator.register(
            MessageKind::Login,
            Some(MessageKind::LoginResult),
            self.options.auth_timeout(),
            DeadlinePolicy::Reject,
            Completion::Login(reply),
        );
    }

    async fn finish_login(
        &mut self,
        outcome: Result<Reply>,
        reply: Option<oneshot::Sender<Result<()>>>,
    ) {
        let err = match outcome {
            Ok(Reply::Message(InboundMessage::LoginResult(result))) if result.success => {
                self.stats_tx
                    .send_modify(|s| s.authenticated_at = Some(Utc::now()));
                info!("[{}] authenticated", self.identity.id);
                self.transition(ConnectionState::Authenticated);
                let resuming = reply.is_none();
                if let Some(reply) = reply {
                    let _ = reply.send(Ok(()));
                }
                if resuming {
                    self.resume_session = false;
                    self.restore_subscriptions().await;
                }
                return;
            }
            Ok(Reply::Message(InboundMessage::LoginResult(result))) => GatewayError::Authentication(
                result.message.unwrap_or_else(|| "login rejected".to_string()),
            ),
            Ok(other) => GatewayError::Authentication(format!("malformed login reply: {other:?}")),
            Err(GatewayError::CommandTimeout { after, .. }) => {
                GatewayError::Authentication(format!("no login reply within {after:?}"))
            }
            Err(e) => GatewayError::Authentication(e.to_string()),
        };
        self.fail_login(err, reply).await;
    }

    /// A failed login always tears the transport down.
    async fn fail_login(&mut self, err: GatewayError, reply: Option<oneshot::Sender<Result<()>>>) {
        error!("[{}] {}", self.identity.id, err);
        bump(&METRICS.auth_failures);
        self.record_error(err.clone());
        self.transition(ConnectionState::Error);
        self.teardown(err.clone()).await;
        self.transition(ConnectionState::Disconnected);
        if let Some(reply) = reply {
            let _ = reply.send(Err(err));
        }
    }

    async fn restore_subscriptions(&mut self) {
        if self.active_topics.is_empty() {
            return;
        }
        let topics: Vec<String> = self.active_topics.iter().cloned().collect();
        debug!("[{}] restoring subscriptions {:?}", self.identity.id, topics);
        if let Err((e, _)) = self.send_subscription(topics, true, None).await {
            warn!("[{}] could not restore subscriptions: {}", self.identity.id, e);
        }
    }

    // --------------------------------------------------------
    // Outbound / inbound frames
    // --------------------------------------------------------

    async fn write(&mut self, kind: MessageKind, data: Value) -> Result<()> {
        let text = codec::encode(self.dialect.as_ref(), kind, data)?;
        let Some(sink) = self.sink.as_mut() else {
            return Err(GatewayError::Transport("transport not open".to_string()));
        };
        sink.send(Message::Text(text.into())).await?;

        debug!("[{}] >> {}", self.identity.id, self.dialect.tag(kind));
        bump(&METRICS.frames_sent);
        self.stats_tx.send_modify(|s| s.messages_sent += 1);
        Ok(())
    }

    async fn on_text(&mut self, text: &str) {
        bump(&METRICS.frames_received);
        self.stats_tx.send_modify(|s| {
            s.messages_received += 1;
            s.last_message_at = Some(Utc::now());
        });

        let decoded = match codec::decode(self.dialect.as_ref(), text) {
            Ok(decoded) => decoded,
            Err(e) => {
                bump(&METRICS.parse_errors);
                warn!("[{}] dropping unreadable frame: {}", self.identity.id, e);
                return;
            }
        };
        debug!("[{}] << {}", self.identity.id, decoded.tag);

        match decoded.kind {
            None => debug!("[{}] ignoring unknown type {}", self.identity.id, decoded.tag),
            Some(MessageKind::Error) => self.on_gateway_error(decoded.message).await,
            Some(kind) if kind.direction() == Direction::Push => self.route(decoded.message),
            Some(kind) => match self.correlator.resolve(kind) {
                Some(entry) => self.settle(entry, Ok(Reply::Message(decoded.message))).await,
                None => debug!("[{}] unsolicited {}", self.identity.id, decoded.tag),
            },
        }
    }

    /// Generic error frames reject the oldest pending entry for the
    /// command they name; otherwise they go to error listeners.
    async fn on_gateway_error(&mut self, message: InboundMessage) {
        bump(&METRICS.gateway_errors);
        let (attempt, text) = match message {
            InboundMessage::Error(payload) => (payload.attempt, payload.message),
            InboundMessage::Unvalidated { data, .. } => (
                data.get("Attempt")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                data.to_string(),
            ),
            other => (String::new(), format!("{other:?}")),
        };
        let err = GatewayError::Gateway {
            command: attempt.clone(),
            message: text,
        };

        let pending = self
            .dialect
            .kind(&attempt)
            .and_then(|command| self.correlator.take_for_command(command));
        match pending {
            Some(entry) => self.settle(entry, Err(err)).await,
            None => {
                warn!("[{}] {}", self.identity.id, err);
                self.record_error(err);
            }
        }
    }

    fn route(&self, message: InboundMessage) {
        let Some(topic) = message.topic() else {
            return;
        };
        bump(&METRICS.push_messages);

        let callbacks = self
            .router
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .matching(&topic);
        if callbacks.is_empty() {
            debug!("[{}] no listener for {}", self.identity.id, topic);
            return;
        }

        let push = PushMessage { topic, message };
        for callback in callbacks {
            callback(&push);
        }
    }

    // --------------------------------------------------------
    // Pending command completion
    // --------------------------------------------------------

    async fn settle(&mut self, entry: PendingCommand<Completion>, outcome: Result<Reply>) {
        match entry.completion {
            Completion::Reply(reply) => {
                let _ = reply.send(outcome);
            }
            Completion::Login(reply) => self.finish_login(outcome, reply).await,
            Completion::Subscription {
                topics,
                subscribe,
                reply,
            } => {
                let result = match outcome {
                    Ok(_) => {
                        for topic in &topics {
                            if subscribe {
                                self.active_topics.insert(topic.clone());
                            } else {
                                self.active_topics.remove(topic);
                            }
                        }
                        Ok(SubscriptionOutcome::Accepted(topics))
                    }
                    Err(GatewayError::Gateway { message, .. }) => {
                        warn!(
                            "[{}] gateway does not support subscriptions: {}",
                            self.identity.id, message
                        );
                        self.publish_error(GatewayError::SubscriptionUnsupported(message.clone()));
                        Ok(SubscriptionOutcome::Unsupported(message))
                    }
                    Err(e) => Err(e),
                };
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
        }
    }

    /// Fails every pending entry without touching the state machine.
    fn abandon_pending(&mut self, reason: GatewayError) {
        for entry in self.correlator.drain() {
            match entry.completion {
                Completion::Reply(reply) => {
                    let _ = reply.send(Err(reason.clone()));
                }
                Completion::Login(reply) => {
                    if let Some(reply) = reply {
                        let err = match &reason {
                            GatewayError::Authentication(_) => reason.clone(),
                            other => GatewayError::Authentication(other.to_string()),
                        };
                        let _ = reply.send(Err(err));
                    }
                }
                Completion::Subscription { reply, .. } => {
                    if let Some(reply) = reply {
                        let _ = reply.send(Err(reason.clone()));
                    }
                }
            }
        }
    }
}

async fn next_frame(
    source: Option<&mut WsSource>,
) -> Option<std::result::Result<Message, tungstenite::Error>> {
    match source {
        Some(source) => source.next().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
