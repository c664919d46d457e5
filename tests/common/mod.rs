#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{Message, Utf8Bytes};

use gateway_connector::config::{ConnectionOptions, GatewayIdentity};
use gateway_connector::dialects::DialectKind;

pub const USERNAME: &str = "ops@example.com";
pub const PASSWORD: &str = "correct-horse";

/// How the mock answers.
#[derive(Clone)]
pub struct Behavior {
    /// `RTN_DYN` payload (object keyed by serial, or an array).
    pub sensors: Value,

    /// Answer `POST_SUB_CHANGES` with `RTN_ERR`.
    pub reject_subscriptions: bool,

    /// Never answer history requests.
    pub silent_history: bool,

    /// Answer history requests with `RTN_ERR`.
    pub failing_history: bool,

    /// Never answer `POST_LOGIN`.
    pub silent_login: bool,

    /// Kill the session on the n-th `POST_LOGIN` (1-based, counted across sessions).
    pub drop_on_login: Option<usize>,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            sensors: json!({
                "1001": sensor(1001, true),
                "1002": sensor(1002, true),
            }),
            reject_subscriptions: false,
            silent_history: false,
            failing_history: false,
            silent_login: false,
            drop_on_login: None,
        }
    }
}

pub fn sensor(serial: u64, connected: bool) -> Value {
    json!({
        "Serial": serial,
        "Connected": if connected { 1 } else { 0 },
        "PartNum": "VS-200",
        "ReadRate": 600,
        "Samples": 1600,
    })
}

fn frame(tag: &str, data: Value) -> String {
    json!({ "Type": tag, "From": "SERV", "To": "UI", "Data": data }).to_string()
}

/// Minimal classic-dialect gateway on 127.0.0.1.
pub struct MockGateway {
    pub url: String,
    connections: Arc<AtomicUsize>,
    logins: Arc<AtomicUsize>,
    received: Arc<Mutex<Vec<String>>>,
    pushes: broadcast::Sender<Message>,
    sessions: Arc<Mutex<Vec<JoinHandle<()>>>>,
    accept: JoinHandle<()>,
}

impl MockGateway {
    pub async fn start(behavior: Behavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());

        let connections = Arc::new(AtomicUsize::new(0));
        let logins = Arc::new(AtomicUsize::new(0));
        let received = Arc::new(Mutex::new(Vec::new()));
        let sessions = Arc::new(Mutex::new(Vec::new()));
        let (pushes, _) = broadcast::channel(16);

        let accept = {
            let connections = connections.clone();
            let logins = logins.clone();
            let received = received.clone();
            let sessions = sessions.clone();
            let pushes = pushes.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    connections.fetch_add(1, Ordering::SeqCst);
                    let task = tokio::spawn(session(
                        stream,
                        behavior.clone(),
                        logins.clone(),
                        received.clone(),
                        pushes.subscribe(),
                    ));
                    sessions.lock().unwrap().push(task);
                }
            })
        };

        Self {
            url,
            connections,
            logins,
            received,
            pushes,
            sessions,
            accept,
        }
    }

    pub fn identity(&self, id: &str) -> GatewayIdentity {
        self.identity_with_password(id, PASSWORD)
    }

    pub fn identity_with_password(&self, id: &str, password: &str) -> GatewayIdentity {
        GatewayIdentity {
            id: id.to_string(),
            url: self.url.clone(),
            username: USERNAME.to_string(),
            password: password.to_string(),
            serial_number: "GW-TEST".to_string(),
            dialect: DialectKind::Classic,
        }
    }

    /// Accepted TCP connections so far.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// `POST_LOGIN` frames seen so far, across sessions.
    pub fn logins(&self) -> usize {
        self.logins.load(Ordering::SeqCst)
    }

    /// Wire tags received from clients, in order.
    pub fn received(&self) -> Vec<String> {
        self.received.lock().unwrap().clone()
    }

    /// Sends a push frame to every open session.
    pub fn push(&self, tag: &str, data: Value) {
        let _ = self.pushes.send(Message::Text(frame(tag, data).into()));
    }

    /// Starts a normal closing handshake on every open session.
    pub fn close_sessions(&self) {
        let _ = self.pushes.send(Message::Close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: Utf8Bytes::from_static("maintenance"),
        })));
    }

    /// Kills open sessions without a closing handshake; keeps listening.
    pub fn drop_sessions(&self) {
        for task in self.sessions.lock().unwrap().drain(..) {
            task.abort();
        }
    }

    /// Stops listening and kills every session. Later connects are refused.
    pub fn shutdown(&self) {
        self.accept.abort();
        self.drop_sessions();
    }
}

impl Drop for MockGateway {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn session(
    stream: TcpStream,
    behavior: Behavior,
    logins: Arc<AtomicUsize>,
    received: Arc<Mutex<Vec<String>>>,
    mut pushes: broadcast::Receiver<Message>,
) {
    let Ok(mut ws) = accept_async(stream).await else {
        return;
    };

    loop {
        tokio::select! {
            inbound = ws.next() => {
                let Some(Ok(message)) = inbound else { return };
                let Message::Text(text) = message else { continue };
                let request: Value = serde_json::from_str(&text).unwrap();
                let tag = request["Type"].as_str().unwrap_or_default().to_string();
                received.lock().unwrap().push(tag.clone());

                if tag == "POST_LOGIN" {
                    let login = logins.fetch_add(1, Ordering::SeqCst) + 1;
                    if behavior.drop_on_login == Some(login) {
                        return;
                    }
                }

                for reply in respond(&tag, &request["Data"], &behavior) {
                    if ws.send(Message::Text(reply.into())).await.is_err() {
                        return;
                    }
                }
            }
            Ok(push) = pushes.recv() => {
                if ws.send(push).await.is_err() {
                    return;
                }
            }
        }
    }
}

fn respond(tag: &str, data: &Value, behavior: &Behavior) -> Vec<String> {
    let serial = data["Serial"].as_u64().unwrap_or_default();
    match tag {
        "POST_LOGIN" if behavior.silent_login => vec![],
        "POST_LOGIN" => {
            let ok = data["Email"] == USERNAME && data["Password"] == PASSWORD;
            let message = if ok { "Welcome" } else { "Invalid credentials" };
            vec![frame("RTN_LOGIN", json!({ "Success": ok, "Message": message }))]
        }
        "GET_DYN" | "GET_DYN_CONNECTED" => vec![frame("RTN_DYN", behavior.sensors.clone())],
        "POST_SUB_CHANGES" if behavior.reject_subscriptions => vec![frame(
            "RTN_ERR",
            json!({ "Attempt": "POST_SUB_CHANGES", "Error": "Unknown message type" }),
        )],
        "TAKE_DYN_READING" => vec![
            frame("NOT_DYN_READING_STARTED", json!({ "Serial": serial })),
            frame(
                "NOT_DYN_READING",
                json!({
                    "Serial": serial,
                    "Time": "2024-03-01 12:00:00",
                    "X": 0.12, "Y": 0.34, "Z": 0.56,
                }),
            ),
        ],
        "TAKE_DYN_TEMP" => vec![frame(
            "NOT_DYN_TEMP",
            json!({ "Serial": serial, "Time": "2024-03-01 12:00:00", "Temp": 21.5 }),
        )],
        "GET_DYN_READINGS" if behavior.silent_history => vec![],
        "GET_DYN_READINGS" if behavior.failing_history => vec![frame(
            "RTN_ERR",
            json!({ "Attempt": "GET_DYN_READINGS", "Error": "Sensor not found" }),
        )],
        "GET_DYN_READINGS" => {
            let count = data["Count"].as_u64().unwrap_or(1);
            let readings: Vec<Value> = (0..count)
                .map(|i| {
                    json!({
                        "Serial": serial,
                        "Time": 1_709_294_400 + i * 60,
                        "X": 0.1, "Y": 0.2, "Z": 0.3,
                    })
                })
                .collect();
            vec![frame("RTN_DYN_READINGS", json!(readings))]
        }
        _ => vec![],
    }
}

/// Connection options with short timers for tests.
pub fn fast_options() -> ConnectionOptions {
    ConnectionOptions {
        reconnect_interval_ms: 50,
        max_reconnect_attempts: 3,
        connect_timeout_ms: 2_000,
        command_timeout_ms: 300,
        auth_timeout_ms: 1_000,
        subscription_grace_ms: 200,
        ..ConnectionOptions::default()
    }
}

/// Waits until `check` holds, polling every 10ms.
pub async fn eventually<F: Fn() -> bool>(within: Duration, check: F) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
