mod common;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpListener;

use common::{Behavior, MockGateway, eventually, fast_options};
use gateway_connector::config::GatewayIdentity;
use gateway_connector::connection::ConnectionState;
use gateway_connector::error::{ErrorKind, GatewayError};
use gateway_connector::registry::{CredentialProvider, GatewayRegistry};

struct StaticCredentials(HashMap<String, GatewayIdentity>);

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn credentials(&self, gateway_id: &str) -> Result<GatewayIdentity, GatewayError> {
        self.0
            .get(gateway_id)
            .cloned()
            .ok_or_else(|| GatewayError::Credentials(gateway_id.to_string()))
    }
}

fn registry_for(identities: Vec<GatewayIdentity>) -> GatewayRegistry {
    let map = identities.into_iter().map(|i| (i.id.clone(), i)).collect();
    GatewayRegistry::new(Arc::new(StaticCredentials(map)), fast_options())
}

#[tokio::test]
async fn test_connect_is_idempotent() {
    let gateway = MockGateway::start(Behavior::default()).await;
    let registry = registry_for(vec![gateway.identity("plant-a")]);

    let (first, second) = tokio::join!(registry.connect("plant-a"), registry.connect("plant-a"));
    let first = first.unwrap();
    let second = second.unwrap();
    assert!(first.same_as(&second));
    assert_eq!(first.state(), ConnectionState::Authenticated);

    let third = registry.connect("plant-a").await.unwrap();
    assert!(third.same_as(&first));
    assert_eq!(gateway.connections(), 1);
    assert_eq!(registry.get_all_connections().len(), 1);
}

#[tokio::test]
async fn test_failed_login_is_not_stored() {
    let gateway = MockGateway::start(Behavior::default()).await;
    let registry = registry_for(vec![gateway.identity_with_password("plant-a", "nope")]);

    let err = registry.connect("plant-a").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authentication);
    assert!(registry.get_connection("plant-a").is_none());

    let err = registry.get_connected_sensors("plant-a").await.unwrap_err();
    assert_eq!(err, GatewayError::NotConnected("plant-a".to_string()));
}

#[tokio::test]
async fn test_operations_by_gateway_id() {
    let gateway = MockGateway::start(Behavior::default()).await;
    let registry = registry_for(vec![gateway.identity("plant-a")]);
    registry.connect("plant-a").await.unwrap();

    let sensors = registry.get_connected_sensors("plant-a").await.unwrap();
    assert_eq!(sensors.len(), 2);

    let topics = Arc::new(Mutex::new(Vec::new()));
    let sink = topics.clone();
    registry
        .on_data("plant-a", "reading/vibration/*", move |push| {
            sink.lock().unwrap().push(push.topic.clone())
        })
        .unwrap();
    registry.trigger_reading("plant-a", 1002).await.unwrap();
    assert!(eventually(Duration::from_secs(2), || topics.lock().unwrap().len() == 1).await);
    assert_eq!(topics.lock().unwrap()[0], "reading/vibration/1002");

    let readings = registry.get_readings("plant-a", 1002, 4).await.unwrap();
    assert_eq!(readings.len(), 4);
}

#[tokio::test]
async fn test_disconnect_then_connect_creates_new_connection() {
    let gateway = MockGateway::start(Behavior::default()).await;
    let registry = registry_for(vec![gateway.identity("plant-a")]);

    let first = registry.connect("plant-a").await.unwrap();
    registry.disconnect("plant-a").await;
    assert_eq!(first.state(), ConnectionState::Disconnected);
    assert!(registry.get_connection("plant-a").is_none());

    let second = registry.connect("plant-a").await.unwrap();
    assert!(!second.same_as(&first));
    assert_eq!(gateway.connections(), 2);

    // unknown ids are ignored
    registry.disconnect("plant-z").await;
}

#[tokio::test]
async fn test_dead_connection_is_replaced() {
    let gateway = MockGateway::start(Behavior::default()).await;
    let registry = registry_for(vec![gateway.identity("plant-a")]);

    let first = registry.connect("plant-a").await.unwrap();
    first.disconnect().await;

    let second = registry.connect("plant-a").await.unwrap();
    assert!(!second.same_as(&first));
    assert_eq!(second.state(), ConnectionState::Authenticated);
    assert!(registry.get_connection("plant-a").unwrap().same_as(&second));
}

#[tokio::test]
async fn test_state_listener_follows_later_connections() {
    let gateway = MockGateway::start(Behavior::default()).await;
    let registry = registry_for(vec![gateway.identity("plant-a")]);

    let states = Arc::new(Mutex::new(Vec::new()));
    let sink = states.clone();
    let listener = registry.on_connection_state_change("plant-a", move |state| {
        sink.lock().unwrap().push(state)
    });
    // nothing to report before the first connection exists
    assert!(states.lock().unwrap().is_empty());

    registry.connect("plant-a").await.unwrap();
    assert!(
        eventually(Duration::from_secs(1), || {
            states.lock().unwrap().last() == Some(&ConnectionState::Authenticated)
        })
        .await
    );
    assert_eq!(
        *states.lock().unwrap(),
        vec![
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Authenticating,
            ConnectionState::Authenticated,
        ]
    );

    listener.dispose();
    let before = states.lock().unwrap().len();
    registry.disconnect("plant-a").await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(states.lock().unwrap().len(), before);
}

#[tokio::test]
async fn test_state_listener_reports_current_state_of_existing_connection() {
    let gateway = MockGateway::start(Behavior::default()).await;
    let registry = registry_for(vec![gateway.identity("plant-a")]);
    registry.connect("plant-a").await.unwrap();

    let states = Arc::new(Mutex::new(Vec::new()));
    let sink = states.clone();
    let _listener = registry.on_connection_state_change("plant-a", move |state| {
        sink.lock().unwrap().push(state)
    });
    assert_eq!(*states.lock().unwrap(), vec![ConnectionState::Authenticated]);
}

#[tokio::test]
async fn test_disconnect_cancels_connect_in_flight() {
    // accepts TCP but never completes the WebSocket handshake
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let _hold = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });

    let gateway = MockGateway::start(Behavior::default()).await;
    let mut identity = gateway.identity("plant-a");
    identity.url = url;
    let registry = registry_for(vec![identity]);

    let states = Arc::new(Mutex::new(Vec::new()));
    let sink = states.clone();
    let _listener = registry.on_connection_state_change("plant-a", move |state| {
        sink.lock().unwrap().push(state)
    });

    let pending = tokio::spawn({
        let registry = registry.clone();
        async move { registry.connect("plant-a").await }
    });
    assert!(
        eventually(Duration::from_secs(1), || {
            states.lock().unwrap().contains(&ConnectionState::Connecting)
        })
        .await
    );

    registry.disconnect("plant-a").await;
    let err = pending.await.unwrap().unwrap_err();
    assert_eq!(err, GatewayError::Disconnected);
    assert!(registry.get_connection("plant-a").is_none());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!states.lock().unwrap().contains(&ConnectionState::Authenticated));
}

#[tokio::test]
async fn test_disconnect_during_login_is_not_stored() {
    let gateway = MockGateway::start(Behavior {
        silent_login: true,
        ..Behavior::default()
    })
    .await;
    let registry = registry_for(vec![gateway.identity("plant-a")]);

    let states = Arc::new(Mutex::new(Vec::new()));
    let sink = states.clone();
    let _listener = registry.on_connection_state_change("plant-a", move |state| {
        sink.lock().unwrap().push(state)
    });

    let pending = tokio::spawn({
        let registry = registry.clone();
        async move { registry.connect("plant-a").await }
    });
    assert!(
        eventually(Duration::from_secs(1), || {
            states.lock().unwrap().contains(&ConnectionState::Authenticating)
        })
        .await
    );
    registry.disconnect("plant-a").await;

    let err = pending.await.unwrap().unwrap_err();
    assert_eq!(err, GatewayError::Disconnected);
    assert!(registry.get_all_connections().is_empty());
    assert!(!states.lock().unwrap().contains(&ConnectionState::Authenticated));
}

#[tokio::test]
async fn test_unknown_gateway_has_no_credentials() {
    let registry = registry_for(Vec::new());
    let err = registry.connect("ghost").await.unwrap_err();
    assert_eq!(err, GatewayError::Credentials("ghost".to_string()));
}
