//! Integration tests for `BridgeConnection` against the in-memory bridge.


use std::sync::Arc;
use std::time::Duration;

use event_bridge::{
    BridgeConfig, BridgeConnection, ConnectionError, ConnectionState, InvocationError,
};
use mock_bridge::{init_tracing, wait_until, MockTransport, RecordingHandler};
use rstest::rstest;
use serde_json::{json, Value};

fn connection(transport: &MockTransport, config: BridgeConfig) -> BridgeConnection {
    init_tracing();
    BridgeConnection::new(Arc::new(transport.clone()), RecordingHandler::new(), config)
}

#[tokio::test]
async fn test_invoke_before_connect_fails() {
    let transport = MockTransport::new();
    let connection = connection(&transport, BridgeConfig::default());

    let error = connection.invoke("StopSubscription", vec![]).await.unwrap_err();
    assert!(matches!(error, InvocationError::NotConnected));
    assert_eq!(connection.state(), ConnectionState::Disconnected);
}

#[rstest]
#[case::no_arguments(vec![])]
#[case::one_argument(vec![json!("a")])]
#[case::several_arguments(vec![json!({"k": 1}), json!(2.5), Value::Null])]
#[tokio::test]
async fn test_invoke_sends_arguments_in_order(#[case] args: Vec<Value>) {
    let transport = MockTransport::new();
    let connection = connection(&transport, BridgeConfig::default());
    connection.connect().await.unwrap();

    let result = connection.invoke("Echo", args.clone()).await.unwrap();
    assert_eq!(result, json!(true));

    let recorded = transport.invocations();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].method, "Echo");
    assert_eq!(recorded[0].args, args);
}

#[tokio::test]
async fn test_invocation_ids_restart_per_connection() {
    let transport = MockTransport::new();
    let connection = connection(&transport, BridgeConfig::default());

    connection.connect().await.unwrap();
    connection.invoke("A", vec![]).await.unwrap();
    connection.invoke("B", vec![]).await.unwrap();
    connection.close();

    connection.connect().await.unwrap();
    connection.invoke("C", vec![]).await.unwrap();

    let ids: Vec<String> = transport.invocations().into_iter().map(|i| i.id).collect();
    assert_eq!(ids, vec!["0", "1", "0"]);
    assert_eq!(transport.opens(), 2);
}

#[tokio::test]
async fn test_connect_twice_is_rejected() {
    let transport = MockTransport::new();
    let connection = connection(&transport, BridgeConfig::default());

    connection.connect().await.unwrap();
    let error = connection.connect().await.unwrap_err();

    assert!(matches!(error, ConnectionError::AlreadyConnected));
    assert_eq!(connection.state(), ConnectionState::Connected);
    assert_eq!(transport.opens(), 1);
}

#[tokio::test]
async fn test_connect_failure_leaves_disconnected() {
    let transport = MockTransport::new().failing_open();
    let connection = connection(&transport, BridgeConfig::default());

    let error = connection.connect().await.unwrap_err();
    assert!(matches!(error, ConnectionError::Transport(_)));
    assert_eq!(connection.state(), ConnectionState::Disconnected);
    assert!(!connection.is_handler_registered());
}

#[tokio::test]
async fn test_invalid_config_is_rejected_before_opening() {
    let transport = MockTransport::new();
    let connection = connection(
        &transport,
        BridgeConfig::default().with_invoke_timeout(Duration::ZERO),
    );

    let error = connection.connect().await.unwrap_err();
    assert!(matches!(error, ConnectionError::Configuration(_)));
    assert_eq!(transport.opens(), 0);
}

#[tokio::test]
async fn test_connect_times_out_on_slow_transport() {
    let transport = MockTransport::new().slow_open(Duration::from_millis(500));
    let connection = connection(
        &transport,
        BridgeConfig::default().with_connect_timeout(Duration::from_millis(50)),
    );

    let error = connection.connect().await.unwrap_err();
    match error {
        ConnectionError::Timeout(after) => assert_eq!(after, Duration::from_millis(50)),
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(connection.state(), ConnectionState::Disconnected);
    assert!(!connection.is_handler_registered());
}

#[tokio::test]
async fn test_close_while_connecting_abandons_the_link() {
    let transport = MockTransport::new().slow_open(Duration::from_millis(200));
    let connection = Arc::new(connection(&transport, BridgeConfig::default()));

    let connecting = {
        let connection = connection.clone();
        tokio::spawn(async move { connection.connect().await })
    };
    assert!(wait_until(|| connection.state() == ConnectionState::Connecting).await);

    connection.close();
    assert_eq!(connection.state(), ConnectionState::Disconnected);

    let error = connecting.await.unwrap().unwrap_err();
    assert!(matches!(error, ConnectionError::Closed));
    assert_eq!(connection.state(), ConnectionState::Disconnected);
    assert!(!connection.is_handler_registered());

    // The link that finished opening after close() is released
    assert!(wait_until(|| transport.closes() == 1).await);
}

#[tokio::test]
async fn test_cancelled_connect_resets_state() {
    let transport = MockTransport::new().slow_open(Duration::from_millis(100));
    let connection = connection(&transport, BridgeConfig::default());

    let abandoned = tokio::time::timeout(Duration::from_millis(20), connection.connect()).await;
    assert!(abandoned.is_err());
    assert_eq!(connection.state(), ConnectionState::Disconnected);

    connection.connect().await.unwrap();
    assert_eq!(connection.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn test_invoke_times_out() {
    let transport = MockTransport::new().silent();
    let connection = connection(
        &transport,
        BridgeConfig::default().with_invoke_timeout(Duration::from_millis(100)),
    );
    connection.connect().await.unwrap();

    let error = connection.invoke("CreateSubscription", vec![]).await.unwrap_err();
    match error {
        InvocationError::Timeout { method, after } => {
            assert_eq!(method, "CreateSubscription");
            assert_eq!(after, Duration::from_millis(100));
        }
        other => panic!("unexpected error: {:?}", other),
    }

    // A timed-out call does not tear the connection down
    assert_eq!(connection.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn test_remote_error_is_reported() {
    let transport = MockTransport::new().failing_method("StopSubscription");
    let connection = connection(&transport, BridgeConfig::default());
    connection.connect().await.unwrap();

    let error = connection.invoke("StopSubscription", vec![]).await.unwrap_err();
    assert_eq!(
        error.to_string(),
        "Bridge rejected 'StopSubscription': StopSubscription rejected"
    );
    assert_eq!(connection.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn test_pending_invocation_fails_when_transport_is_lost() {
    let transport = MockTransport::new().silent();
    let connection = Arc::new(connection(&transport, BridgeConfig::default()));
    connection.connect().await.unwrap();

    let pending = {
        let connection = connection.clone();
        tokio::spawn(async move { connection.invoke("CreateSubscription", vec![]).await })
    };

    assert!(wait_until(|| transport.invocations().len() == 1).await);
    transport.sever();

    let error = pending.await.unwrap().unwrap_err();
    assert!(matches!(error, InvocationError::ConnectionDropped(_)));
    assert!(wait_until(|| connection.state() == ConnectionState::Disconnected).await);
}

#[tokio::test]
async fn test_pending_invocation_fails_on_close() {
    let transport = MockTransport::new().silent();
    let connection = Arc::new(connection(&transport, BridgeConfig::default()));
    connection.connect().await.unwrap();

    let pending = {
        let connection = connection.clone();
        tokio::spawn(async move { connection.invoke("StopSubscription", vec![]).await })
    };

    assert!(wait_until(|| transport.invocations().len() == 1).await);
    connection.close();

    let error = pending.await.unwrap().unwrap_err();
    assert!(matches!(error, InvocationError::ConnectionDropped(_)));
    assert!(matches!(
        connection.invoke("StopSubscription", vec![]).await,
        Err(InvocationError::NotConnected)
    ));
}

#[tokio::test]
async fn test_drop_closes_the_link() {
    let transport = MockTransport::new();
    let connection = connection(&transport, BridgeConfig::default());
    connection.connect().await.unwrap();

    drop(connection);
    assert!(wait_until(|| transport.closes() == 1).await);
}
