//! End-to-end client/device scenarios against the in-memory relay.

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Semaphore;
use tokio::time::Instant;

use common::{init_tracing, Collector, TestRelay, DEVICE, PRODUCT};
use edge_signaling::channel::ChannelEvent;
use edge_signaling::core::{ErrorCode, HandshakeError, SignalingError};
use edge_signaling::prelude::*;

async fn connect_client(relay: &TestRelay, signing: SigningConfig, collector: &Collector) -> (SignalingClient, ChannelHandle) {
    let config = SignalingClientBuilder::new()
        .device(PRODUCT, DEVICE)
        .signing(signing)
        .build();
    SignalingClient::connect_with_handler(
        config,
        relay.client_handshake(),
        relay.connector(),
        Some(Arc::new(collector.clone())),
    )
    .await
    .unwrap()
}

fn start_device(
    relay: &TestRelay,
    signing: SigningConfig,
    collector: &Collector,
) -> (SignalingDevice, tokio::sync::mpsc::UnboundedReceiver<ChannelHandle>) {
    start_device_with(relay, |builder| builder.signing(signing), Arc::new(collector.clone()))
}

fn start_device_with(
    relay: &TestRelay,
    configure: impl FnOnce(SignalingDeviceBuilder) -> SignalingDeviceBuilder,
    handler: Arc<dyn MessageHandler>,
) -> (SignalingDevice, tokio::sync::mpsc::UnboundedReceiver<ChannelHandle>) {
    let key = DeviceKey::generate();
    relay.trust(&key);
    let builder = SignalingDeviceBuilder::new().device(PRODUCT, DEVICE).identity(key);
    SignalingDevice::start(configure(builder).build(), relay.device_handshake(), relay.connector(), handler).unwrap()
}

async fn wait_for_error(events: &mut tokio::sync::broadcast::Receiver<ChannelEvent>) -> SignalingError {
    loop {
        match events.recv().await {
            Ok(ChannelEvent::Error(e)) => return e,
            Ok(_) => continue,
            Err(e) => panic!("no error event: {e}"),
        }
    }
}

/// Handler that records each message on entry and blocks until a permit
/// is released before recording it as handled.
#[derive(Clone)]
struct Gated {
    gate: Arc<Semaphore>,
    entered: Collector,
    handled: Collector,
}

impl Gated {
    fn new() -> Self {
        Self {
            gate: Arc::new(Semaphore::new(0)),
            entered: Collector::default(),
            handled: Collector::default(),
        }
    }
}

#[async_trait]
impl MessageHandler for Gated {
    async fn on_message(&self, channel_id: &ChannelId, message: Value) {
        self.entered.on_message(channel_id, message.clone()).await;
        let _permit = self.gate.acquire().await;
        self.handled.on_message(channel_id, message).await;
    }
}

async fn wait_for_acks(channel: &ChannelHandle) {
    while channel.pending_acks().await > 0 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn wait_for_reconnected(events: &mut tokio::sync::broadcast::Receiver<ConnectionEvent>) {
    loop {
        match events.recv().await {
            Ok(ConnectionEvent::Reconnected) => return,
            Ok(_) => continue,
            Err(e) => panic!("connection events ended: {e}"),
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_offline_messages_survive_loss_and_forced_reconnect() {
    init_tracing();
    let relay = TestRelay::new();
    let client_rx = Collector::default();
    let (client, channel) = connect_client(&relay, SigningConfig::None, &client_rx).await;
    assert_eq!(client.device_online(), Some(false));

    channel.wait_for_state(|s| *s == ChannelState::Offline).await;
    for message in ["1", "2", "3"] {
        channel.send_message(json!(message)).await.unwrap();
    }
    assert_eq!(channel.pending_acks().await, 3);

    // Acks from the device never reach the client.
    relay.set_client_loss(true);
    let device_rx = Collector::default();
    let (device, mut incoming) = start_device(&relay, SigningConfig::None, &device_rx);

    device_rx.wait_for(3).await;
    channel.wait_for_state(|s| s.is_online()).await;
    assert_eq!(channel.pending_acks().await, 3);

    // The pong is lost as well, so the probe aborts the socket.
    let mut events = client.subscribe();
    let mut state = client.watch_state();
    channel.check_alive(Duration::from_secs(1));
    state.wait_for(|s| *s == ConnectionState::WaitRetry).await.unwrap();
    relay.set_client_loss(false);

    wait_for_reconnected(&mut events).await;
    assert_eq!(client.state(), ConnectionState::Connected);
    wait_for_acks(&channel).await;

    assert_eq!(device_rx.messages(), vec![json!("1"), json!("2"), json!("3")]);
    let opened = incoming.recv().await.unwrap();
    assert_eq!(opened.id(), channel.id());
    assert!(incoming.try_recv().is_err());

    client.close().await;
    device.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_offline_messages_resent_when_peer_reachable() {
    init_tracing();
    let relay = TestRelay::new();
    let client_rx = Collector::default();
    let (client, channel) = connect_client(&relay, SigningConfig::None, &client_rx).await;

    channel.wait_for_state(|s| *s == ChannelState::Offline).await;
    for message in ["1", "2", "3"] {
        channel.send_message(json!(message)).await.unwrap();
    }

    let device_rx = Collector::default();
    let (device, _incoming) = start_device(&relay, SigningConfig::None, &device_rx);

    device_rx.wait_for(3).await;
    wait_for_acks(&channel).await;

    // Same end state as the forced-reconnect path.
    assert_eq!(device_rx.messages(), vec![json!("1"), json!("2"), json!("3")]);
    assert_eq!(channel.state(), ChannelState::Online);
    assert_eq!(client.state(), ConnectionState::Connected);

    device.close().await;
    client.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_device_replies_reach_client() {
    init_tracing();
    let relay = TestRelay::new();
    let device_rx = Collector::default();
    let (device, mut incoming) = start_device(&relay, SigningConfig::None, &device_rx);
    let mut device_state = device.watch_state();
    device_state.wait_for(|s| *s == ConnectionState::Connected).await.unwrap();

    let client_rx = Collector::default();
    let (client, channel) = connect_client(&relay, SigningConfig::None, &client_rx).await;
    assert_eq!(client.device_online(), Some(true));

    channel.send_message(json!({"hello": "device"})).await.unwrap();
    let device_channel = incoming.recv().await.unwrap();
    device_rx.wait_for(1).await;

    device_channel.send_message(json!({"hello": "client"})).await.unwrap();
    client_rx.wait_for(1).await;
    assert_eq!(client_rx.messages(), vec![json!({"hello": "client"})]);

    wait_for_acks(&channel).await;
    wait_for_acks(&device_channel).await;

    client.close().await;
    device.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_client_fails_after_eighth_wait() {
    init_tracing();
    let relay = TestRelay::new();
    let (client, channel) = connect_client(&relay, SigningConfig::None, &Collector::default()).await;
    let mut events = client.subscribe();
    let mut channel_events = channel.subscribe();

    relay.refuse_client_connects(usize::MAX);
    let start = Instant::now();
    relay.kill_client_socket(channel.id());

    let mut state = client.watch_state();
    state.wait_for(|s| *s == ConnectionState::Failed).await.unwrap();

    // 2 + 4 + ... + 256 seconds of waiting.
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_secs(510), "{elapsed:?}");
    assert!(elapsed < Duration::from_secs(511), "{elapsed:?}");

    let mut waits = 0;
    let mut error = None;
    while let Ok(event) = events.try_recv() {
        match event {
            ConnectionEvent::StateChanged(ConnectionState::WaitRetry) => waits += 1,
            ConnectionEvent::Error(e) => error = Some(e),
            _ => {}
        }
    }
    assert_eq!(waits, 8);
    assert_eq!(error, Some(SignalingError::RetriesExhausted { attempts: 8 }));

    assert_eq!(channel.state(), ChannelState::Failed);
    loop {
        match channel_events.recv().await {
            Ok(ChannelEvent::Error(e)) => {
                assert_eq!(e, SignalingError::RetriesExhausted { attempts: 8 });
                break;
            }
            Ok(_) => continue,
            Err(e) => panic!("no error event: {e}"),
        }
    }
    assert_eq!(
        channel.send_message(json!("late")).await,
        Err(SignalingError::ChannelClosed)
    );
}

#[tokio::test(start_paused = true)]
async fn test_client_connect_failure_is_fatal() {
    init_tracing();
    let relay = TestRelay::new();
    relay.refuse_client_connects(1);

    let config = SignalingClientBuilder::new().device(PRODUCT, DEVICE).build();
    let result = SignalingClient::connect(config, relay.client_handshake(), relay.connector()).await;
    assert!(matches!(result, Err(SignalingError::Transport(_))));

    let config = SignalingClientBuilder::new().device(PRODUCT, "unknown").build();
    let result = SignalingClient::connect(config, relay.client_handshake(), relay.connector()).await;
    assert_eq!(result.err(), Some(SignalingError::Handshake(HandshakeError::NotFound)));
}

#[tokio::test(start_paused = true)]
async fn test_device_reconnects_with_fresh_handshake() {
    init_tracing();
    let relay = TestRelay::new();
    let (device, _incoming) = start_device(&relay, SigningConfig::None, &Collector::default());
    let mut state = device.watch_state();
    state.wait_for(|s| *s == ConnectionState::Connected).await.unwrap();
    assert_eq!(relay.device_handshakes(), 1);

    let mut events = device.subscribe();
    relay.kill_device_socket();
    wait_for_reconnected(&mut events).await;

    assert_eq!(relay.device_handshakes(), 2);
    assert_eq!(relay.device_connects(), 2);
    assert!(relay.device_online());

    device.close().await;
    assert_eq!(device.state(), ConnectionState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_device_honors_retry_after() {
    init_tracing();
    let relay = TestRelay::new();
    relay.fail_device_handshakes([HandshakeError::TooManyRequests {
        retry_after: Some("7".into()),
    }]);

    let start = Instant::now();
    let (device, _incoming) = start_device(&relay, SigningConfig::None, &Collector::default());
    let mut state = device.watch_state();
    state.wait_for(|s| *s == ConnectionState::Connected).await.unwrap();

    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_secs(7), "{elapsed:?}");
    assert!(elapsed < Duration::from_secs(8), "{elapsed:?}");
    assert_eq!(relay.device_handshakes(), 2);

    device.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_untrusted_device_keeps_retrying() {
    init_tracing();
    let relay = TestRelay::new();
    let config = SignalingDeviceBuilder::new().device(PRODUCT, DEVICE).build();
    let (device, _incoming) = SignalingDevice::start(
        config,
        relay.device_handshake(),
        relay.connector(),
        Arc::new(Collector::default()),
    )
    .unwrap();

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(relay.device_handshakes() >= 3);
    assert!(!relay.device_online());
    assert_ne!(device.state(), ConnectionState::Failed);

    device.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_signed_exchange() {
    init_tracing();
    let relay = TestRelay::new();
    let signing = SigningConfig::shared_secret(b"a shared secret of reasonable length".to_vec());

    let device_rx = Collector::default();
    let (device, mut incoming) = start_device(&relay, signing.clone(), &device_rx);
    let client_rx = Collector::default();
    let (client, channel) = connect_client(&relay, signing, &client_rx).await;

    channel.send_message(json!("ping")).await.unwrap();
    let device_channel = incoming.recv().await.unwrap();
    device_rx.wait_for(1).await;

    device_channel.send_message(json!("pong")).await.unwrap();
    client_rx.wait_for(1).await;

    channel.send_message(json!("again")).await.unwrap();
    device_rx.wait_for(2).await;

    assert_eq!(device_rx.messages(), vec![json!("ping"), json!("again")]);
    assert_eq!(client_rx.messages(), vec![json!("pong")]);
    let frames = relay.client_frames();
    assert_eq!(frames[0]["data"]["type"], "JWT");

    client.close().await;
    device.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_signature_mismatch_fails_both_ends() {
    init_tracing();
    let relay = TestRelay::new();

    let device_rx = Collector::default();
    let (device, mut incoming) = start_device(&relay, SigningConfig::shared_secret(b"device secret".to_vec()), &device_rx);
    let (client, channel) = connect_client(&relay, SigningConfig::shared_secret(b"client secret".to_vec()), &Collector::default()).await;
    let mut channel_events = channel.subscribe();

    channel.send_message(json!("forged")).await.unwrap();

    let device_channel = incoming.recv().await.unwrap();
    let state = device_channel.wait_for_state(|s| s.is_terminal()).await;
    assert_eq!(state, ChannelState::Failed);

    let state = channel.wait_for_state(|s| s.is_terminal()).await;
    assert_eq!(state, ChannelState::Failed);
    loop {
        match channel_events.recv().await {
            Ok(ChannelEvent::Error(SignalingError::Protocol(error))) => {
                assert_eq!(error.code, ErrorCode::VerificationError);
                break;
            }
            Ok(_) => continue,
            Err(e) => panic!("no error event: {e}"),
        }
    }
    assert_eq!(device_rx.len(), 0);

    client.close().await;
    device.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_client_close_closes_device_channel() {
    init_tracing();
    let relay = TestRelay::new();
    let (device, mut incoming) = start_device(&relay, SigningConfig::None, &Collector::default());
    let (client, channel) = connect_client(&relay, SigningConfig::None, &Collector::default()).await;

    channel.send_message(json!("hi")).await.unwrap();
    let device_channel = incoming.recv().await.unwrap();

    client.close().await;
    assert_eq!(client.state(), ConnectionState::Closed);
    assert_eq!(channel.state(), ChannelState::Closed);

    let state = device_channel.wait_for_state(|s| s.is_terminal()).await;
    assert_eq!(state, ChannelState::Closed);
    assert_eq!(device.state(), ConnectionState::Connected);

    device.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_unknown_channel_data_is_rejected() {
    init_tracing();
    let relay = TestRelay::new();
    let (device, mut incoming) = start_device(&relay, SigningConfig::None, &Collector::default());
    let mut state = device.watch_state();
    state.wait_for(|s| *s == ConnectionState::Connected).await.unwrap();

    // Mid-stream data for a channel the device never saw.
    relay.inject_to_device(edge_signaling::transport::RoutingFrame::Message {
        channel_id: ChannelId::new("stale"),
        message: json!({"type": "DATA", "seq": 4, "data": {"type": "NONE", "message": "x"}}),
        authorized: Some(true),
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(incoming.try_recv().is_err());

    device.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_device_backoff_resets_after_stable_connection() {
    init_tracing();
    let relay = TestRelay::new();
    relay.fail_device_handshakes(std::iter::repeat_with(|| HandshakeError::Unauthorized).take(4));

    let (device, _incoming) = start_device(&relay, SigningConfig::None, &Collector::default());
    let mut state = device.watch_state();
    state.wait_for(|s| *s == ConnectionState::Connected).await.unwrap();
    assert_eq!(relay.device_handshakes(), 5);

    // Dropped before the connection counts as stable: the counter keeps
    // growing, so the wait is 16s plus jitter.
    let start = Instant::now();
    relay.kill_device_socket();
    state.wait_for(|s| *s == ConnectionState::WaitRetry).await.unwrap();
    state.wait_for(|s| *s == ConnectionState::Connected).await.unwrap();
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_secs(16), "{elapsed:?}");

    // Ten seconds of uptime reset the counter to the 1s base.
    tokio::time::sleep(Duration::from_secs(11)).await;
    let start = Instant::now();
    relay.kill_device_socket();
    state.wait_for(|s| *s == ConnectionState::WaitRetry).await.unwrap();
    state.wait_for(|s| *s == ConnectionState::Connected).await.unwrap();
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_secs(1), "{elapsed:?}");
    assert!(elapsed <= Duration::from_millis(2_100), "{elapsed:?}");

    device.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_device_rejects_channels_beyond_limit() {
    init_tracing();
    let relay = TestRelay::new();
    let device_rx = Collector::default();
    let (device, mut incoming) =
        start_device_with(&relay, |builder| builder.max_channels(1), Arc::new(device_rx.clone()));
    let mut state = device.watch_state();
    state.wait_for(|s| *s == ConnectionState::Connected).await.unwrap();

    let (first_client, first) = connect_client(&relay, SigningConfig::None, &Collector::default()).await;
    first.send_message(json!("first")).await.unwrap();
    incoming.recv().await.unwrap();
    device_rx.wait_for(1).await;

    let (second_client, second) = connect_client(&relay, SigningConfig::None, &Collector::default()).await;
    let mut events = second.subscribe();
    second.send_message(json!("second")).await.unwrap();

    match wait_for_error(&mut events).await {
        SignalingError::Protocol(error) => assert_eq!(error.code, ErrorCode::NoMoreChannels),
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(second.state(), ChannelState::Failed);
    assert!(incoming.try_recv().is_err());
    assert_eq!(device_rx.messages(), vec![json!("first")]);
    assert_eq!(first.state(), ChannelState::Online);

    first_client.close().await;
    second_client.close().await;
    device.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_device_denies_unauthorized_clients() {
    init_tracing();
    let relay = TestRelay::new();
    relay.set_clients_unauthorized(true);
    let device_rx = Collector::default();
    let (device, mut incoming) =
        start_device_with(&relay, |builder| builder.require_authorized(true), Arc::new(device_rx.clone()));
    let mut state = device.watch_state();
    state.wait_for(|s| *s == ConnectionState::Connected).await.unwrap();

    let (client, channel) = connect_client(&relay, SigningConfig::None, &Collector::default()).await;
    let mut events = channel.subscribe();
    channel.send_message(json!("let me in")).await.unwrap();

    match wait_for_error(&mut events).await {
        SignalingError::Protocol(error) => assert_eq!(error.code, ErrorCode::AccessDenied),
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(channel.state(), ChannelState::Failed);
    assert!(incoming.try_recv().is_err());
    assert_eq!(device_rx.len(), 0);

    client.close().await;
    device.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_device_close_detaches_handlers() {
    init_tracing();
    let relay = TestRelay::new();
    let handler = Gated::new();
    let (device, mut incoming) = start_device_with(&relay, |builder| builder, Arc::new(handler.clone()));
    let (client, channel) = connect_client(&relay, SigningConfig::None, &Collector::default()).await;

    for message in ["1", "2", "3"] {
        channel.send_message(json!(message)).await.unwrap();
    }
    let device_channel = incoming.recv().await.unwrap();
    // The handler is stuck on the first message with the rest queued.
    handler.entered.wait_for(1).await;
    wait_for_acks(&channel).await;

    device.close().await;
    assert_eq!(device.state(), ConnectionState::Closed);
    assert_eq!(device_channel.state(), ChannelState::Closed);

    handler.gate.add_permits(3);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(handler.handled.len(), 0);
    assert_eq!(handler.entered.len(), 1);

    client.close().await;
}
