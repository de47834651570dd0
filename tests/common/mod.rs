//! In-memory relay for end-to-end tests.
//!
//! Plays both the handshake service and the relay. Routes `MESSAGE` and
//! `ERROR` frames between a device and its clients by channel id, reports
//! peer reachability, answers pings, and verifies device identity tokens.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use edge_signaling::core::{ChannelId, HandshakeError, MessageHandler, TransportError};
use edge_signaling::handshake::{Handshake, HandshakeRequest, HandshakeResponse};
use edge_signaling::security::{DeviceTokenVerifier, DeviceKey};
use edge_signaling::transport::{Connector, OutboundFrame, RoutingFrame, SocketConnection, SocketEvent};

pub const PRODUCT: &str = "product-1";
pub const DEVICE: &str = "device-1";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("warn")
        .with_test_writer()
        .try_init();
}

struct Link {
    id: u64,
    tx: mpsc::UnboundedSender<SocketEvent>,
}

#[derive(Default)]
struct State {
    next_link: u64,
    next_channel: u64,
    device: Option<Link>,
    clients: HashMap<ChannelId, Option<Link>>,
    client_loss: bool,
    clients_unauthorized: bool,
    refuse_client_connects: usize,
    device_handshake_failures: VecDeque<HandshakeError>,
    device_handshakes: usize,
    device_connects: usize,
    client_frames: Vec<Value>,
}

/// The relay double. Cheap to clone.
#[derive(Clone)]
pub struct TestRelay {
    state: Arc<Mutex<State>>,
    verifier: Arc<Mutex<DeviceTokenVerifier>>,
}

impl TestRelay {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            verifier: Arc::new(Mutex::new(DeviceTokenVerifier::new())),
        }
    }

    /// Accept identity tokens signed by `key`.
    pub fn trust(&self, key: &DeviceKey) {
        self.verifier.lock().add_key(key.verifying_key());
    }

    pub fn client_handshake(&self) -> ClientHandshake {
        ClientHandshake(self.clone())
    }

    pub fn device_handshake(&self) -> DeviceHandshake {
        DeviceHandshake(self.clone())
    }

    pub fn connector(&self) -> RelayConnector {
        RelayConnector(self.clone())
    }

    /// Drop `MESSAGE` and `PONG` frames headed to clients.
    pub fn set_client_loss(&self, loss: bool) {
        self.state.lock().client_loss = loss;
    }

    /// Forward client messages without vouching for the sender.
    pub fn set_clients_unauthorized(&self, unauthorized: bool) {
        self.state.lock().clients_unauthorized = unauthorized;
    }

    /// Refuse the next `n` client socket connects.
    pub fn refuse_client_connects(&self, n: usize) {
        self.state.lock().refuse_client_connects = n;
    }

    /// Fail upcoming device handshakes with these errors, in order.
    pub fn fail_device_handshakes(&self, errors: impl IntoIterator<Item = HandshakeError>) {
        self.state.lock().device_handshake_failures.extend(errors);
    }

    pub fn device_handshakes(&self) -> usize {
        self.state.lock().device_handshakes
    }

    pub fn device_connects(&self) -> usize {
        self.state.lock().device_connects
    }

    pub fn device_online(&self) -> bool {
        self.state.lock().device.is_some()
    }

    /// Every frame a client sent, in order.
    pub fn client_frames(&self) -> Vec<Value> {
        self.state.lock().client_frames.clone()
    }

    /// Close the device socket from the relay side.
    pub fn kill_device_socket(&self) {
        let link = self.state.lock().device.take();
        if let Some(link) = link {
            let _ = link.tx.send(SocketEvent::Closed);
            self.on_device_gone();
        }
    }

    /// Close a client socket from the relay side.
    pub fn kill_client_socket(&self, channel_id: &ChannelId) {
        let link = self.state.lock().clients.get_mut(channel_id).and_then(Option::take);
        if let Some(link) = link {
            let _ = link.tx.send(SocketEvent::Closed);
            self.to_device(RoutingFrame::PeerOffline {
                channel_id: channel_id.clone(),
            });
        }
    }

    /// Inject a frame to the device as if a client sent it.
    pub fn inject_to_device(&self, frame: RoutingFrame) {
        self.to_device(frame);
    }

    fn send(link: &Link, frame: &RoutingFrame) {
        let _ = link.tx.send(SocketEvent::Text(frame.encode()));
    }

    fn to_device(&self, frame: RoutingFrame) {
        if let Some(link) = &self.state.lock().device {
            Self::send(link, &frame);
        }
    }

    fn to_client(&self, channel_id: &ChannelId, frame: RoutingFrame) {
        let state = self.state.lock();
        let lossy = matches!(frame, RoutingFrame::Message { .. } | RoutingFrame::Pong);
        if state.client_loss && lossy {
            return;
        }
        if let Some(Some(link)) = state.clients.get(channel_id) {
            Self::send(link, &frame);
        }
    }

    fn on_device_gone(&self) {
        let state = self.state.lock();
        for (channel_id, link) in &state.clients {
            if let Some(link) = link {
                Self::send(
                    link,
                    &RoutingFrame::PeerOffline {
                        channel_id: channel_id.clone(),
                    },
                );
            }
        }
    }

    fn open_client(&self, channel_id: ChannelId) -> Result<SocketConnection, TransportError> {
        let (socket, outbound, inbound) = SocketConnection::pair();
        let id = {
            let mut state = self.state.lock();
            if state.refuse_client_connects > 0 {
                state.refuse_client_connects -= 1;
                return Err(TransportError::ConnectFailed("relay refused".into()));
            }
            state.next_link += 1;
            let id = state.next_link;
            let reachability = if state.device.is_some() {
                RoutingFrame::PeerConnected {
                    channel_id: channel_id.clone(),
                }
            } else {
                RoutingFrame::PeerOffline {
                    channel_id: channel_id.clone(),
                }
            };
            let link = Link { id, tx: inbound };
            Self::send(&link, &reachability);
            if let Some(device) = &state.device {
                Self::send(
                    device,
                    &RoutingFrame::PeerConnected {
                        channel_id: channel_id.clone(),
                    },
                );
            }
            state.clients.insert(channel_id.clone(), Some(link));
            id
        };

        let relay = self.clone();
        tokio::spawn(async move {
            relay.pump_client(channel_id, id, outbound).await;
        });
        Ok(socket)
    }

    fn open_device(&self) -> SocketConnection {
        let (socket, outbound, inbound) = SocketConnection::pair();
        let id = {
            let mut state = self.state.lock();
            state.next_link += 1;
            state.device_connects += 1;
            let id = state.next_link;
            for (channel_id, link) in &state.clients {
                if let Some(link) = link {
                    Self::send(
                        link,
                        &RoutingFrame::PeerConnected {
                            channel_id: channel_id.clone(),
                        },
                    );
                }
            }
            state.device = Some(Link { id, tx: inbound });
            id
        };

        let relay = self.clone();
        tokio::spawn(async move {
            relay.pump_device(id, outbound).await;
        });
        socket
    }

    async fn pump_client(&self, channel_id: ChannelId, id: u64, mut outbound: mpsc::UnboundedReceiver<OutboundFrame>) {
        while let Some(OutboundFrame::Text(text)) = outbound.recv().await {
            let Ok(Some(frame)) = RoutingFrame::decode(&text) else {
                continue;
            };
            match frame {
                RoutingFrame::Ping => self.to_client(&channel_id, RoutingFrame::Pong),
                RoutingFrame::Message { channel_id: target, message, .. } => {
                    let authorized = {
                        let mut state = self.state.lock();
                        state.client_frames.push(message.clone());
                        (!state.clients_unauthorized).then_some(true)
                    };
                    if !self.device_online() {
                        self.to_client(&target, RoutingFrame::PeerOffline { channel_id: target.clone() });
                        continue;
                    }
                    self.to_device(RoutingFrame::Message {
                        channel_id: target,
                        message,
                        authorized,
                    });
                }
                frame @ RoutingFrame::Error { .. } => self.to_device(frame),
                _ => {}
            }
        }

        // The client closed or dropped its socket.
        let removed = {
            let mut state = self.state.lock();
            match state.clients.get_mut(&channel_id) {
                Some(slot) if slot.as_ref().is_some_and(|l| l.id == id) => {
                    *slot = None;
                    true
                }
                _ => false,
            }
        };
        if removed {
            self.to_device(RoutingFrame::PeerOffline { channel_id });
        }
    }

    async fn pump_device(&self, id: u64, mut outbound: mpsc::UnboundedReceiver<OutboundFrame>) {
        while let Some(OutboundFrame::Text(text)) = outbound.recv().await {
            let Ok(Some(frame)) = RoutingFrame::decode(&text) else {
                continue;
            };
            match frame {
                RoutingFrame::Ping => {
                    if let Some(link) = &self.state.lock().device {
                        Self::send(link, &RoutingFrame::Pong);
                    }
                }
                RoutingFrame::Message { channel_id, message, .. } => {
                    self.to_client(&channel_id.clone(), RoutingFrame::message(channel_id, message));
                }
                RoutingFrame::Error { channel_id, error } => {
                    self.to_client(&channel_id.clone(), RoutingFrame::Error { channel_id, error });
                }
                _ => {}
            }
        }

        let removed = {
            let mut state = self.state.lock();
            if state.device.as_ref().is_some_and(|l| l.id == id) {
                state.device = None;
                true
            } else {
                false
            }
        };
        if removed {
            self.on_device_gone();
        }
    }
}

pub struct ClientHandshake(TestRelay);

#[async_trait]
impl Handshake for ClientHandshake {
    async fn handshake(&self, request: &HandshakeRequest) -> Result<HandshakeResponse, HandshakeError> {
        if request.product_id != PRODUCT || request.device_id != DEVICE {
            return Err(HandshakeError::NotFound);
        }
        let mut state = self.0.state.lock();
        state.next_channel += 1;
        let channel_id = ChannelId::new(format!("ch-{}", state.next_channel));
        state.clients.insert(channel_id.clone(), None);
        Ok(HandshakeResponse {
            signaling_url: format!("mem://relay/client/{}", channel_id),
            device_online: Some(state.device.is_some()),
            channel_id: Some(channel_id),
        })
    }
}

pub struct DeviceHandshake(TestRelay);

#[async_trait]
impl Handshake for DeviceHandshake {
    async fn handshake(&self, request: &HandshakeRequest) -> Result<HandshakeResponse, HandshakeError> {
        let failure = {
            let mut state = self.0.state.lock();
            state.device_handshakes += 1;
            state.device_handshake_failures.pop_front()
        };
        if let Some(error) = failure {
            return Err(error);
        }

        let token = request.token.as_deref().ok_or(HandshakeError::Unauthorized)?;
        let claims = self
            .0
            .verifier
            .lock()
            .verify(token)
            .map_err(|_| HandshakeError::Unauthorized)?;
        if claims.resource != edge_signaling::security::device_resource(&request.product_id, &request.device_id) {
            return Err(HandshakeError::Forbidden);
        }
        Ok(HandshakeResponse {
            signaling_url: "mem://relay/device".into(),
            device_online: None,
            channel_id: None,
        })
    }
}

pub struct RelayConnector(TestRelay);

#[async_trait]
impl Connector for RelayConnector {
    async fn connect(&self, url: &str) -> Result<SocketConnection, TransportError> {
        if let Some(channel) = url.strip_prefix("mem://relay/client/") {
            return self.0.open_client(ChannelId::new(channel));
        }
        if url == "mem://relay/device" {
            return Ok(self.0.open_device());
        }
        Err(TransportError::ConnectFailed(format!("unknown url {url}")))
    }
}

/// Handler collecting every delivered message.
#[derive(Clone, Default)]
pub struct Collector {
    messages: Arc<Mutex<Vec<(ChannelId, Value)>>>,
}

impl Collector {
    pub fn messages(&self) -> Vec<Value> {
        self.messages.lock().iter().map(|(_, m)| m.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    /// Wait until at least `n` messages arrived.
    pub async fn wait_for(&self, n: usize) {
        while self.len() < n {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    }
}

#[async_trait]
impl MessageHandler for Collector {
    async fn on_message(&self, channel_id: &ChannelId, message: Value) {
        self.messages.lock().push((channel_id.clone(), message));
    }
}
