//! Client connection driver.
//!
//! One task per client owns the transport and the client's single channel.
//! It reacts to socket events, handle commands and the reconnect timer.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::channel::{Channel, ChannelCommand, ChannelTable};
use crate::connection::{ClientBackoff, ConnectionSignals, ConnectionState};
use crate::core::{SignalingError, TransportError};
use crate::transport::{sleep_until_opt, RoutingTransport, TransportEvent};

#[derive(Debug)]
pub(crate) enum ClientCommand {
    Close { done: oneshot::Sender<()> },
}

pub(crate) struct ClientDriver {
    pub(crate) url: String,
    pub(crate) transport: RoutingTransport,
    pub(crate) channels: ChannelTable,
    pub(crate) signals: Arc<ConnectionSignals>,
    pub(crate) backoff: ClientBackoff,
    pub(crate) channel_commands: mpsc::UnboundedReceiver<ChannelCommand>,
    pub(crate) commands: mpsc::UnboundedReceiver<ClientCommand>,
}

impl ClientDriver {
    pub(crate) async fn run(mut self) {
        let mut retry_at: Option<Instant> = None;

        loop {
            tokio::select! {
                event = self.transport.next_event() => {
                    retry_at = self.on_transport_event(event).or(retry_at);
                }
                Some(command) = self.channel_commands.recv() => {
                    self.on_channel_command(command);
                }
                command = self.commands.recv() => {
                    self.close();
                    if let Some(ClientCommand::Close { done }) = command {
                        let _ = done.send(());
                    }
                    return;
                }
                _ = sleep_until_opt(retry_at) => {
                    retry_at = self.reconnect().await;
                }
            }

            if self.signals.state().is_terminal() {
                return;
            }
            if self.channels.is_empty() {
                debug!("client channel ended, closing connection");
                self.transport.close();
                self.signals.set(ConnectionState::Closed);
                return;
            }
        }
    }

    /// Returns the next reconnect deadline if the socket was lost.
    fn on_transport_event(&mut self, event: TransportEvent) -> Option<Instant> {
        match event {
            TransportEvent::Frame(frame) => {
                if let Some(frame) = self.channels.route(frame, &self.transport) {
                    debug!(?frame, "dropping frame for unknown channel");
                }
                None
            }
            TransportEvent::Lost { error, recoverable } => self.on_lost(error, recoverable),
            TransportEvent::LivenessFailed => {
                warn!("relay did not answer ping, aborting socket");
                let event = self.transport.force_abort();
                self.on_transport_event(event)
            }
        }
    }

    fn on_channel_command(&mut self, command: ChannelCommand) {
        match command {
            ChannelCommand::CheckAlive { timeout } => {
                self.transport.check_alive(timeout);
            }
            command => self.channels.handle_command(command, &self.transport),
        }
    }

    fn on_lost(&mut self, error: TransportError, recoverable: bool) -> Option<Instant> {
        if !recoverable {
            self.fail(SignalingError::Transport(error));
            return None;
        }
        info!("relay socket lost: {}", error);
        self.schedule_retry()
    }

    fn schedule_retry(&mut self) -> Option<Instant> {
        match self.backoff.next_delay() {
            Some(delay) => {
                info!(attempt = self.backoff.attempts(), ?delay, "reconnecting");
                self.signals.set(ConnectionState::WaitRetry);
                Some(Instant::now() + delay)
            }
            None => {
                let attempts = self.backoff.attempts();
                warn!(attempts, "reconnect attempts exhausted");
                self.fail(SignalingError::RetriesExhausted { attempts });
                None
            }
        }
    }

    async fn reconnect(&mut self) -> Option<Instant> {
        self.signals.set(ConnectionState::Connecting);
        match self.transport.connect(&self.url).await {
            Ok(()) => {
                info!("relay socket reconnected");
                self.backoff.reset();
                self.signals.set(ConnectionState::Connected);
                self.signals.reconnected();
                self.channels
                    .for_each(&self.transport, Channel::on_transport_reconnected);
                None
            }
            Err(e) => {
                warn!("reconnect failed: {}", e);
                self.schedule_retry()
            }
        }
    }

    fn fail(&mut self, error: SignalingError) {
        self.signals.set(ConnectionState::Failed);
        self.signals.error(error.clone());
        self.channels
            .for_each(&self.transport, |ch| ch.on_connection_failed(error.clone()));
        self.transport.close();
    }

    fn close(&mut self) {
        self.channels.close_all(&self.transport);
        self.transport.close();
        self.signals.set(ConnectionState::Closed);
    }
}
