//! Connectivity bridge between the media connection and signaling.
//!
//! ```text
//!   media Disconnected  ->  check_alive on the signaling connection
//!   media Failed        ->  restart ICE
//!   signaling Reconnected -> restart ICE
//!   no media Connected within the idle timeout (device) -> close channel
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::perfect::MediaConnection;
use crate::channel::ChannelHandle;
use crate::connection::ConnectionEvent;
use crate::core::{DEFAULT_CHECK_ALIVE_TIMEOUT, DEFAULT_IDLE_SESSION_TIMEOUT};
use crate::transport::sleep_until_opt;

/// Connectivity of a media connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MediaConnectionState {
    /// Not started.
    #[default]
    New,
    /// ICE in progress.
    Connecting,
    /// Media is flowing.
    Connected,
    /// Connectivity lost, may recover.
    Disconnected,
    /// Connectivity failed.
    Failed,
    /// Closed locally.
    Closed,
}

/// Bridge configuration.
#[derive(Debug, Clone, Copy)]
pub struct BridgeConfig {
    /// Liveness probe timeout used on media disconnection.
    pub check_alive_timeout: Duration,

    /// Close the channel if media never connects within this window.
    pub idle_timeout: Option<Duration>,
}

impl BridgeConfig {
    /// Client defaults: no idle timer.
    pub fn client() -> Self {
        Self {
            check_alive_timeout: DEFAULT_CHECK_ALIVE_TIMEOUT,
            idle_timeout: None,
        }
    }

    /// Device defaults: idle sessions are closed.
    pub fn device() -> Self {
        Self {
            check_alive_timeout: DEFAULT_CHECK_ALIVE_TIMEOUT,
            idle_timeout: Some(DEFAULT_IDLE_SESSION_TIMEOUT),
        }
    }
}

/// Background task tying media connectivity to the signaling connection.
///
/// Stops when the media connection closes, the channel terminates, or the
/// bridge is dropped.
#[derive(Debug)]
pub struct ConnectivityBridge {
    task: JoinHandle<()>,
}

impl ConnectivityBridge {
    /// Start bridging.
    ///
    /// `events` comes from `SignalingClient::subscribe` or
    /// `SignalingDevice::subscribe`.
    pub fn spawn<M: MediaConnection>(
        config: BridgeConfig,
        channel: ChannelHandle,
        media: Arc<M>,
        media_state: watch::Receiver<MediaConnectionState>,
        events: broadcast::Receiver<ConnectionEvent>,
    ) -> Self {
        let task = tokio::spawn(run(config, channel, media, media_state, events));
        Self { task }
    }

    /// Whether the bridge task has ended.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for ConnectivityBridge {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run<M: MediaConnection>(
    config: BridgeConfig,
    channel: ChannelHandle,
    media: Arc<M>,
    mut media_state: watch::Receiver<MediaConnectionState>,
    mut events: broadcast::Receiver<ConnectionEvent>,
) {
    let mut channel_state = channel.watch_state();
    let mut idle_at = match *media_state.borrow_and_update() {
        MediaConnectionState::Connected => None,
        _ => config.idle_timeout.map(|t| Instant::now() + t),
    };
    let mut events_open = true;

    loop {
        tokio::select! {
            changed = media_state.changed() => {
                if changed.is_err() {
                    debug!("media connection dropped");
                    return;
                }
                let state = *media_state.borrow_and_update();
                debug!(channel = %channel.id(), ?state, "media state changed");
                match state {
                    MediaConnectionState::Connected => idle_at = None,
                    MediaConnectionState::Disconnected => {
                        channel.check_alive(config.check_alive_timeout);
                    }
                    MediaConnectionState::Failed => restart_ice(&*media).await,
                    MediaConnectionState::Closed => return,
                    MediaConnectionState::New | MediaConnectionState::Connecting => {}
                }
            }
            event = events.recv(), if events_open => match event {
                Ok(ConnectionEvent::Reconnected) => {
                    info!(channel = %channel.id(), "signaling reconnected, restarting ICE");
                    restart_ice(&*media).await;
                }
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => events_open = false,
            },
            changed = channel_state.changed() => {
                if changed.is_err() || channel_state.borrow_and_update().is_terminal() {
                    return;
                }
            }
            _ = sleep_until_opt(idle_at) => {
                info!(channel = %channel.id(), "media never connected, closing idle session");
                channel.close().await;
                return;
            }
        }
    }
}

async fn restart_ice<M: MediaConnection>(media: &M) {
    if let Err(e) = media.restart_ice().await {
        warn!("ICE restart failed: {}", e);
    }
}
