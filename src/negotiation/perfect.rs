//! Perfect negotiation.
//!
//! Both peers may start an offer at any time. On a collision the polite
//! peer yields and the impolite peer ignores the incoming offer. The device
//! is always polite and the client always impolite.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::message::{IceCandidate, SdpType, SessionDescription, SignalingMessage};
use crate::channel::ChannelHandle;
use crate::core::NegotiationError;

/// Offer/answer state of a media connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignalingState {
    /// No negotiation in progress.
    #[default]
    Stable,
    /// A local offer is applied.
    HaveLocalOffer,
    /// A remote offer is applied.
    HaveRemoteOffer,
    /// A local provisional answer is applied.
    HaveLocalPranswer,
    /// A remote provisional answer is applied.
    HaveRemotePranswer,
    /// The connection is closed.
    Closed,
}

/// The native media connection under negotiation.
///
/// Implementations wrap a WebRTC peer connection. The semantics follow the
/// browser API: `set_local_description` creates and applies an offer or an
/// answer depending on the current state, and applying a remote offer in
/// `HaveLocalOffer` rolls the local offer back.
#[async_trait]
pub trait MediaConnection: Send + Sync + 'static {
    /// Current offer/answer state.
    fn signaling_state(&self) -> SignalingState;

    /// Create and apply a local offer or answer, returning it.
    async fn set_local_description(&self) -> Result<SessionDescription, NegotiationError>;

    /// Apply a remote offer or answer.
    async fn set_remote_description(&self, description: SessionDescription) -> Result<(), NegotiationError>;

    /// Add a remote ICE candidate.
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), NegotiationError>;

    /// Restart ICE. The connection will ask for renegotiation afterwards.
    async fn restart_ice(&self) -> Result<(), NegotiationError>;
}

/// Outbound path for negotiation messages.
#[async_trait]
pub trait SignalingSink: Send + Sync + 'static {
    /// Send one negotiation message to the remote peer.
    async fn send(&self, message: SignalingMessage) -> Result<(), NegotiationError>;
}

#[async_trait]
impl SignalingSink for ChannelHandle {
    async fn send(&self, message: SignalingMessage) -> Result<(), NegotiationError> {
        self.send_message(message.to_value())
            .await
            .map_err(|e| NegotiationError::Signaling(e.to_string()))
    }
}

#[async_trait]
impl SignalingSink for tokio::sync::mpsc::UnboundedSender<SignalingMessage> {
    async fn send(&self, message: SignalingMessage) -> Result<(), NegotiationError> {
        tokio::sync::mpsc::UnboundedSender::send(self, message)
            .map_err(|_| NegotiationError::Signaling("receiver dropped".into()))
    }
}

#[derive(Debug, Default)]
struct Flags {
    making_offer: bool,
    ignore_offer: bool,
}

/// Perfect negotiation over one media connection.
///
/// Methods take `&self` so that a remote offer can be handled while a local
/// offer is still being created.
pub struct PerfectNegotiation<M> {
    media: Arc<M>,
    sink: Arc<dyn SignalingSink>,
    polite: bool,
    flags: Mutex<Flags>,
}

impl<M> std::fmt::Debug for PerfectNegotiation<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PerfectNegotiation")
            .field("polite", &self.polite)
            .field("flags", &*self.flags.lock())
            .finish_non_exhaustive()
    }
}

impl<M: MediaConnection> PerfectNegotiation<M> {
    /// Negotiation for the polite side.
    pub fn polite(media: Arc<M>, sink: Arc<dyn SignalingSink>) -> Self {
        Self::new(media, sink, true)
    }

    /// Negotiation for the impolite side.
    pub fn impolite(media: Arc<M>, sink: Arc<dyn SignalingSink>) -> Self {
        Self::new(media, sink, false)
    }

    fn new(media: Arc<M>, sink: Arc<dyn SignalingSink>, polite: bool) -> Self {
        Self {
            media,
            sink,
            polite,
            flags: Mutex::new(Flags::default()),
        }
    }

    /// Whether this side yields on collision.
    pub fn is_polite(&self) -> bool {
        self.polite
    }

    /// The media connection under negotiation.
    pub fn media(&self) -> &Arc<M> {
        &self.media
    }

    /// Whether the last remote offer was ignored.
    pub fn is_ignoring_offer(&self) -> bool {
        self.flags.lock().ignore_offer
    }

    /// The media connection needs (re)negotiation: create and send an offer.
    pub async fn on_negotiation_needed(&self) -> Result<(), NegotiationError> {
        self.flags.lock().making_offer = true;
        let result = self.media.set_local_description().await;
        self.flags.lock().making_offer = false;

        let description = result?;
        self.sink.send(SignalingMessage::Description { description }).await
    }

    /// Send a local ICE candidate.
    pub async fn on_local_candidate(&self, candidate: IceCandidate) -> Result<(), NegotiationError> {
        self.sink.send(SignalingMessage::Candidate { candidate }).await
    }

    /// Apply a remote description, answering offers.
    pub async fn on_description(&self, description: SessionDescription) -> Result<(), NegotiationError> {
        let is_offer = description.kind == SdpType::Offer;
        {
            let mut flags = self.flags.lock();
            let collision =
                is_offer && (flags.making_offer || self.media.signaling_state() != SignalingState::Stable);
            flags.ignore_offer = !self.polite && collision;
            if flags.ignore_offer {
                debug!("ignoring colliding offer");
                return Ok(());
            }
            if collision {
                debug!("offer collision, yielding");
            }
        }

        self.media.set_remote_description(description).await?;
        if is_offer {
            let answer = self.media.set_local_description().await?;
            self.sink
                .send(SignalingMessage::Description { description: answer })
                .await?;
        }
        Ok(())
    }

    /// Add a remote ICE candidate. Failures are suppressed while an offer
    /// is being ignored.
    pub async fn on_candidate(&self, candidate: IceCandidate) -> Result<(), NegotiationError> {
        match self.media.add_ice_candidate(candidate).await {
            Ok(()) => Ok(()),
            Err(e) if self.is_ignoring_offer() => {
                debug!("suppressed candidate error: {}", e);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Restart ICE on the media connection.
    pub async fn restart_ice(&self) {
        if let Err(e) = self.media.restart_ice().await {
            warn!("ICE restart failed: {}", e);
        }
    }
}
