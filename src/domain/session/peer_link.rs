//! Peer link port
//!
//! The peer link is the local media-negotiation engine (ICE, DTLS, codecs).
//! The session drives it through this trait and receives its asynchronous
//! notifications through a [`PeerLinkEvents`] channel handed out at creation.

use crate::domain::session::media::{
    IceCandidate, MediaStream, MediaTrack, NegotiationOptions, PeerLinkConfig, SessionDescription,
};
use crate::domain::session::tone::{DtmfOptions, ToneSequence};
use crate::domain::shared::error::PeerLinkError;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Notifications pushed by the engine
#[derive(Debug, Clone, PartialEq)]
pub enum PeerLinkEvent {
    /// A locally discovered candidate; `None` marks the end of gathering
    Candidate(Option<IceCandidate>),
    /// The remote party started sending a stream
    RemoteStreamAdded(MediaStream),
    /// A queued DTMF tone finished playing
    ToneSent(String),
}

pub type PeerLinkEvents = mpsc::UnboundedReceiver<PeerLinkEvent>;

#[async_trait]
pub trait PeerLink: Send + Sync {
    /// Attach a local stream so its tracks are offered to the remote side
    async fn add_local_stream(&self, stream: &MediaStream) -> Result<(), PeerLinkError>;

    /// Detach a previously attached local stream
    async fn remove_local_stream(&self, stream_id: &str) -> Result<(), PeerLinkError>;

    async fn local_streams(&self) -> Vec<MediaStream>;

    async fn remote_streams(&self) -> Vec<MediaStream>;

    /// Generate an offer and install it as the local description
    async fn create_offer(
        &self,
        options: &NegotiationOptions,
    ) -> Result<SessionDescription, PeerLinkError>;

    /// Generate an answer to the applied remote offer and install it locally
    async fn create_answer(
        &self,
        options: &NegotiationOptions,
    ) -> Result<SessionDescription, PeerLinkError>;

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), PeerLinkError>;

    /// `None` when the engine cannot inject tones on this track
    async fn create_tone_sender(&self, track: &MediaTrack) -> Option<Arc<dyn ToneSender>>;

    /// Release all local and remote tracks and the engine itself
    async fn close(&self);
}

/// DTMF sender bound to one local audio track
pub trait ToneSender: Send + Sync {
    fn insert_tones(&self, tones: &ToneSequence, options: DtmfOptions) -> Result<(), PeerLinkError>;
}

#[async_trait]
pub trait PeerLinkFactory: Send + Sync {
    async fn create(
        &self,
        config: &PeerLinkConfig,
    ) -> Result<(Arc<dyn PeerLink>, PeerLinkEvents), PeerLinkError>;
}
