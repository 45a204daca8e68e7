/// In-memory peer link
///
/// Produces synthetic SDP and records every operation so the session can be
/// driven without a media engine. Remote events (candidates, streams) are
/// injected by the caller.

use crate::domain::session::media::{
    IceCandidate, MediaStream, MediaTrack, NegotiationOptions, PeerLinkConfig, SdpType,
    SessionDescription, TrackKind,
};
use crate::domain::session::peer_link::{
    PeerLink, PeerLinkEvent, PeerLinkEvents, PeerLinkFactory, ToneSender,
};
use crate::domain::session::tone::{DtmfOptions, Tone, ToneSequence};
use crate::domain::shared::error::PeerLinkError;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, Notify};
use tracing::debug;
use uuid::Uuid;

/// Failure injection for links created by a [`MemoryPeerLinkFactory`]
#[derive(Debug, Clone, Default)]
pub struct MemoryBehavior {
    pub fail_create: bool,
    pub fail_offer: bool,
    pub fail_answer: bool,
    pub fail_remote_description: bool,
    /// Block `set_remote_description` until `release_remote_description` is called
    pub hold_remote_description: bool,
    pub no_tone_sender: bool,
}

#[derive(Default)]
pub struct MemoryPeerLinkFactory {
    behavior: MemoryBehavior,
    links: Mutex<Vec<Arc<MemoryPeerLink>>>,
}

impl MemoryPeerLinkFactory {
    pub fn new(behavior: MemoryBehavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            links: Mutex::new(Vec::new()),
        })
    }

    /// Number of links created so far
    pub async fn created(&self) -> usize {
        self.links.lock().await.len()
    }

    /// Most recently created link
    pub async fn last(&self) -> Option<Arc<MemoryPeerLink>> {
        self.links.lock().await.last().cloned()
    }
}

#[async_trait]
impl PeerLinkFactory for MemoryPeerLinkFactory {
    async fn create(
        &self,
        config: &PeerLinkConfig,
    ) -> Result<(Arc<dyn PeerLink>, PeerLinkEvents), PeerLinkError> {
        if self.behavior.fail_create {
            return Err(PeerLinkError::Create("engine unavailable".to_string()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let link = Arc::new(MemoryPeerLink {
            config: config.clone(),
            behavior: self.behavior.clone(),
            events: Mutex::new(Some(tx)),
            local_streams: Mutex::new(Vec::new()),
            remote_streams: Mutex::new(Vec::new()),
            local_description: Mutex::new(None),
            remote_descriptions: Mutex::new(Vec::new()),
            release: Notify::new(),
            tone_requests: Arc::new(std::sync::Mutex::new(Vec::new())),
            closed: AtomicUsize::new(0),
        });

        self.links.lock().await.push(Arc::clone(&link));
        debug!(ice_servers = config.ice_servers.len(), "Created memory peer link");
        Ok((link, rx))
    }
}

pub struct MemoryPeerLink {
    config: PeerLinkConfig,
    behavior: MemoryBehavior,
    events: Mutex<Option<mpsc::UnboundedSender<PeerLinkEvent>>>,
    local_streams: Mutex<Vec<MediaStream>>,
    remote_streams: Mutex<Vec<MediaStream>>,
    local_description: Mutex<Option<SessionDescription>>,
    remote_descriptions: Mutex<Vec<SessionDescription>>,
    release: Notify,
    tone_requests: Arc<std::sync::Mutex<Vec<(String, DtmfOptions)>>>,
    closed: AtomicUsize,
}

impl MemoryPeerLink {
    pub fn config(&self) -> &PeerLinkConfig {
        &self.config
    }

    /// Let one held `set_remote_description` call complete
    pub fn release_remote_description(&self) {
        self.release.notify_one();
    }

    /// Report a gathered candidate; `None` ends gathering
    pub async fn emit_candidate(&self, candidate: Option<IceCandidate>) {
        self.emit(PeerLinkEvent::Candidate(candidate)).await;
    }

    /// Simulate media arriving from the remote party
    pub async fn emit_remote_stream(&self, stream: MediaStream) {
        self.remote_streams.lock().await.push(stream.clone());
        self.emit(PeerLinkEvent::RemoteStreamAdded(stream)).await;
    }

    pub async fn local_description(&self) -> Option<SessionDescription> {
        self.local_description.lock().await.clone()
    }

    /// Remote descriptions applied successfully, in order
    pub async fn remote_descriptions(&self) -> Vec<SessionDescription> {
        self.remote_descriptions.lock().await.clone()
    }

    /// Tone strings handed to the tone sender
    pub fn tone_requests(&self) -> Vec<(String, DtmfOptions)> {
        self.tone_requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }

    pub fn close_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    async fn emit(&self, event: PeerLinkEvent) {
        if let Some(tx) = self.events.lock().await.as_ref() {
            let _ = tx.send(event);
        }
    }

    async fn describe(&self, kind: SdpType) -> SessionDescription {
        let streams = self.local_streams.lock().await;
        let mut sdp = format!(
            "v=0\r\no=- {} 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n",
            Uuid::new_v4().as_u128() as u32
        );
        for track in streams.iter().flat_map(|stream| stream.tracks.iter()) {
            let media = match track.kind {
                TrackKind::Audio => "audio 9 UDP/TLS/RTP/SAVPF 111",
                TrackKind::Video => "video 9 UDP/TLS/RTP/SAVPF 96",
            };
            sdp.push_str(&format!("m={}\r\na=msid:- {}\r\n", media, track.id));
        }

        let description = SessionDescription { kind, sdp };
        *self.local_description.lock().await = Some(description.clone());
        description
    }
}

#[async_trait]
impl PeerLink for MemoryPeerLink {
    async fn add_local_stream(&self, stream: &MediaStream) -> Result<(), PeerLinkError> {
        if self.close_count() > 0 {
            return Err(PeerLinkError::Closed);
        }
        self.local_streams.lock().await.push(stream.clone());
        Ok(())
    }

    async fn remove_local_stream(&self, stream_id: &str) -> Result<(), PeerLinkError> {
        let mut streams = self.local_streams.lock().await;
        let before = streams.len();
        streams.retain(|stream| stream.id != stream_id);
        if streams.len() == before {
            return Err(PeerLinkError::Media(format!("unknown stream {}", stream_id)));
        }
        Ok(())
    }

    async fn local_streams(&self) -> Vec<MediaStream> {
        self.local_streams.lock().await.clone()
    }

    async fn remote_streams(&self) -> Vec<MediaStream> {
        self.remote_streams.lock().await.clone()
    }

    async fn create_offer(
        &self,
        _options: &NegotiationOptions,
    ) -> Result<SessionDescription, PeerLinkError> {
        if self.behavior.fail_offer {
            return Err(PeerLinkError::CreateDescription("offer rejected".to_string()));
        }
        Ok(self.describe(SdpType::Offer).await)
    }

    async fn create_answer(
        &self,
        _options: &NegotiationOptions,
    ) -> Result<SessionDescription, PeerLinkError> {
        if self.behavior.fail_answer {
            return Err(PeerLinkError::CreateDescription("answer rejected".to_string()));
        }
        if self.remote_descriptions.lock().await.is_empty() {
            return Err(PeerLinkError::CreateDescription(
                "no remote offer applied".to_string(),
            ));
        }
        Ok(self.describe(SdpType::Answer).await)
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), PeerLinkError> {
        if self.behavior.hold_remote_description {
            self.release.notified().await;
        }
        if self.behavior.fail_remote_description {
            return Err(PeerLinkError::ApplyRemote("malformed sdp".to_string()));
        }
        if !description.sdp.starts_with("v=") {
            return Err(PeerLinkError::ApplyRemote("not an sdp body".to_string()));
        }

        self.remote_descriptions.lock().await.push(description);
        Ok(())
    }

    async fn create_tone_sender(&self, track: &MediaTrack) -> Option<Arc<dyn ToneSender>> {
        if self.behavior.no_tone_sender {
            return None;
        }
        let events = self.events.lock().await.clone()?;

        debug!(track = %track.id, "Created memory tone sender");
        Some(Arc::new(MemoryToneSender {
            events,
            requests: Arc::clone(&self.tone_requests),
        }))
    }

    async fn close(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
        self.events.lock().await.take();
        self.remote_streams.lock().await.clear();
    }
}

/// Plays tones instantly, reporting each one as sent
struct MemoryToneSender {
    events: mpsc::UnboundedSender<PeerLinkEvent>,
    requests: Arc<std::sync::Mutex<Vec<(String, DtmfOptions)>>>,
}

impl ToneSender for MemoryToneSender {
    fn insert_tones(&self, tones: &ToneSequence, options: DtmfOptions) -> Result<(), PeerLinkError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push((tones.to_string(), options));
        }

        for tone in tones.tones().iter().filter(|tone| **tone != Tone::Pause) {
            self.events
                .send(PeerLinkEvent::ToneSent(tone.to_char().to_string()))
                .map_err(|_| PeerLinkError::Closed)?;
        }
        Ok(())
    }
}
