//! Peer link backed by webrtc-rs
//!
//! Local tracks are sample tracks (Opus for audio, VP8 for video) that the
//! application feeds separately. webrtc-rs has no DTMF sender, so
//! `create_tone_sender` always reports that tones are unsupported.

use crate::domain::session::media::{
    IceCandidate, IceServer, MediaStream, MediaTrack, NegotiationOptions, PeerLinkConfig,
    SdpType, SessionDescription, TrackKind,
};
use crate::domain::session::peer_link::{
    PeerLink, PeerLinkEvent, PeerLinkEvents, PeerLinkFactory, ToneSender,
};
use crate::domain::shared::error::PeerLinkError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::offer_answer_options::{RTCAnswerOptions, RTCOfferOptions};
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::{RTCRtpTransceiver, RTCRtpTransceiverInit};
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

/// Creates one `RTCPeerConnection` per session
#[derive(Debug, Default, Clone, Copy)]
pub struct WebRtcPeerLinkFactory;

impl WebRtcPeerLinkFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

fn rtc_ice_server(server: &IceServer) -> RTCIceServer {
    RTCIceServer {
        urls: server.urls.clone(),
        username: server.username.clone().unwrap_or_default(),
        credential: server.credential.clone().unwrap_or_default(),
        ..Default::default()
    }
}

fn codec_capability(kind: TrackKind) -> RTCRtpCodecCapability {
    match kind {
        TrackKind::Audio => RTCRtpCodecCapability {
            mime_type: "audio/opus".to_string(),
            clock_rate: 48000,
            channels: 2,
            sdp_fmtp_line: "minptime=10;useinbandfec=1".to_string(),
            rtcp_feedback: vec![],
        },
        TrackKind::Video => RTCRtpCodecCapability {
            mime_type: "video/VP8".to_string(),
            clock_rate: 90000,
            channels: 0,
            sdp_fmtp_line: String::new(),
            rtcp_feedback: vec![],
        },
    }
}

fn to_candidate(candidate: &RTCIceCandidate) -> Option<IceCandidate> {
    match candidate.to_json() {
        Ok(init) => Some(IceCandidate {
            candidate: init.candidate,
            sdp_mid: init.sdp_mid,
            sdp_m_line_index: init.sdp_mline_index,
        }),
        Err(e) => {
            warn!("Failed to serialize ICE candidate: {}", e);
            None
        }
    }
}

#[async_trait]
impl PeerLinkFactory for WebRtcPeerLinkFactory {
    async fn create(
        &self,
        config: &PeerLinkConfig,
    ) -> Result<(Arc<dyn PeerLink>, PeerLinkEvents), PeerLinkError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| PeerLinkError::Create(format!("Failed to register codecs: {}", e)))?;

        let registry = register_default_interceptors(Default::default(), &mut media_engine)
            .map_err(|e| PeerLinkError::Create(format!("Failed to register interceptors: {}", e)))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: config.ice_servers.iter().map(rtc_ice_server).collect(),
            ..Default::default()
        };

        let peer_connection = Arc::new(
            api.new_peer_connection(rtc_config)
                .await
                .map_err(|e| PeerLinkError::Create(e.to_string()))?,
        );

        let (tx, rx) = mpsc::unbounded_channel();
        let remote_streams = Arc::new(Mutex::new(Vec::<MediaStream>::new()));

        // Trickle gathered candidates; `None` marks the end of gathering
        let candidate_tx = tx.clone();
        peer_connection.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let tx = candidate_tx.clone();
            Box::pin(async move {
                let event = match candidate {
                    Some(candidate) => match to_candidate(&candidate) {
                        Some(candidate) => PeerLinkEvent::Candidate(Some(candidate)),
                        None => return,
                    },
                    None => PeerLinkEvent::Candidate(None),
                };
                let _ = tx.send(event);
            })
        }));

        let track_tx = tx;
        let track_streams = Arc::clone(&remote_streams);
        peer_connection.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let tx = track_tx.clone();
                let streams = Arc::clone(&track_streams);
                Box::pin(async move {
                    let media = MediaTrack {
                        id: track.id(),
                        kind: match track.kind() {
                            RTPCodecType::Video => TrackKind::Video,
                            _ => TrackKind::Audio,
                        },
                    };
                    let stream_id = track.stream_id();
                    debug!(stream = %stream_id, track = %media.id, "Remote track");

                    let mut streams = streams.lock().await;
                    if let Some(stream) = streams.iter_mut().find(|s| s.id == stream_id) {
                        stream.tracks.push(media);
                        return;
                    }
                    let stream = MediaStream::new(stream_id, vec![media]);
                    streams.push(stream.clone());
                    let _ = tx.send(PeerLinkEvent::RemoteStreamAdded(stream));
                })
            },
        ));

        info!(ice_servers = config.ice_servers.len(), "Created WebRTC peer link");

        let link = WebRtcPeerLink {
            peer_connection,
            local_streams: Mutex::new(Vec::new()),
            senders: Mutex::new(HashMap::new()),
            remote_streams,
        };
        Ok((Arc::new(link), rx))
    }
}

pub struct WebRtcPeerLink {
    peer_connection: Arc<RTCPeerConnection>,
    local_streams: Mutex<Vec<MediaStream>>,
    /// RTP senders per local stream id
    senders: Mutex<HashMap<String, Vec<Arc<RTCRtpSender>>>>,
    remote_streams: Arc<Mutex<Vec<MediaStream>>>,
}

impl WebRtcPeerLink {
    /// Add receive-only transceivers for kinds requested but not sent locally
    async fn ensure_receivers(&self, options: &NegotiationOptions) -> Result<(), PeerLinkError> {
        let local = self.local_streams.lock().await;
        let sends = |kind: TrackKind| {
            local
                .iter()
                .flat_map(|stream| stream.tracks.iter())
                .any(|track| track.kind == kind)
        };

        let mut wanted = Vec::new();
        if options.offer_to_receive_audio && !sends(TrackKind::Audio) {
            wanted.push(RTPCodecType::Audio);
        }
        if options.offer_to_receive_video && !sends(TrackKind::Video) {
            wanted.push(RTPCodecType::Video);
        }
        drop(local);

        for kind in wanted {
            let already = self
                .peer_connection
                .get_transceivers()
                .await
                .iter()
                .any(|t| t.kind() == kind);
            if already {
                continue;
            }

            self.peer_connection
                .add_transceiver_from_kind(
                    kind,
                    Some(RTCRtpTransceiverInit {
                        direction: RTCRtpTransceiverDirection::Recvonly,
                        send_encodings: vec![],
                    }),
                )
                .await
                .map_err(|e| PeerLinkError::Media(e.to_string()))?;
        }
        Ok(())
    }

    async fn install_local(
        &self,
        description: RTCSessionDescription,
    ) -> Result<SessionDescription, PeerLinkError> {
        let kind = match description.sdp_type {
            RTCSdpType::Answer => SdpType::Answer,
            _ => SdpType::Offer,
        };
        let sdp = description.sdp.clone();

        self.peer_connection
            .set_local_description(description)
            .await
            .map_err(|e| PeerLinkError::CreateDescription(e.to_string()))?;

        Ok(SessionDescription { kind, sdp })
    }
}

#[async_trait]
impl PeerLink for WebRtcPeerLink {
    async fn add_local_stream(&self, stream: &MediaStream) -> Result<(), PeerLinkError> {
        let mut senders = Vec::with_capacity(stream.tracks.len());

        for track in &stream.tracks {
            let local = Arc::new(TrackLocalStaticSample::new(
                codec_capability(track.kind),
                track.id.clone(),
                stream.id.clone(),
            ));
            let sender = self
                .peer_connection
                .add_track(local as Arc<dyn TrackLocal + Send + Sync>)
                .await
                .map_err(|e| PeerLinkError::Media(format!("Failed to add track {}: {}", track.id, e)))?;
            senders.push(sender);
        }

        debug!(stream = %stream.id, tracks = senders.len(), "Local stream added");
        self.senders.lock().await.insert(stream.id.clone(), senders);
        self.local_streams.lock().await.push(stream.clone());
        Ok(())
    }

    async fn remove_local_stream(&self, stream_id: &str) -> Result<(), PeerLinkError> {
        let senders = self
            .senders
            .lock()
            .await
            .remove(stream_id)
            .ok_or_else(|| PeerLinkError::Media(format!("unknown stream {}", stream_id)))?;

        for sender in senders {
            self.peer_connection
                .remove_track(&sender)
                .await
                .map_err(|e| PeerLinkError::Media(e.to_string()))?;
        }
        self.local_streams
            .lock()
            .await
            .retain(|stream| stream.id != stream_id);
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
        options: &NegotiationOptions,
    ) -> Result<SessionDescription, PeerLinkError> {
        self.ensure_receivers(options).await?;

        let offer = self
            .peer_connection
            .create_offer(Some(RTCOfferOptions {
                voice_activity_detection: options.voice_activity_detection,
                ice_restart: options.ice_restart,
            }))
            .await
            .map_err(|e| PeerLinkError::CreateDescription(e.to_string()))?;

        self.install_local(offer).await
    }

    async fn create_answer(
        &self,
        options: &NegotiationOptions,
    ) -> Result<SessionDescription, PeerLinkError> {
        let answer = self
            .peer_connection
            .create_answer(Some(RTCAnswerOptions {
                voice_activity_detection: options.voice_activity_detection,
            }))
            .await
            .map_err(|e| PeerLinkError::CreateDescription(e.to_string()))?;

        self.install_local(answer).await
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), PeerLinkError> {
        let remote = match description.kind {
            SdpType::Offer => RTCSessionDescription::offer(description.sdp),
            SdpType::Answer => RTCSessionDescription::answer(description.sdp),
        }
        .map_err(|e| PeerLinkError::ApplyRemote(e.to_string()))?;

        self.peer_connection
            .set_remote_description(remote)
            .await
            .map_err(|e| PeerLinkError::ApplyRemote(e.to_string()))
    }

    async fn create_tone_sender(&self, track: &MediaTrack) -> Option<Arc<dyn ToneSender>> {
        debug!(track = %track.id, "DTMF is not supported by this engine");
        None
    }

    async fn close(&self) {
        if let Err(e) = self.peer_connection.close().await {
            warn!("Failed to close peer connection: {}", e);
        }
        self.senders.lock().await.clear();
        self.local_streams.lock().await.clear();
        self.remote_streams.lock().await.clear();
    }
}
