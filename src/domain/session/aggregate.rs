//! Session aggregate root
//!
//! A `Session` drives one call from creation to termination. Inbound remote
//! events and user actions run as short handlers serialized by the session
//! lock; peer link operations run in spawned continuations that re-check
//! `terminated` and `terminating` before touching state or sending anything.

use crate::config::SessionConfig;
use crate::domain::session::account::{AccountContext, SessionRegistry};
use crate::domain::session::event::{SessionEvent, SessionEventKind, StreamOrigin};
use crate::domain::session::media::{
    CallOptions, IceCandidate, MediaStream, NegotiationOptions, SessionDescription,
};
use crate::domain::session::peer_link::{
    PeerLink, PeerLinkEvent, PeerLinkEvents, PeerLinkFactory, ToneSender,
};
use crate::domain::session::signaling::{RemoteState, RemoteStateEvent, SignalingMessage};
use crate::domain::session::tone::{DtmfOptions, ToneSequence};
use crate::domain::session::value_object::{SessionDirection, SessionState, TerminationReason};
use crate::domain::shared::error::SessionError;
use crate::domain::shared::events::DomainEvent;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{Address, Identity, SessionId};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

/// Collaborators injected into every session
#[derive(Clone)]
pub struct SessionContext {
    pub account: Arc<dyn AccountContext>,
    pub registry: Arc<dyn SessionRegistry>,
    pub peer_links: Arc<dyn PeerLinkFactory>,
    pub config: SessionConfig,
}

struct SessionInner {
    id: Option<SessionId>,
    state: SessionState,
    remote_identity: Option<Identity>,
    /// Offer from the invite, consumed by `answer`
    pending_remote_offer: Option<String>,
    peer_link: Option<Arc<dyn PeerLink>>,
    tone_sender: Option<Arc<dyn ToneSender>>,
    /// Write-once; every teardown path checks it
    terminated: bool,
    /// `session-terminate` already requested
    terminating: bool,
    negotiation_in_flight: bool,
    deferred_established: bool,
    /// Failure that started a signaled termination; wins over the final reason
    failure: Option<TerminationReason>,
    local_description_sent: bool,
    /// Candidates gathered before our offer/answer went out
    pending_candidates: Vec<Option<IceCandidate>>,
}

pub struct Session {
    direction: SessionDirection,
    local_identity: Identity,
    context: SessionContext,
    inner: Mutex<SessionInner>,
    events: broadcast::Sender<SessionEvent>,
}

fn label(id: &Option<SessionId>) -> &str {
    id.as_ref().map(SessionId::as_str).unwrap_or("-")
}

fn trickle(id: &SessionId, candidate: Option<IceCandidate>) -> SignalingMessage {
    SignalingMessage::SessionTrickle {
        session: id.clone(),
        candidates: candidate.into_iter().collect(),
    }
}

impl Session {
    /// Create a session in the `Null` state
    pub fn new(context: SessionContext, direction: SessionDirection) -> Arc<Self> {
        let (events, _) = broadcast::channel(context.config.event_capacity.max(1));
        let local_identity = context.account.identity();

        Arc::new(Self {
            direction,
            local_identity,
            context,
            inner: Mutex::new(SessionInner {
                id: None,
                state: SessionState::Null,
                remote_identity: None,
                pending_remote_offer: None,
                peer_link: None,
                tone_sender: None,
                terminated: false,
                terminating: false,
                negotiation_in_flight: false,
                deferred_established: false,
                failure: None,
                local_description_sent: false,
                pending_candidates: Vec::new(),
            }),
            events,
        })
    }

    /// Subscribe to notifications
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    // Getters
    pub fn direction(&self) -> SessionDirection {
        self.direction
    }

    pub fn local_identity(&self) -> &Identity {
        &self.local_identity
    }

    pub async fn id(&self) -> Option<SessionId> {
        self.inner.lock().await.id.clone()
    }

    pub async fn state(&self) -> SessionState {
        self.inner.lock().await.state
    }

    pub async fn remote_identity(&self) -> Option<Identity> {
        self.inner.lock().await.remote_identity.clone()
    }

    pub async fn is_terminated(&self) -> bool {
        self.inner.lock().await.terminated
    }

    /// Terminated, or waiting for the remote side to confirm termination
    async fn is_winding_down(&self) -> bool {
        let inner = self.inner.lock().await;
        inner.terminated || inner.terminating
    }

    /// Whether a remote answer is currently being applied
    pub async fn is_negotiating(&self) -> bool {
        self.inner.lock().await.negotiation_in_flight
    }

    pub async fn local_streams(&self) -> Vec<MediaStream> {
        match self.peer_link().await {
            Some(peer) => peer.local_streams().await,
            None => Vec::new(),
        }
    }

    pub async fn remote_streams(&self) -> Vec<MediaStream> {
        match self.peer_link().await {
            Some(peer) => peer.remote_streams().await,
            None => Vec::new(),
        }
    }

    async fn peer_link(&self) -> Option<Arc<dyn PeerLink>> {
        self.inner.lock().await.peer_link.clone()
    }

    /// Record an incoming invite
    pub async fn initiate_incoming(
        &self,
        id: SessionId,
        caller: Identity,
        offer_sdp: String,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        self.ensure_initiation(&inner, SessionDirection::Incoming)?;

        info!(session = %id, caller = %caller, "Incoming session");
        inner.id = Some(id);
        inner.remote_identity = Some(caller);
        inner.pending_remote_offer = Some(offer_sdp);
        self.transition(&mut inner, SessionState::Incoming, None);

        Ok(())
    }

    /// Place a call to `uri`
    ///
    /// Fails before creating a peer link or sending anything if the address is
    /// not `user@host` or no local stream is given. The offer is generated and
    /// sent in the background; failures there terminate the session.
    pub async fn initiate_outgoing(
        self: &Arc<Self>,
        uri: &str,
        local_stream: Option<MediaStream>,
        options: CallOptions,
    ) -> Result<SessionId> {
        let address = Address::parse(uri)?;
        let local_stream = local_stream.ok_or(SessionError::MissingLocalStream)?;

        let mut inner = self.inner.lock().await;
        self.ensure_initiation(&inner, SessionDirection::Outgoing)?;

        let peer = self.init_peer_link(&mut inner, &options).await?;
        let id = SessionId::generate();

        info!(session = %id, to = %address, "Outgoing session");
        inner.id = Some(id.clone());
        inner.remote_identity = Some(Identity::new(address.to_string(), None));
        self.transition(&mut inner, SessionState::OutgoingPending, None);
        drop(inner);

        let session = Arc::clone(self);
        let session_id = id.clone();
        tokio::spawn(async move {
            session
                .negotiate_offer(peer, session_id, address, local_stream, options.negotiation)
                .await;
        });

        Ok(id)
    }

    /// Answer an incoming session
    pub async fn answer(
        self: &Arc<Self>,
        local_stream: Option<MediaStream>,
        options: CallOptions,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;

        if inner.terminated || inner.state != SessionState::Incoming {
            return Err(SessionError::InvalidState(format!(
                "cannot answer a session in state {}",
                inner.state
            )));
        }
        let local_stream = local_stream.ok_or(SessionError::MissingLocalStream)?;
        if inner.peer_link.is_some() {
            return Err(SessionError::PeerLinkAlreadyInitialized);
        }
        if inner.pending_remote_offer.is_none() {
            return Err(SessionError::InvalidState(
                "no remote offer to answer".to_string(),
            ));
        }

        let peer = self.init_peer_link(&mut inner, &options).await?;
        let offer = inner.pending_remote_offer.take().unwrap_or_default();
        info!(session = %label(&inner.id), "Answering session");
        drop(inner);

        let session = Arc::clone(self);
        tokio::spawn(async move {
            session
                .negotiate_answer(peer, offer, local_stream, options.negotiation)
                .await;
        });

        Ok(())
    }

    /// Terminate the session
    ///
    /// Sends `session-terminate` and forces local termination if nothing
    /// finalizes the session within the configured timeout. Calling it again
    /// has no effect.
    pub async fn terminate(self: &Arc<Self>) {
        self.terminate_with(None).await;
    }

    /// Queue DTMF tones on the first local audio track
    ///
    /// Silently does nothing when there is no peer link, no local audio track
    /// or the engine cannot send tones.
    pub async fn send_dtmf(&self, tones: &str, options: Option<DtmfOptions>) -> Result<()> {
        let sequence = ToneSequence::parse(tones)?;
        if sequence.is_empty() {
            return Ok(());
        }

        let mut inner = self.inner.lock().await;
        if inner.terminated {
            debug!(session = %label(&inner.id), "Ignoring DTMF after termination");
            return Ok(());
        }
        let Some(peer) = inner.peer_link.clone() else {
            debug!(session = %label(&inner.id), "No peer link, DTMF ignored");
            return Ok(());
        };

        if inner.tone_sender.is_none() {
            let track = peer
                .local_streams()
                .await
                .iter()
                .find_map(|stream| stream.first_audio_track().cloned());

            match track {
                Some(track) => inner.tone_sender = peer.create_tone_sender(&track).await,
                None => {
                    debug!(session = %label(&inner.id), "No local audio track, DTMF ignored");
                    return Ok(());
                }
            }
        }

        let Some(sender) = inner.tone_sender.clone() else {
            debug!(session = %label(&inner.id), "Peer link has no tone sender, DTMF ignored");
            return Ok(());
        };

        let options = options.unwrap_or_else(|| self.context.config.dtmf_options());
        debug!(session = %label(&inner.id), tones = %sequence, "Sending DTMF");
        sender
            .insert_tones(&sequence, options)
            .map_err(|e| SessionError::PeerLink(e.to_string()))
    }

    /// Fold a remote `state` event into the session
    pub async fn handle_state_event(self: &Arc<Self>, event: RemoteStateEvent) {
        if let Some(id) = self.id().await {
            if id != event.session {
                warn!(session = %id, other = %event.session, "State event for another session");
                return;
            }
        }

        match event.state {
            RemoteState::Accepted => self.on_accepted(event.sdp).await,
            RemoteState::Established => self.on_established().await,
            RemoteState::Terminated => {
                self.finish(TerminationReason::Remote(event.reason)).await;
            }
            RemoteState::Unknown => {
                debug!(session = %event.session, "Ignoring unknown remote state");
            }
        }
    }

    async fn on_accepted(self: &Arc<Self>, sdp: Option<String>) {
        let negotiation = {
            let mut inner = self.inner.lock().await;
            if inner.terminated || inner.terminating {
                debug!(session = %label(&inner.id), "Ignoring accepted while terminating");
                return;
            }
            if !self.transition(&mut inner, SessionState::Accepted, None) {
                return;
            }
            if self.direction == SessionDirection::Incoming {
                return;
            }

            match (sdp, inner.peer_link.clone()) {
                (Some(sdp), Some(peer)) => {
                    inner.negotiation_in_flight = true;
                    Ok((peer, sdp))
                }
                (None, _) => Err(SessionError::Negotiation(
                    "accepted without an answer description".to_string(),
                )),
                (_, None) => Err(SessionError::Negotiation("no peer link".to_string())),
            }
        };

        match negotiation {
            Ok((peer, sdp)) => {
                let session = Arc::clone(self);
                tokio::spawn(async move {
                    session.apply_remote_answer(peer, sdp).await;
                });
            }
            Err(err) => {
                self.terminate_with(Some(TerminationReason::Failed(err)))
                    .await;
            }
        }
    }

    async fn on_established(&self) {
        let mut inner = self.inner.lock().await;
        if inner.terminated || inner.terminating {
            debug!(session = %label(&inner.id), "Ignoring established while terminating");
            return;
        }

        if inner.negotiation_in_flight {
            debug!(
                session = %label(&inner.id),
                "Established before the remote answer was applied, deferring"
            );
            inner.deferred_established = true;
            return;
        }

        if self.direction == SessionDirection::Outgoing && inner.state != SessionState::Accepted {
            warn!(
                session = %label(&inner.id),
                state = %inner.state,
                "Established without a prior accept, ignoring"
            );
            return;
        }

        self.transition(&mut inner, SessionState::Established, None);
    }

    async fn apply_remote_answer(self: Arc<Self>, peer: Arc<dyn PeerLink>, sdp: String) {
        let result = peer
            .set_remote_description(SessionDescription::answer(sdp))
            .await;

        let mut inner = self.inner.lock().await;
        inner.negotiation_in_flight = false;
        if inner.terminated || inner.terminating {
            inner.deferred_established = false;
            debug!(session = %label(&inner.id), "Remote answer applied after termination");
            return;
        }

        match result {
            Ok(()) => {
                debug!(session = %label(&inner.id), "Remote answer applied");
                if std::mem::take(&mut inner.deferred_established) {
                    self.transition(&mut inner, SessionState::Established, None);
                }
            }
            Err(err) => {
                inner.deferred_established = false;
                warn!(session = %label(&inner.id), error = %err, "Failed to apply remote answer");
                drop(inner);
                self.terminate_with(Some(TerminationReason::Failed(
                    SessionError::Negotiation(err.to_string()),
                )))
                .await;
            }
        }
    }

    async fn negotiate_offer(
        self: Arc<Self>,
        peer: Arc<dyn PeerLink>,
        id: SessionId,
        address: Address,
        local_stream: MediaStream,
        options: NegotiationOptions,
    ) {
        // The remote party does not know about us yet: failures stay local
        if let Err(err) = self.attach_local_stream(&peer, local_stream).await {
            self.finish(TerminationReason::Failed(err)).await;
            return;
        }
        if self.is_winding_down().await {
            return;
        }

        let offer = match peer.create_offer(&options).await {
            Ok(offer) => offer,
            Err(err) => {
                warn!(session = %id, error = %err, "Failed to create offer");
                self.finish(TerminationReason::Failed(SessionError::Negotiation(
                    err.to_string(),
                )))
                .await;
                return;
            }
        };

        self.send_local_description(SignalingMessage::SessionCreate {
            account: self.context.account.account_id(),
            session: id,
            uri: address.to_string(),
            sdp: offer.sdp,
        })
        .await;
    }

    async fn negotiate_answer(
        self: Arc<Self>,
        peer: Arc<dyn PeerLink>,
        offer: String,
        local_stream: MediaStream,
        options: NegotiationOptions,
    ) {
        // The remote party knows this session: failures go through terminate
        if let Err(err) = self.attach_local_stream(&peer, local_stream).await {
            self.terminate_with(Some(TerminationReason::Failed(err))).await;
            return;
        }
        if self.is_winding_down().await {
            return;
        }

        if let Err(err) = peer
            .set_remote_description(SessionDescription::offer(offer))
            .await
        {
            warn!(error = %err, "Failed to apply remote offer");
            self.terminate_with(Some(TerminationReason::Failed(SessionError::Negotiation(
                err.to_string(),
            ))))
            .await;
            return;
        }
        if self.is_winding_down().await {
            return;
        }

        let answer = match peer.create_answer(&options).await {
            Ok(answer) => answer,
            Err(err) => {
                warn!(error = %err, "Failed to create answer");
                self.terminate_with(Some(TerminationReason::Failed(
                    SessionError::Negotiation(err.to_string()),
                )))
                .await;
                return;
            }
        };

        let Some(id) = self.id().await else {
            return;
        };
        self.send_local_description(SignalingMessage::SessionAnswer {
            session: id,
            sdp: answer.sdp,
        })
        .await;
    }

    async fn attach_local_stream(
        &self,
        peer: &Arc<dyn PeerLink>,
        stream: MediaStream,
    ) -> Result<()> {
        if self.is_winding_down().await {
            return Ok(());
        }

        peer.add_local_stream(&stream)
            .await
            .map_err(|e| SessionError::PeerLink(e.to_string()))?;

        let id = self.id().await;
        debug!(session = %label(&id), stream = %stream.id, "Local stream attached");
        self.emit(
            id,
            SessionEventKind::StreamAdded {
                origin: StreamOrigin::Local,
                stream,
            },
        );
        Ok(())
    }

    fn ensure_initiation(&self, inner: &SessionInner, direction: SessionDirection) -> Result<()> {
        if self.direction != direction {
            return Err(SessionError::InvalidState(format!(
                "session was created as {:?}",
                self.direction
            )));
        }
        if inner.state != SessionState::Null {
            return Err(SessionError::InvalidState(format!(
                "session already initiated ({})",
                inner.state
            )));
        }
        Ok(())
    }

    async fn init_peer_link(
        self: &Arc<Self>,
        inner: &mut SessionInner,
        options: &CallOptions,
    ) -> Result<Arc<dyn PeerLink>> {
        if inner.peer_link.is_some() {
            return Err(SessionError::PeerLinkAlreadyInitialized);
        }

        let config = self.context.config.peer_link_config(options);
        let (peer, events) = self
            .context
            .peer_links
            .create(&config)
            .await
            .map_err(|e| SessionError::PeerLink(e.to_string()))?;

        inner.peer_link = Some(Arc::clone(&peer));
        self.spawn_peer_events(events);
        Ok(peer)
    }

    fn spawn_peer_events(self: &Arc<Self>, mut events: PeerLinkEvents) {
        let session = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if session.is_terminated().await {
                    debug!("Dropping peer link events after termination");
                    break;
                }
                session.on_peer_event(event).await;
            }
        });
    }

    async fn on_peer_event(&self, event: PeerLinkEvent) {
        match event {
            PeerLinkEvent::Candidate(candidate) => self.on_candidate(candidate).await,
            PeerLinkEvent::RemoteStreamAdded(stream) => {
                let id = self.id().await;
                debug!(session = %label(&id), stream = %stream.id, "Remote stream added");
                self.emit(
                    id,
                    SessionEventKind::StreamAdded {
                        origin: StreamOrigin::Remote,
                        stream,
                    },
                );
            }
            PeerLinkEvent::ToneSent(tone) => {
                let id = self.id().await;
                self.emit(id, SessionEventKind::ToneSent { tone });
            }
        }
    }

    async fn on_candidate(&self, candidate: Option<IceCandidate>) {
        let result = {
            let mut inner = self.inner.lock().await;
            if inner.terminated || inner.terminating {
                return;
            }
            if !inner.local_description_sent {
                inner.pending_candidates.push(candidate);
                return;
            }
            let Some(id) = inner.id.clone() else {
                return;
            };
            self.send_locked(&inner, trickle(&id, candidate)).await
        };

        if let Err(err) = result {
            warn!(error = %err, "Failed to trickle candidate");
            self.finish(TerminationReason::Failed(err)).await;
        }
    }

    /// Send our offer/answer, then flush candidates gathered while it was in the making
    async fn send_local_description(&self, message: SignalingMessage) {
        let result = {
            let mut inner = self.inner.lock().await;
            match self.send_locked(&inner, message).await {
                Ok(()) => {
                    inner.local_description_sent = true;
                    let pending = std::mem::take(&mut inner.pending_candidates);
                    let mut result = Ok(());
                    if let Some(id) = inner.id.clone() {
                        for candidate in pending {
                            result = self.send_locked(&inner, trickle(&id, candidate)).await;
                            if result.is_err() {
                                break;
                            }
                        }
                    }
                    result
                }
                Err(err) => Err(err),
            }
        };

        if let Err(err) = result {
            warn!(error = %err, "Signaling failed");
            self.finish(TerminationReason::Failed(err)).await;
        }
    }

    /// Sends while the caller holds the session lock. Once termination has been
    /// requested only `session-terminate` may leave.
    async fn send_locked(&self, inner: &SessionInner, message: SignalingMessage) -> Result<()> {
        let closing = inner.terminating
            && !matches!(message, SignalingMessage::SessionTerminate { .. });
        if inner.terminated || closing {
            debug!(session = %message.session_id(), "Dropping {} after termination", message.tag());
            return Ok(());
        }

        debug!(session = %message.session_id(), "Sending {}", message.tag());
        self.context
            .account
            .send_request(message)
            .await
            .map_err(SessionError::from)
    }

    async fn terminate_with(self: &Arc<Self>, failure: Option<TerminationReason>) {
        let id = {
            let mut inner = self.inner.lock().await;
            if inner.terminated || inner.terminating {
                return;
            }
            inner.terminating = true;
            inner.failure = failure;
            inner.id.clone()
        };

        let Some(id) = id else {
            self.finish(TerminationReason::Local).await;
            return;
        };

        info!(session = %id, "Terminating session");
        self.arm_termination_timer();

        let result = {
            let inner = self.inner.lock().await;
            self.send_locked(&inner, SignalingMessage::SessionTerminate { session: id })
                .await
        };
        if let Err(err) = result {
            warn!(error = %err, "Failed to send session-terminate");
            self.finish(TerminationReason::Failed(err)).await;
        }
    }

    fn arm_termination_timer(self: &Arc<Self>) {
        let session = Arc::clone(self);
        let timeout = self.context.config.terminate_timeout();

        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if !session.is_terminated().await {
                warn!(?timeout, "No termination confirmation, forcing local termination");
            }
            session.finish(TerminationReason::TimedOut).await;
        });
    }

    /// Local teardown; runs at most once per session
    async fn finish(&self, reason: TerminationReason) {
        let (id, old, reason, peer, tone_sender) = {
            let mut inner = self.inner.lock().await;
            if inner.terminated {
                return;
            }
            inner.terminated = true;
            inner.terminating = true;
            inner.negotiation_in_flight = false;
            inner.deferred_established = false;
            inner.pending_remote_offer = None;
            inner.pending_candidates.clear();

            let reason = inner.failure.take().unwrap_or(reason);
            let old = inner.state;
            inner.state = SessionState::Terminated;

            (
                inner.id.clone(),
                old,
                reason,
                inner.peer_link.take(),
                inner.tone_sender.take(),
            )
        };

        match reason.error() {
            Some(err) => warn!(session = %label(&id), from = %old, error = %err, "Session terminated"),
            None => info!(session = %label(&id), from = %old, reason = %reason, "Session terminated"),
        }

        if let Some(id) = &id {
            self.context.registry.deregister(id).await;
        }
        drop(tone_sender);
        if let Some(peer) = peer {
            for stream in peer.local_streams().await {
                if let Err(err) = peer.remove_local_stream(&stream.id).await {
                    debug!(stream = %stream.id, error = %err, "Failed to detach local stream");
                }
            }
            peer.close().await;
        }

        self.emit(
            id,
            SessionEventKind::StateChanged {
                old,
                new: SessionState::Terminated,
                reason: Some(reason),
            },
        );
    }

    /// Transition and notify; returns false if the transition is not allowed
    fn transition(
        &self,
        inner: &mut SessionInner,
        new_state: SessionState,
        reason: Option<TerminationReason>,
    ) -> bool {
        if !inner.state.can_transition_to(new_state) {
            warn!(
                session = %label(&inner.id),
                "Ignoring transition from {} to {}",
                inner.state,
                new_state
            );
            return false;
        }

        let old = inner.state;
        inner.state = new_state;
        info!(session = %label(&inner.id), "{} -> {}", old, new_state);

        self.emit(
            inner.id.clone(),
            SessionEventKind::StateChanged {
                old,
                new: new_state,
                reason,
            },
        );
        true
    }

    fn emit(&self, id: Option<SessionId>, kind: SessionEventKind) {
        let event = SessionEvent::new(id, kind);
        debug!(session = %label(&event.session_id), event = event.event_type(), "Notify");
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod harness;
#[cfg(test)]
mod tests;
