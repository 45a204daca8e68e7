//! Shared fixtures for session tests: in-memory collaborators and helpers
//! for reading signaling and notifications.

use super::*;
use crate::domain::session::media::MediaTrack;
use crate::infrastructure::memory::{
    MemoryAccount, MemoryBehavior, MemoryPeerLink, MemoryPeerLinkFactory, SessionDirectory,
};
use std::time::Duration;
use tokio::sync::mpsc;

pub(super) const OFFER: &str = "v=0\r\no=- 1 1 IN IP4 192.0.2.1\r\ns=-\r\nt=0 0\r\n";
pub(super) const ANSWER: &str = "v=0\r\no=- 2 1 IN IP4 192.0.2.2\r\ns=-\r\nt=0 0\r\n";

pub(super) struct Harness {
    pub(super) account: Arc<MemoryAccount>,
    pub(super) outbox: mpsc::UnboundedReceiver<SignalingMessage>,
    pub(super) directory: Arc<SessionDirectory>,
    pub(super) peer_links: Arc<MemoryPeerLinkFactory>,
}

impl Harness {
    pub(super) fn new(behavior: MemoryBehavior) -> Self {
        let (account, outbox) =
            MemoryAccount::new("acct-1", Identity::new("me@example.com", None));
        Self {
            account,
            outbox,
            directory: SessionDirectory::new(),
            peer_links: MemoryPeerLinkFactory::new(behavior),
        }
    }

    pub(super) fn session(&self, direction: SessionDirection) -> Arc<Session> {
        Session::new(
            SessionContext {
                account: self.account.clone(),
                registry: self.directory.clone(),
                peer_links: self.peer_links.clone(),
                config: SessionConfig::default(),
            },
            direction,
        )
    }

    pub(super) async fn next_message(&mut self) -> SignalingMessage {
        tokio::time::timeout(Duration::from_secs(1), self.outbox.recv())
            .await
            .expect("no signaling message")
            .expect("outbox closed")
    }

    /// Let spawned continuations run, then check nothing else was sent
    pub(super) async fn assert_quiet(&mut self) {
        settle().await;
        assert!(self.outbox.try_recv().is_err());
    }

    pub(super) async fn link(&self) -> Arc<MemoryPeerLink> {
        self.peer_links.last().await.expect("no peer link created")
    }

    /// Outgoing call to alice, with `session-create` already consumed
    pub(super) async fn outgoing(&mut self) -> (Arc<Session>, SessionId) {
        let session = self.session(SessionDirection::Outgoing);
        let id = session
            .initiate_outgoing("alice@example.com", Some(local_stream()), CallOptions::default())
            .await
            .unwrap();
        self.directory.register(&session).await.unwrap();
        assert!(matches!(
            self.next_message().await,
            SignalingMessage::SessionCreate { .. }
        ));
        (session, id)
    }
}

pub(super) fn local_stream() -> MediaStream {
    MediaStream::new(
        "local",
        vec![MediaTrack::audio("mic"), MediaTrack::video("cam")],
    )
}

pub(super) async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

pub(super) async fn next_state(
    events: &mut broadcast::Receiver<SessionEvent>,
) -> (SessionState, SessionState, Option<TerminationReason>) {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .expect("no notification")
            .expect("notification channel closed");
        if let SessionEventKind::StateChanged { old, new, reason } = event.kind {
            return (old, new, reason);
        }
    }
}

pub(super) fn drain_states(events: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionState> {
    let mut states = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let Some(state) = event.new_state() {
            states.push(state);
        }
    }
    states
}

