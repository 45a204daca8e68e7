//! Session notifications delivered to listeners

use crate::domain::session::media::MediaStream;
use crate::domain::session::value_object::{SessionState, TerminationReason};
use crate::domain::shared::events::{DomainEvent, EventMetadata};
use crate::domain::shared::value_objects::SessionId;
use chrono::{DateTime, Utc};

/// Which side a stream belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOrigin {
    Local,
    Remote,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEventKind {
    /// A local stream was attached or a remote stream arrived
    StreamAdded {
        origin: StreamOrigin,
        stream: MediaStream,
    },
    /// The session moved between states
    StateChanged {
        old: SessionState,
        new: SessionState,
        reason: Option<TerminationReason>,
    },
    /// A DTMF tone finished playing
    ToneSent { tone: String },
}

/// Notification broadcast by a session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionEvent {
    pub metadata: EventMetadata,
    /// `None` only for events emitted before the session left `Null`
    pub session_id: Option<SessionId>,
    pub kind: SessionEventKind,
}

impl SessionEvent {
    pub fn new(session_id: Option<SessionId>, kind: SessionEventKind) -> Self {
        Self {
            metadata: EventMetadata::new(),
            session_id,
            kind,
        }
    }

    /// New state if this is a state change
    pub fn new_state(&self) -> Option<SessionState> {
        match &self.kind {
            SessionEventKind::StateChanged { new, .. } => Some(*new),
            _ => None,
        }
    }

    pub fn is_state_change_to(&self, state: SessionState) -> bool {
        self.new_state() == Some(state)
    }
}

impl DomainEvent for SessionEvent {
    fn event_type(&self) -> &'static str {
        match self.kind {
            SessionEventKind::StreamAdded { .. } => "session.stream_added",
            SessionEventKind::StateChanged { .. } => "session.state_changed",
            SessionEventKind::ToneSent { .. } => "session.tone_sent",
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.metadata.occurred_at
    }
}
