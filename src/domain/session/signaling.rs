/// Session-scoped signaling envelopes exchanged with the remote party
use crate::domain::session::media::IceCandidate;
use crate::domain::shared::value_objects::{Identity, SessionId};
use serde::{Deserialize, Serialize};

/// Outbound signaling messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SignalingMessage {
    /// Initiate an outgoing session
    SessionCreate {
        account: String,
        session: SessionId,
        uri: String,
        sdp: String,
    },
    /// Respond to an incoming invite
    SessionAnswer { session: SessionId, sdp: String },
    /// Trickled candidates; an empty list marks the end of gathering
    SessionTrickle {
        session: SessionId,
        candidates: Vec<IceCandidate>,
    },
    /// Request termination
    SessionTerminate { session: SessionId },
}

impl SignalingMessage {
    pub fn session_id(&self) -> &SessionId {
        match self {
            SignalingMessage::SessionCreate { session, .. }
            | SignalingMessage::SessionAnswer { session, .. }
            | SignalingMessage::SessionTrickle { session, .. }
            | SignalingMessage::SessionTerminate { session } => session,
        }
    }

    /// Protocol tag as it appears on the wire
    pub fn tag(&self) -> &'static str {
        match self {
            SignalingMessage::SessionCreate { .. } => "session-create",
            SignalingMessage::SessionAnswer { .. } => "session-answer",
            SignalingMessage::SessionTrickle { .. } => "session-trickle",
            SignalingMessage::SessionTerminate { .. } => "session-terminate",
        }
    }
}

/// Session state as reported by the remote side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteState {
    Accepted,
    Established,
    Terminated,
    #[serde(other)]
    Unknown,
}

/// Inbound `state` event for one session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteStateEvent {
    pub session: SessionId,
    pub state: RemoteState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl RemoteStateEvent {
    pub fn new(session: SessionId, state: RemoteState) -> Self {
        Self {
            session,
            state,
            sdp: None,
            reason: None,
        }
    }

    pub fn with_sdp(mut self, sdp: impl Into<String>) -> Self {
        self.sdp = Some(sdp.into());
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Incoming invite, handed to the application to create an incoming session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInvite {
    pub session: SessionId,
    pub caller: Identity,
    pub sdp: String,
}

/// Inbound signaling messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum InboundMessage {
    SessionInvite(SessionInvite),
    State(RemoteStateEvent),
}
