//! Domain errors

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("A local media stream is required")]
    MissingLocalStream,

    #[error("Peer link already initialized")]
    PeerLinkAlreadyInitialized,

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid DTMF tone: {0:?}")]
    InvalidTone(char),

    #[error("Negotiation failed: {0}")]
    Negotiation(String),

    #[error("Signaling transport failed: {0}")]
    Transport(String),

    #[error("Peer link error: {0}")]
    PeerLink(String),

    #[error("Termination timed out")]
    TerminationTimeout,
}

/// Failure reported by the media-negotiation engine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PeerLinkError {
    #[error("Failed to create peer link: {0}")]
    Create(String),

    #[error("Failed to create description: {0}")]
    CreateDescription(String),

    #[error("Failed to apply remote description: {0}")]
    ApplyRemote(String),

    #[error("Media error: {0}")]
    Media(String),

    #[error("Peer link closed")]
    Closed,
}

/// Failure reported by the account's signaling transport
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Transport disconnected")]
    Disconnected,
}

impl From<TransportError> for SessionError {
    fn from(err: TransportError) -> Self {
        SessionError::Transport(err.to_string())
    }
}
