//! Session bounded context - drives one peer-to-peer media session

pub mod account;
pub mod aggregate;
pub mod event;
pub mod media;
pub mod peer_link;
pub mod signaling;
pub mod tone;
pub mod value_object;

pub use account::{AccountContext, SessionRegistry};
pub use aggregate::{Session, SessionContext};
pub use event::{SessionEvent, SessionEventKind, StreamOrigin};
pub use media::{
    CallOptions, IceCandidate, IceServer, MediaStream, MediaTrack, NegotiationOptions,
    PeerLinkConfig, SdpType, SessionDescription, TrackKind,
};
pub use peer_link::{PeerLink, PeerLinkEvent, PeerLinkEvents, PeerLinkFactory, ToneSender};
pub use signaling::{InboundMessage, RemoteState, RemoteStateEvent, SessionInvite, SignalingMessage};
pub use tone::{DtmfOptions, Tone, ToneSequence};
pub use value_object::{SessionDirection, SessionState, TerminationReason};
