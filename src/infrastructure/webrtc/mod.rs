//! WebRTC media engine adapter

pub mod peer_link;

pub use peer_link::{WebRtcPeerLink, WebRtcPeerLinkFactory};
