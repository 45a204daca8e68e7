//! Infrastructure layer - Technical implementations
//!
//! This layer contains:
//! - In-memory account, peer link and session directory
//! - The webrtc-rs peer link adapter

#[cfg(any(test, feature = "memory"))]
pub mod memory;

#[cfg(feature = "webrtc-engine")]
pub mod webrtc;
