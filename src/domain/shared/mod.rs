//! Shared kernel - Common types and utilities used across the crate

pub mod error;
pub mod events;
pub mod result;
pub mod value_objects;

pub use error::{PeerLinkError, SessionError, TransportError};
pub use result::Result;
pub use value_objects::*;
