//! Domain layer - Core business logic and rules
//!
//! This layer contains:
//! - The session aggregate and its value objects
//! - Ports to the account context and the media engine
//! - Session notifications

pub mod session;
pub mod shared;

// Re-export commonly used types
pub use shared::{Result, SessionError};
