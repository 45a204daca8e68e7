//! Domain result type

use super::error::SessionError;

/// Standard result type for session operations
pub type Result<T> = std::result::Result<T, SessionError>;
