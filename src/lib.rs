//! Peercall - call/session state machine for peer-to-peer media sessions
//!
//! A [`Session`](domain::session::Session) negotiates media through a
//! pluggable peer link, exchanges signaling through its owning account and
//! reports progress to listeners as notifications.

pub mod config;
pub mod domain;
pub mod infrastructure;

// Re-export commonly used types
pub use config::Config;
pub use domain::session::{Session, SessionContext, SessionDirection, SessionEvent, SessionState};
pub use domain::shared::error::SessionError;
pub use domain::shared::result::Result;
