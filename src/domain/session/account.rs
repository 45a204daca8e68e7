//! Ports to the owning account context

use crate::domain::session::signaling::SignalingMessage;
use crate::domain::shared::error::TransportError;
use crate::domain::shared::value_objects::{Identity, SessionId};
use async_trait::async_trait;

/// Identity and message transport of the account that owns a session
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AccountContext: Send + Sync {
    /// Account identifier placed in `session-create` messages
    fn account_id(&self) -> String;

    /// Local party identity
    fn identity(&self) -> Identity;

    /// Dispatch a signaling message; resolves once the request completes or fails
    async fn send_request(&self, message: SignalingMessage) -> Result<(), TransportError>;
}

/// Registry of live sessions, keyed by session id
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionRegistry: Send + Sync {
    /// Remove a terminated session
    async fn deregister(&self, id: &SessionId);
}
