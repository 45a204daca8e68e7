/// Session directory
///
/// Keeps live sessions by id, routes inbound signaling to them and drops them
/// once they terminate.

use crate::domain::session::account::SessionRegistry;
use crate::domain::session::aggregate::Session;
use crate::domain::session::signaling::{InboundMessage, RemoteStateEvent, SessionInvite};
use crate::domain::shared::error::SessionError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::SessionId;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

#[derive(Default)]
pub struct SessionDirectory {
    sessions: RwLock<HashMap<SessionId, Arc<Session>>>,
}

impl SessionDirectory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register an initiated session
    pub async fn register(&self, session: &Arc<Session>) -> Result<()> {
        let id = session.id().await.ok_or_else(|| {
            SessionError::InvalidState("cannot register a session without an id".to_string())
        })?;
        if session.state().await.is_terminal() {
            return Err(SessionError::InvalidState(format!(
                "session {} already terminated",
                id
            )));
        }

        info!(session = %id, "Registered session");
        self.sessions.write().await.insert(id, Arc::clone(session));
        Ok(())
    }

    pub async fn get(&self, id: &SessionId) -> Option<Arc<Session>> {
        self.sessions.read().await.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Deliver a state event; returns false if no live session has that id
    pub async fn route(&self, event: RemoteStateEvent) -> bool {
        let Some(session) = self.get(&event.session).await else {
            debug!(session = %event.session, "No session for state event");
            return false;
        };

        session.handle_state_event(event).await;
        true
    }

    /// Decode and deliver one raw inbound message
    ///
    /// State events go to their session. Invites are returned so the
    /// application can decide whether to create an incoming session.
    pub async fn dispatch(
        &self,
        raw: &str,
    ) -> std::result::Result<Option<SessionInvite>, serde_json::Error> {
        match serde_json::from_str::<InboundMessage>(raw)? {
            InboundMessage::State(event) => {
                self.route(event).await;
                Ok(None)
            }
            InboundMessage::SessionInvite(invite) => {
                debug!(session = %invite.session, caller = %invite.caller, "Invite received");
                Ok(Some(invite))
            }
        }
    }
}

#[async_trait]
impl SessionRegistry for SessionDirectory {
    async fn deregister(&self, id: &SessionId) {
        if self.sessions.write().await.remove(id).is_some() {
            info!(session = %id, "Deregistered session");
        } else {
            debug!(session = %id, "Deregistering unknown session");
        }
    }
}
