/// In-memory account context
///
/// Queues every outbound signaling message on a channel instead of a network
/// transport. Sends can be forced to fail to exercise transport errors.

use crate::domain::session::account::AccountContext;
use crate::domain::session::signaling::SignalingMessage;
use crate::domain::shared::error::TransportError;
use crate::domain::shared::value_objects::Identity;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

pub struct MemoryAccount {
    account_id: String,
    identity: Identity,
    outbox: mpsc::UnboundedSender<SignalingMessage>,
    fail_sends: AtomicBool,
    sent: AtomicUsize,
}

impl MemoryAccount {
    /// Create an account and the receiving end of its outbox
    pub fn new(
        account_id: impl Into<String>,
        identity: Identity,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<SignalingMessage>) {
        let (outbox, rx) = mpsc::unbounded_channel();
        let account = Arc::new(Self {
            account_id: account_id.into(),
            identity,
            outbox,
            fail_sends: AtomicBool::new(false),
            sent: AtomicUsize::new(0),
        });
        (account, rx)
    }

    /// Make subsequent sends fail with `RequestFailed`
    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Messages successfully queued so far
    pub fn sent_count(&self) -> usize {
        self.sent.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AccountContext for MemoryAccount {
    fn account_id(&self) -> String {
        self.account_id.clone()
    }

    fn identity(&self) -> Identity {
        self.identity.clone()
    }

    async fn send_request(&self, message: SignalingMessage) -> Result<(), TransportError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::RequestFailed(format!(
                "{} rejected",
                message.tag()
            )));
        }

        debug!(account = %self.account_id, "Queued {}", message.tag());
        self.outbox
            .send(message)
            .map_err(|_| TransportError::Disconnected)?;
        self.sent.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::shared::value_objects::SessionId;

    fn terminate() -> SignalingMessage {
        SignalingMessage::SessionTerminate {
            session: SessionId::from("s1"),
        }
    }

    #[tokio::test]
    async fn test_send_queues_message() {
        let (account, mut rx) = MemoryAccount::new("acct", Identity::new("me@example.com", None));

        account.send_request(terminate()).await.unwrap();

        assert_eq!(rx.recv().await, Some(terminate()));
        assert_eq!(account.sent_count(), 1);
    }

    #[tokio::test]
    async fn test_failing_sends() {
        let (account, mut rx) = MemoryAccount::new("acct", Identity::new("me@example.com", None));
        account.fail_sends(true);

        let result = account.send_request(terminate()).await;

        assert!(matches!(result, Err(TransportError::RequestFailed(_))));
        assert!(rx.try_recv().is_err());
        assert_eq!(account.sent_count(), 0);
    }

    #[tokio::test]
    async fn test_closed_outbox() {
        let (account, rx) = MemoryAccount::new("acct", Identity::new("me@example.com", None));
        drop(rx);

        assert_eq!(
            account.send_request(terminate()).await,
            Err(TransportError::Disconnected)
        );
    }
}
