use super::harness::*;
use super::*;
use crate::domain::session::account::{MockAccountContext, MockSessionRegistry};
use crate::domain::session::media::MediaTrack;
use crate::domain::shared::error::TransportError;
use crate::infrastructure::memory::{
    MemoryAccount, MemoryBehavior, MemoryPeerLinkFactory, SessionDirectory,
};
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

#[tokio::test]
async fn test_outgoing_sends_create() {
    let mut h = Harness::new(MemoryBehavior::default());
    let session = h.session(SessionDirection::Outgoing);
    let mut events = session.subscribe();

    let id = session
        .initiate_outgoing("alice@example.com", Some(local_stream()), CallOptions::default())
        .await
        .unwrap();

    match h.next_message().await {
        SignalingMessage::SessionCreate {
            account,
            session: sent_id,
            uri,
            sdp,
        } => {
            assert_eq!(account, "acct-1");
            assert_eq!(sent_id, id);
            assert_eq!(uri, "alice@example.com");
            assert!(sdp.starts_with("v=0"));
        }
        other => panic!("unexpected message {:?}", other),
    }

    assert_eq!(
        next_state(&mut events).await,
        (SessionState::Null, SessionState::OutgoingPending, None)
    );
    assert_eq!(session.state().await, SessionState::OutgoingPending);
    assert_eq!(
        session.remote_identity().await.unwrap().uri(),
        "alice@example.com"
    );
    assert_eq!(session.local_streams().await, vec![local_stream()]);
}

#[tokio::test]
async fn test_outgoing_rejects_unqualified_address() {
    let mut h = Harness::new(MemoryBehavior::default());
    let session = h.session(SessionDirection::Outgoing);

    let result = session
        .initiate_outgoing("alice", Some(local_stream()), CallOptions::default())
        .await;

    assert!(matches!(result, Err(SessionError::InvalidAddress(_))));
    assert_eq!(h.peer_links.created().await, 0);
    assert_eq!(session.state().await, SessionState::Null);
    assert!(session.id().await.is_none());
    h.assert_quiet().await;
}

#[tokio::test]
async fn test_outgoing_requires_local_stream() {
    let mut h = Harness::new(MemoryBehavior::default());
    let session = h.session(SessionDirection::Outgoing);

    let result = session
        .initiate_outgoing("alice@example.com", None, CallOptions::default())
        .await;

    assert_eq!(result, Err(SessionError::MissingLocalStream));
    assert_eq!(h.peer_links.created().await, 0);
    h.assert_quiet().await;
}

#[tokio::test]
async fn test_initiation_checks_direction() {
    let h = Harness::new(MemoryBehavior::default());

    let incoming = h.session(SessionDirection::Incoming);
    assert_err!(
        incoming
            .initiate_outgoing("alice@example.com", Some(local_stream()), CallOptions::default())
            .await
    );

    let outgoing = h.session(SessionDirection::Outgoing);
    assert_err!(
        outgoing
            .initiate_incoming(
                SessionId::from("s1"),
                Identity::new("bob@x.com", None),
                OFFER.to_string()
            )
            .await
    );
}

#[tokio::test]
async fn test_offer_failure_terminates_locally() {
    let mut h = Harness::new(MemoryBehavior {
        fail_offer: true,
        ..Default::default()
    });
    let session = h.session(SessionDirection::Outgoing);
    let mut events = session.subscribe();

    assert_ok!(
        session
            .initiate_outgoing("alice@example.com", Some(local_stream()), CallOptions::default())
            .await
    );

    next_state(&mut events).await;
    let (old, new, reason) = next_state(&mut events).await;
    assert_eq!((old, new), (SessionState::OutgoingPending, SessionState::Terminated));
    assert!(matches!(
        reason,
        Some(TerminationReason::Failed(SessionError::Negotiation(_)))
    ));
    assert_eq!(h.link().await.close_count(), 1);
    // The remote party never heard of this session
    h.assert_quiet().await;
}

#[tokio::test]
async fn test_incoming_invite() {
    let mut h = Harness::new(MemoryBehavior::default());
    let session = h.session(SessionDirection::Incoming);
    let mut events = session.subscribe();

    session
        .initiate_incoming(
            SessionId::from("s1"),
            Identity::new("bob@x.com", None),
            OFFER.to_string(),
        )
        .await
        .unwrap();

    assert_eq!(session.state().await, SessionState::Incoming);
    assert_eq!(session.remote_identity().await.unwrap().uri(), "bob@x.com");
    assert_eq!(
        next_state(&mut events).await,
        (SessionState::Null, SessionState::Incoming, None)
    );
    assert_eq!(h.peer_links.created().await, 0);
    h.assert_quiet().await;
}

#[tokio::test]
async fn test_answer_sends_answer() {
    let mut h = Harness::new(MemoryBehavior::default());
    let session = h.session(SessionDirection::Incoming);
    session
        .initiate_incoming(
            SessionId::from("s1"),
            Identity::new("bob@x.com", None),
            OFFER.to_string(),
        )
        .await
        .unwrap();

    session
        .answer(Some(local_stream()), CallOptions::default())
        .await
        .unwrap();

    match h.next_message().await {
        SignalingMessage::SessionAnswer { session: id, sdp } => {
            assert_eq!(id.as_str(), "s1");
            assert!(sdp.starts_with("v=0"));
        }
        other => panic!("unexpected message {:?}", other),
    }
    let link = h.link().await;
    assert_eq!(
        link.remote_descriptions().await,
        vec![SessionDescription::offer(OFFER)]
    );
    assert_eq!(session.state().await, SessionState::Incoming);

    // A second answer cannot re-initialize the peer link
    assert_err!(
        session
            .answer(Some(local_stream()), CallOptions::default())
            .await
    );
    assert_eq!(h.peer_links.created().await, 1);
}

#[tokio::test]
async fn test_answer_preconditions() {
    let h = Harness::new(MemoryBehavior::default());
    let session = h.session(SessionDirection::Incoming);

    // Not incoming yet
    assert!(matches!(
        session.answer(Some(local_stream()), CallOptions::default()).await,
        Err(SessionError::InvalidState(_))
    ));

    session
        .initiate_incoming(
            SessionId::from("s1"),
            Identity::new("bob@x.com", None),
            OFFER.to_string(),
        )
        .await
        .unwrap();
    assert_eq!(
        session.answer(None, CallOptions::default()).await,
        Err(SessionError::MissingLocalStream)
    );
    assert_eq!(h.peer_links.created().await, 0);
}

#[tokio::test]
async fn test_answer_failure_terminates_through_signaling() {
    let mut h = Harness::new(MemoryBehavior {
        fail_remote_description: true,
        ..Default::default()
    });
    let session = h.session(SessionDirection::Incoming);
    session
        .initiate_incoming(
            SessionId::from("s1"),
            Identity::new("bob@x.com", None),
            OFFER.to_string(),
        )
        .await
        .unwrap();

    session
        .answer(Some(local_stream()), CallOptions::default())
        .await
        .unwrap();

    assert_eq!(
        h.next_message().await,
        SignalingMessage::SessionTerminate {
            session: SessionId::from("s1")
        }
    );
}

#[tokio::test]
async fn test_trickle_candidates() {
    let mut h = Harness::new(MemoryBehavior::default());
    let session = h.session(SessionDirection::Incoming);
    session
        .initiate_incoming(
            SessionId::from("s1"),
            Identity::new("bob@x.com", None),
            OFFER.to_string(),
        )
        .await
        .unwrap();
    session
        .answer(Some(local_stream()), CallOptions::default())
        .await
        .unwrap();
    assert!(matches!(
        h.next_message().await,
        SignalingMessage::SessionAnswer { .. }
    ));

    let link = h.link().await;
    let candidate = IceCandidate::new("candidate:1 1 udp 2122260223 192.0.2.1 5000 typ host");
    link.emit_candidate(Some(candidate.clone())).await;
    link.emit_candidate(None).await;

    assert_eq!(
        h.next_message().await,
        SignalingMessage::SessionTrickle {
            session: SessionId::from("s1"),
            candidates: vec![candidate],
        }
    );
    assert_eq!(
        h.next_message().await,
        SignalingMessage::SessionTrickle {
            session: SessionId::from("s1"),
            candidates: vec![],
        }
    );
}

#[tokio::test]
async fn test_established_deferred_until_answer_applied() {
    let mut h = Harness::new(MemoryBehavior {
        hold_remote_description: true,
        ..Default::default()
    });
    let (session, id) = h.outgoing().await;
    let mut events = session.subscribe();

    session
        .handle_state_event(RemoteStateEvent::new(id.clone(), RemoteState::Accepted).with_sdp(ANSWER))
        .await;
    session
        .handle_state_event(RemoteStateEvent::new(id.clone(), RemoteState::Established))
        .await;
    settle().await;

    assert!(session.is_negotiating().await);
    assert_eq!(session.state().await, SessionState::Accepted);
    assert_eq!(drain_states(&mut events), vec![SessionState::Accepted]);

    h.link().await.release_remote_description();

    assert_eq!(
        next_state(&mut events).await,
        (SessionState::Accepted, SessionState::Established, None)
    );
    settle().await;
    assert!(drain_states(&mut events).is_empty());
    assert_eq!(session.state().await, SessionState::Established);
    assert!(!session.is_negotiating().await);
}

#[tokio::test]
async fn test_established_after_answer_applied() {
    let mut h = Harness::new(MemoryBehavior::default());
    let (session, id) = h.outgoing().await;

    session
        .handle_state_event(RemoteStateEvent::new(id.clone(), RemoteState::Accepted).with_sdp(ANSWER))
        .await;
    while session.is_negotiating().await {
        tokio::task::yield_now().await;
    }
    assert_eq!(
        h.link().await.remote_descriptions().await,
        vec![SessionDescription::answer(ANSWER)]
    );

    let mut events = session.subscribe();
    session
        .handle_state_event(RemoteStateEvent::new(id, RemoteState::Established))
        .await;

    // Emitted by the handler itself
    assert_eq!(session.state().await, SessionState::Established);
    assert_eq!(drain_states(&mut events), vec![SessionState::Established]);
}

#[tokio::test]
async fn test_accepted_without_answer_fails() {
    let mut h = Harness::new(MemoryBehavior::default());
    let (session, id) = h.outgoing().await;
    let mut events = session.subscribe();

    session
        .handle_state_event(RemoteStateEvent::new(id.clone(), RemoteState::Accepted))
        .await;

    assert_eq!(
        h.next_message().await,
        SignalingMessage::SessionTerminate { session: id.clone() }
    );
    session
        .handle_state_event(RemoteStateEvent::new(id, RemoteState::Terminated))
        .await;

    next_state(&mut events).await;
    let (_, new, reason) = next_state(&mut events).await;
    assert_eq!(new, SessionState::Terminated);
    // The failure wins over the remote confirmation
    assert!(matches!(
        reason,
        Some(TerminationReason::Failed(SessionError::Negotiation(_)))
    ));
}

#[tokio::test]
async fn test_terminate_is_idempotent() {
    let mut h = Harness::new(MemoryBehavior::default());
    let (session, id) = h.outgoing().await;

    session.terminate().await;
    session.terminate().await;

    assert_eq!(
        h.next_message().await,
        SignalingMessage::SessionTerminate { session: id.clone() }
    );
    h.assert_quiet().await;

    session
        .handle_state_event(RemoteStateEvent::new(id, RemoteState::Terminated))
        .await;
    session.terminate().await;

    assert_eq!(session.state().await, SessionState::Terminated);
    assert_eq!(h.link().await.close_count(), 1);
    h.assert_quiet().await;
}

#[tokio::test]
async fn test_nothing_sent_after_termination() {
    let mut h = Harness::new(MemoryBehavior::default());
    let (session, id) = h.outgoing().await;
    let link = h.link().await;

    session
        .handle_state_event(RemoteStateEvent::new(id.clone(), RemoteState::Terminated).with_reason("busy"))
        .await;

    link.emit_candidate(Some(IceCandidate::new("candidate:late"))).await;
    session
        .handle_state_event(RemoteStateEvent::new(id.clone(), RemoteState::Accepted).with_sdp(ANSWER))
        .await;
    session.terminate().await;
    assert_ok!(session.send_dtmf("1", None).await);

    h.assert_quiet().await;
    assert_eq!(link.close_count(), 1);
    assert!(link.local_streams().await.is_empty());
    assert!(link.tone_requests().is_empty());
    assert!(h.directory.is_empty().await);
}

#[tokio::test]
async fn test_terminate_while_answer_in_progress() {
    let mut h = Harness::new(MemoryBehavior {
        hold_remote_description: true,
        ..Default::default()
    });
    let session = h.session(SessionDirection::Incoming);
    let mut events = session.subscribe();
    assert_ok!(
        session
            .initiate_incoming(
                SessionId::from("s1"),
                Identity::new("alice@example.com", None),
                OFFER.to_string()
            )
            .await
    );
    assert_ok!(session.answer(Some(local_stream()), CallOptions::default()).await);
    settle().await;
    let link = h.link().await;

    session.terminate().await;
    assert_eq!(
        h.next_message().await,
        SignalingMessage::SessionTerminate {
            session: SessionId::from("s1")
        }
    );

    link.emit_candidate(Some(IceCandidate::new("candidate:late"))).await;
    link.release_remote_description();

    // No session-answer or trickle may follow session-terminate
    h.assert_quiet().await;
    assert!(link.local_description().await.is_none());
    assert!(!drain_states(&mut events).contains(&SessionState::Terminated));
}

#[tokio::test]
async fn test_terminate_while_remote_answer_held() {
    let mut h = Harness::new(MemoryBehavior {
        hold_remote_description: true,
        ..Default::default()
    });
    let (session, id) = h.outgoing().await;
    let mut events = session.subscribe();

    session
        .handle_state_event(RemoteStateEvent::new(id.clone(), RemoteState::Accepted).with_sdp(ANSWER))
        .await;
    session
        .handle_state_event(RemoteStateEvent::new(id.clone(), RemoteState::Established))
        .await;
    settle().await;
    assert!(session.is_negotiating().await);

    session.terminate().await;
    assert_eq!(
        h.next_message().await,
        SignalingMessage::SessionTerminate { session: id }
    );

    h.link().await.release_remote_description();
    settle().await;

    assert!(!session.is_negotiating().await);
    assert_eq!(session.state().await, SessionState::Accepted);
    assert_eq!(drain_states(&mut events), vec![SessionState::Accepted]);
    h.assert_quiet().await;
}

#[tokio::test(start_paused = true)]
async fn test_terminate_times_out() {
    let mut h = Harness::new(MemoryBehavior::default());
    let (session, _id) = h.outgoing().await;
    let mut events = session.subscribe();

    session.terminate().await;
    assert!(matches!(
        h.next_message().await,
        SignalingMessage::SessionTerminate { .. }
    ));

    tokio::time::sleep(Duration::from_millis(149)).await;
    assert!(!session.is_terminated().await);

    tokio::time::sleep(Duration::from_millis(2)).await;
    settle().await;
    let (old, new, reason) = next_state(&mut events).await;
    assert_eq!((old, new), (SessionState::OutgoingPending, SessionState::Terminated));
    assert_eq!(reason, Some(TerminationReason::TimedOut));
    assert_eq!(
        reason.and_then(|r| r.error()),
        Some(SessionError::TerminationTimeout)
    );
}

#[tokio::test(start_paused = true)]
async fn test_remote_confirmation_suppresses_timeout() {
    let mut h = Harness::new(MemoryBehavior::default());
    let (session, id) = h.outgoing().await;
    let mut events = session.subscribe();

    session.terminate().await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    session
        .handle_state_event(RemoteStateEvent::new(id, RemoteState::Terminated))
        .await;

    let (_, new, reason) = next_state(&mut events).await;
    assert_eq!(new, SessionState::Terminated);
    assert_eq!(reason, Some(TerminationReason::Remote(None)));

    tokio::time::sleep(Duration::from_millis(100)).await;
    settle().await;
    assert!(drain_states(&mut events).is_empty());
    assert_eq!(h.link().await.close_count(), 1);
}

#[tokio::test]
async fn test_terminate_before_initiation() {
    let h = Harness::new(MemoryBehavior::default());
    let session = h.session(SessionDirection::Outgoing);
    let mut events = session.subscribe();

    session.terminate().await;

    assert_eq!(
        next_state(&mut events).await,
        (
            SessionState::Null,
            SessionState::Terminated,
            Some(TerminationReason::Local)
        )
    );
    assert_eq!(h.account.sent_count(), 0);
}

#[tokio::test]
async fn test_deregisters_exactly_once() {
    let (account, _outbox) = MemoryAccount::new("acct-1", Identity::new("me@example.com", None));
    let mut registry = MockSessionRegistry::new();
    registry
        .expect_deregister()
        .withf(|id| id.as_str() == "s1")
        .times(1)
        .return_const(());

    let session = Session::new(
        SessionContext {
            account,
            registry: Arc::new(registry),
            peer_links: MemoryPeerLinkFactory::new(MemoryBehavior::default()),
            config: SessionConfig::default(),
        },
        SessionDirection::Incoming,
    );
    session
        .initiate_incoming(
            SessionId::from("s1"),
            Identity::new("bob@x.com", None),
            OFFER.to_string(),
        )
        .await
        .unwrap();

    let terminated = RemoteStateEvent::new(SessionId::from("s1"), RemoteState::Terminated);
    session.handle_state_event(terminated.clone()).await;
    session.handle_state_event(terminated).await;
    session.terminate().await;
}

#[tokio::test]
async fn test_transport_failure_terminates_locally() {
    let mut account = MockAccountContext::new();
    account
        .expect_identity()
        .return_const(Identity::new("me@example.com", None));
    account.expect_account_id().return_const("acct-1".to_string());
    account
        .expect_send_request()
        .times(1)
        .returning(|_| Err(TransportError::Disconnected));

    let peer_links = MemoryPeerLinkFactory::new(MemoryBehavior::default());
    let session = Session::new(
        SessionContext {
            account: Arc::new(account),
            registry: SessionDirectory::new(),
            peer_links: peer_links.clone(),
            config: SessionConfig::default(),
        },
        SessionDirection::Outgoing,
    );
    let mut events = session.subscribe();

    session
        .initiate_outgoing("alice@example.com", Some(local_stream()), CallOptions::default())
        .await
        .unwrap();

    next_state(&mut events).await;
    let (_, new, reason) = next_state(&mut events).await;
    assert_eq!(new, SessionState::Terminated);
    assert!(matches!(
        reason,
        Some(TerminationReason::Failed(SessionError::Transport(_)))
    ));
    assert_eq!(peer_links.last().await.unwrap().close_count(), 1);
}

#[tokio::test]
async fn test_dtmf() {
    let mut h = Harness::new(MemoryBehavior::default());
    let (session, _id) = h.outgoing().await;
    let mut events = session.subscribe();

    assert_eq!(
        session.send_dtmf("12x", None).await,
        Err(SessionError::InvalidTone('x'))
    );

    session.send_dtmf("1#", None).await.unwrap();
    let fast = DtmfOptions::new(Duration::from_millis(50), Duration::from_millis(30));
    session.send_dtmf("9", Some(fast)).await.unwrap();

    let link = h.link().await;
    assert_eq!(
        link.tone_requests(),
        vec![
            ("1#".to_string(), DtmfOptions::default()),
            ("9".to_string(), fast)
        ]
    );

    let mut tones = Vec::new();
    while tones.len() < 3 {
        let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .unwrap()
            .unwrap();
        if let SessionEventKind::ToneSent { tone } = event.kind {
            tones.push(tone);
        }
    }
    assert_eq!(tones, vec!["1", "#", "9"]);
}

#[tokio::test]
async fn test_dtmf_without_engine_support() {
    let h = Harness::new(MemoryBehavior {
        no_tone_sender: true,
        ..Default::default()
    });
    let session = h.session(SessionDirection::Outgoing);

    // No peer link yet
    assert_ok!(session.send_dtmf("1", None).await);

    session
        .initiate_outgoing("alice@example.com", Some(local_stream()), CallOptions::default())
        .await
        .unwrap();
    settle().await;
    assert_ok!(session.send_dtmf("1", None).await);
    assert!(h.link().await.tone_requests().is_empty());
}

#[tokio::test]
async fn test_remote_stream_notification() {
    let mut h = Harness::new(MemoryBehavior::default());
    let (session, _id) = h.outgoing().await;
    let mut events = session.subscribe();

    let remote = MediaStream::new("remote", vec![MediaTrack::audio("their-mic")]);
    h.link().await.emit_remote_stream(remote.clone()).await;

    let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        event.kind,
        SessionEventKind::StreamAdded {
            origin: StreamOrigin::Remote,
            stream: remote.clone(),
        }
    );
    assert_eq!(session.remote_streams().await, vec![remote]);
}
