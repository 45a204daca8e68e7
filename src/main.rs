use peercall::config::Config;
use peercall::domain::session::{
    CallOptions, IceCandidate, MediaStream, MediaTrack, RemoteState, RemoteStateEvent, Session,
    SessionContext, SessionDirection, SessionEventKind, SignalingMessage,
};
use peercall::domain::shared::value_objects::Identity;
use peercall::infrastructure::memory::{
    MemoryAccount, MemoryBehavior, MemoryPeerLinkFactory, SessionDirectory,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let path = std::env::args().nth(1);
    let config = Config::load(path.as_deref())?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.as_str()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting peercall demo");
    info!("Configuration loaded: {:?}", config);

    demo_outgoing_call(&config).await?;

    info!("Demo finished");
    Ok(())
}

/// Place a call against in-memory collaborators, playing the remote side by hand
async fn demo_outgoing_call(config: &Config) -> anyhow::Result<()> {
    let (account, mut outbox) = MemoryAccount::new(
        "demo-account",
        Identity::new("me@example.com", Some("Demo".to_string())),
    );
    let directory = SessionDirectory::new();
    let peer_links = MemoryPeerLinkFactory::new(MemoryBehavior::default());

    let context = SessionContext {
        account,
        registry: directory.clone(),
        peer_links: peer_links.clone(),
        config: config.session.clone(),
    };

    let session = Session::new(context, SessionDirection::Outgoing);
    let mut events = session.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event.kind {
                SessionEventKind::StateChanged { old, new, reason } => match reason {
                    Some(reason) => info!("State {} -> {} ({})", old, new, reason),
                    None => info!("State {} -> {}", old, new),
                },
                SessionEventKind::StreamAdded { origin, stream } => {
                    info!("Stream added ({:?}): {}", origin, stream.id)
                }
                SessionEventKind::ToneSent { tone } => info!("Tone sent: {}", tone),
            }
        }
    });

    let local = MediaStream::new(
        "local",
        vec![MediaTrack::audio("mic"), MediaTrack::video("camera")],
    );
    let id = session
        .initiate_outgoing("sip:alice@example.com", Some(local), CallOptions::default())
        .await?;
    directory.register(&session).await?;
    print_next(&mut outbox).await?;

    // Gathering on our side
    if let Some(link) = peer_links.last().await {
        link.emit_candidate(Some(IceCandidate::new(
            "candidate:1 1 udp 2122260223 192.0.2.10 54321 typ host",
        )))
        .await;
        link.emit_candidate(None).await;
    }
    print_next(&mut outbox).await?;
    print_next(&mut outbox).await?;

    // The remote side answers
    directory
        .route(
            RemoteStateEvent::new(id.clone(), RemoteState::Accepted)
                .with_sdp("v=0\r\no=- 1 2 IN IP4 198.51.100.7\r\ns=-\r\nt=0 0\r\n"),
        )
        .await;
    directory
        .route(RemoteStateEvent::new(id.clone(), RemoteState::Established))
        .await;

    session.send_dtmf("1234#", None).await?;

    session.terminate().await;
    print_next(&mut outbox).await?;
    directory
        .route(RemoteStateEvent::new(id, RemoteState::Terminated))
        .await;

    // Let the listener drain
    tokio::time::sleep(Duration::from_millis(10)).await;
    info!("Final state: {}, live sessions: {}", session.state().await, directory.len().await);
    Ok(())
}

async fn print_next(outbox: &mut mpsc::UnboundedReceiver<SignalingMessage>) -> anyhow::Result<()> {
    let message = tokio::time::timeout(Duration::from_secs(1), outbox.recv())
        .await?
        .ok_or_else(|| anyhow::anyhow!("outbox closed"))?;
    println!("{}", serde_json::to_string(&message)?);
    Ok(())
}
