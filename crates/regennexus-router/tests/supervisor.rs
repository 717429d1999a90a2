//! Connection supervisor behaviour with a paused Tokio clock

use futures::channel::mpsc::{unbounded, UnboundedSender};
use regennexus_config::{RegistryConfig, RoutingConfig};
use regennexus_protocol::{Codec, EntityId, Envelope, JsonCodec, ManualClock, RegistrationFrame};
use regennexus_router::liveness::UNDELIVERABLE_ERROR_CODE;
use regennexus_router::{
    ChannelConnection, ConnectionEvent, ConnectionRef, ConnectionState, ConnectionSupervisor, FailureReason, HandlerDispatch,
    LivenessTimings, OutboundFrame, RegistryServices, Router, RoutingContext, SupervisorReport, TransportError,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const TIMINGS: LivenessTimings = LivenessTimings {
    handshake_timeout_ms: 100,
    registration_grace_ms: 200,
    heartbeat_interval_ms: 10_000,
    liveness_timeout_ms: 30_000,
};

fn id(s: &str) -> EntityId {
    EntityId::new(s).unwrap()
}

fn context_with(timings: LivenessTimings, routing: RoutingConfig) -> RoutingContext {
    let router = Router::from_config(
        &RegistryConfig::default(),
        Arc::new(HandlerDispatch::new()),
        Arc::new(JsonCodec::new()),
    )
    .unwrap();
    RoutingContext::new(Arc::new(router), timings, routing)
}

fn context() -> RoutingContext {
    context_with(TIMINGS, RoutingConfig::default())
}

fn registration(entity: &str) -> ConnectionEvent {
    ConnectionEvent::Frame(RegistrationFrame::new(id(entity)).encode())
}

fn envelope_frame(from: &str, to: &str, intent: &str) -> ConnectionEvent {
    let envelope = Envelope::new(id(from), id(to), intent, json!({ "from": from })).unwrap();
    ConnectionEvent::Frame(JsonCodec::new().encode(&envelope))
}

struct Peer {
    events: UnboundedSender<ConnectionEvent>,
    outbound: UnboundedReceiver<OutboundFrame>,
    task: JoinHandle<SupervisorReport>,
}

impl Peer {
    async fn start(ctx: &RoutingContext, cancel: CancellationToken) -> Self {
        let (handle, outbound) = ChannelConnection::shared();
        let mut supervisor = ConnectionSupervisor::new(ctx.clone(), handle, "peer", cancel);
        supervisor
            .connect(async { Ok::<_, std::io::Error>(()) })
            .await
            .unwrap();
        assert_eq!(supervisor.state(), ConnectionState::Open);

        let (events, rx) = unbounded();
        let task = tokio::spawn(supervisor.run(rx));
        Self { events, outbound, task }
    }

    async fn registered(ctx: &RoutingContext, entity: &str) -> Self {
        let peer = Self::start(ctx, CancellationToken::new()).await;
        peer.send(registration(entity));
        wait_for(|| ctx.router.registry().contains(entity)).await;
        peer
    }

    fn send(&self, event: ConnectionEvent) {
        self.events.unbounded_send(event).unwrap();
    }

    /// Next data frame, skipping pings
    async fn next_envelope(&mut self) -> Envelope {
        loop {
            match self.outbound.recv().await {
                Some(OutboundFrame::Data(bytes)) => return JsonCodec::new().decode(&bytes).unwrap(),
                Some(OutboundFrame::Ping) => continue,
                other => panic!("expected data, got {:?}", other),
            }
        }
    }

    async fn close(self) -> SupervisorReport {
        self.send(ConnectionEvent::Closed);
        self.task.await.unwrap()
    }
}

async fn wait_for(condition: impl Fn() -> bool) {
    for _ in 0..1_000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition not reached");
}

#[tokio::test(start_paused = true)]
async fn test_registered_connection_pings_then_times_out() {
    let timings = LivenessTimings {
        heartbeat_interval_ms: 100,
        liveness_timeout_ms: 350,
        ..TIMINGS
    };
    let ctx = context_with(timings, RoutingConfig::default());
    let (handle, mut outbound) = ChannelConnection::shared();
    let mut supervisor = ConnectionSupervisor::new(ctx.clone(), handle, "quiet", CancellationToken::new());
    supervisor
        .connect(async { Ok::<_, std::io::Error>(()) })
        .await
        .unwrap();

    let (events, rx) = unbounded();
    events.unbounded_send(registration("A")).unwrap();
    let report = supervisor.run(rx).await;

    assert_eq!(report.failure, Some(FailureReason::LivenessTimeout));
    assert_eq!(report.entity_id, Some(id("A")));
    assert_eq!(report.removed, Some(id("A")));
    assert!(ctx.router.registry().is_empty());

    let mut pings = 0;
    let mut closed = None;
    while let Ok(frame) = outbound.try_recv() {
        match frame {
            OutboundFrame::Ping => pings += 1,
            OutboundFrame::Close(reason) => closed = Some(reason),
            OutboundFrame::Data(_) => panic!("unexpected data"),
        }
    }
    assert_eq!(pings, 3);
    assert_eq!(closed.as_deref(), Some("liveness timeout"));
}

#[tokio::test(start_paused = true)]
async fn test_heartbeats_keep_connection_alive() {
    let timings = LivenessTimings {
        heartbeat_interval_ms: 100,
        liveness_timeout_ms: 350,
        ..TIMINGS
    };
    let ctx = context_with(timings, RoutingConfig::default());
    let peer = Peer::registered(&ctx, "A").await;

    for _ in 0..10 {
        tokio::time::sleep(Duration::from_millis(200)).await;
        peer.send(ConnectionEvent::Heartbeat);
    }
    assert!(ctx.router.registry().contains("A"));

    let report = peer.close().await;
    assert_eq!(report.failure, None);
    assert_eq!(report.removed, Some(id("A")));
}

#[tokio::test(start_paused = true)]
async fn test_registration_grace_expires() {
    let ctx = context();
    let peer = Peer::start(&ctx, CancellationToken::new()).await;

    let report = peer.task.await.unwrap();
    assert_eq!(report.failure, Some(FailureReason::RegistrationTimeout));
    assert_eq!(report.entity_id, None);
    drop(peer.events);
}

#[tokio::test(start_paused = true)]
async fn test_envelope_before_registration_fails() {
    let ctx = context();
    let peer = Peer::start(&ctx, CancellationToken::new()).await;
    peer.send(envelope_frame("A", "B", "x"));

    let report = peer.task.await.unwrap();
    assert_eq!(report.failure, Some(FailureReason::InvalidRegistration));
    assert!(ctx.router.registry().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_reserved_ids_cannot_register() {
    let ctx = context();
    for reserved in ["registry", "self", "*"] {
        let peer = Peer::start(&ctx, CancellationToken::new()).await;
        peer.send(registration(reserved));

        let report = peer.task.await.unwrap();
        assert_eq!(report.failure, Some(FailureReason::RegistrationRejected), "{reserved}");
        assert_eq!(report.entity_id, None);
        assert!(ctx.router.registry().is_empty());
    }
}

#[tokio::test(start_paused = true)]
async fn test_registry_identity_cannot_be_forged() {
    let ctx = context();
    RegistryServices::install(&ctx.router);
    let mut b = Peer::registered(&ctx, "B").await;

    let impostor = Peer::start(&ctx, CancellationToken::new()).await;
    impostor.send(registration("registry"));
    // the rejected connection is already finished; this frame goes nowhere
    let _ = impostor.events.unbounded_send(envelope_frame("registry", "B", "pong"));
    let report = impostor.task.await.unwrap();
    assert_eq!(report.failure, Some(FailureReason::RegistrationRejected));

    // the first pong B sees must be the registry's echo of its own ping
    b.send(envelope_frame("B", "registry", "ping"));
    let pong = b.next_envelope().await;
    assert_eq!(pong.intent(), "pong");
    assert_eq!(pong.sender(), &id("registry"));
    assert_eq!(pong.payload()["from"], "B");
    b.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_handshake_timeout() {
    let ctx = context();
    let (handle, _outbound) = ChannelConnection::shared();
    let mut supervisor = ConnectionSupervisor::new(ctx, handle, "slow", CancellationToken::new());

    let result = supervisor
        .connect(std::future::pending::<Result<(), std::io::Error>>())
        .await;
    assert_eq!(result, Err(TransportError::Timeout));
    assert_eq!(supervisor.state(), ConnectionState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_superseded_connection_cleanup_keeps_successor() {
    let ctx = context();
    let mut first = Peer::registered(&ctx, "A").await;
    let second = Peer::start(&ctx, CancellationToken::new()).await;
    let second_id = {
        second.send(registration("A"));
        // the first connection is told to close once it is displaced
        match first.outbound.recv().await {
            Some(OutboundFrame::Close(reason)) => assert_eq!(reason, "superseded"),
            other => panic!("expected close, got {:?}", other),
        }
        ctx.router.registry().resolve("A").map(|h| h.connection_id())
    };

    let report = first.close().await;
    assert_eq!(report.entity_id, Some(id("A")));
    assert_eq!(report.removed, None);
    assert_eq!(ctx.router.registry().resolve("A").map(|h| h.connection_id()), second_id);

    let report = second.close().await;
    assert_eq!(report.removed, Some(id("A")));
}

#[tokio::test(start_paused = true)]
async fn test_spoofed_sender_is_dropped() {
    let ctx = context();
    let a = Peer::registered(&ctx, "A").await;
    let mut b = Peer::registered(&ctx, "B").await;

    a.send(envelope_frame("B", "B", "spoofed"));
    a.send(envelope_frame("A", "B", "genuine"));

    let received = b.next_envelope().await;
    assert_eq!(received.intent(), "genuine");
    assert_eq!(received.sender(), &id("A"));

    a.close().await;
    b.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_undeliverable_notification() {
    let routing = RoutingConfig {
        notify_undeliverable: true,
        ..RoutingConfig::default()
    };
    let ctx = context_with(TIMINGS, routing);
    let mut a = Peer::registered(&ctx, "A").await;

    a.send(envelope_frame("A", "C", "hello"));

    let notice = a.next_envelope().await;
    assert_eq!(notice.intent(), "error");
    assert_eq!(notice.sender(), &id("registry"));
    assert_eq!(notice.recipient(), &id("A"));
    assert_eq!(notice.payload()["error_code"], UNDELIVERABLE_ERROR_CODE);
    assert_eq!(notice.payload()["original_intent"], "hello");
    a.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_undecodable_frame_is_dropped_and_connection_continues() {
    let ctx = context();
    let a = Peer::registered(&ctx, "A").await;
    let mut b = Peer::registered(&ctx, "B").await;

    a.send(ConnectionEvent::Frame(b"{not json".to_vec()));
    a.send(ConnectionEvent::Frame(br#"{"sender": "A", "recipient": "B"}"#.to_vec()));
    a.send(envelope_frame("A", "B", "after"));

    assert_eq!(b.next_envelope().await.intent(), "after");
    let report = a.close().await;
    assert_eq!(report.failure, None);
    b.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_expired_envelope_is_dropped() {
    let ctx = context().with_clock(Arc::new(ManualClock::new(1_000.0)));
    let a = Peer::registered(&ctx, "A").await;
    let mut b = Peer::registered(&ctx, "B").await;

    let stale = Envelope::new(id("A"), id("B"), "stale", json!({}))
        .unwrap()
        .with_timestamp(10.0)
        .with_ttl(5.0);
    a.send(ConnectionEvent::Frame(JsonCodec::new().encode(&stale)));
    a.send(envelope_frame("A", "B", "fresh"));

    assert_eq!(b.next_envelope().await.intent(), "fresh");
    a.close().await;
    b.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_closes_and_cleans_up() {
    let ctx = context();
    let cancel = CancellationToken::new();
    let peer = Peer::start(&ctx, cancel.child_token()).await;
    peer.send(registration("A"));
    wait_for(|| ctx.router.registry().contains("A")).await;

    cancel.cancel();
    let report = peer.task.await.unwrap();
    assert_eq!(report.failure, None);
    assert_eq!(report.removed, Some(id("A")));
    assert!(ctx.router.registry().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_transport_failure() {
    let ctx = context();
    let peer = Peer::registered(&ctx, "A").await;
    peer.send(ConnectionEvent::Failed(TransportError::ReceiveFailed("reset".into())));

    let report = peer.task.await.unwrap();
    assert_eq!(report.failure, Some(FailureReason::Transport));
    assert!(!ctx.router.registry().contains("A"));
}
