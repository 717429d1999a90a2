// Copyright 2025 RegenNexus Contributors
// SPDX-License-Identifier: Apache-2.0

//! Async driver for [`LivenessStateMachine`]
//!
//! One supervisor runs per connection. It owns the connection's inbound
//! event stream, routes that connection's envelopes strictly in arrival
//! order, and waits on the state machine's next deadline. Whatever way the
//! connection ends, registry cleanup happens exactly once, in `finish`.

use futures_util::StreamExt;
use regennexus_config::RoutingConfig;
use regennexus_protocol::{Clock, DecodeError, EntityId, Envelope, InboundFrame, RegistrationFrame, SystemClock};
use regennexus_registry::{ConnectionId, ConnectionRef};
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep_until, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::state_machine::{
    ConnectionState, FailureReason, LivenessAction, LivenessStateMachine, LivenessTimings, NowMs,
};
use crate::connection::{ConnectionEvent, SharedConnection};
use crate::error::TransportError;
use crate::router::{RouteOutcome, Router};

/// Error code carried by undeliverable notifications
pub const UNDELIVERABLE_ERROR_CODE: &str = "undeliverable";

/// Shared by every supervisor of one server
#[derive(Clone)]
pub struct RoutingContext {
    pub router: Arc<Router>,
    pub liveness: LivenessTimings,
    pub routing: RoutingConfig,
    /// Wall clock used for envelope expiry
    pub clock: Arc<dyn Clock>,
}

impl RoutingContext {
    pub fn new(router: Arc<Router>, liveness: LivenessTimings, routing: RoutingConfig) -> Self {
        Self {
            router,
            liveness,
            routing,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

/// How a supervised connection ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorReport {
    pub connection_id: ConnectionId,
    /// Entity the connection had registered, if it got that far
    pub entity_id: Option<EntityId>,
    /// `None` for an orderly close
    pub failure: Option<FailureReason>,
    /// Entity actually removed from the registry (absent if superseded)
    pub removed: Option<EntityId>,
}

pub struct ConnectionSupervisor {
    ctx: RoutingContext,
    handle: SharedConnection,
    peer: String,
    cancel: CancellationToken,
    origin: Instant,
    machine: LivenessStateMachine,
}

impl ConnectionSupervisor {
    pub fn new(ctx: RoutingContext, handle: SharedConnection, peer: impl Into<String>, cancel: CancellationToken) -> Self {
        let machine = LivenessStateMachine::new(ctx.liveness, 0);
        Self {
            ctx,
            handle,
            peer: peer.into(),
            cancel,
            origin: Instant::now(),
            machine,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.machine.state()
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.handle.connection_id()
    }

    /// Await the transport handshake within `handshake_timeout_ms`
    ///
    /// On failure the connection is already finished when this returns.
    pub async fn connect<F, T, E>(&mut self, handshake: F) -> Result<T, TransportError>
    where
        F: Future<Output = Result<T, E>>,
        E: Display,
    {
        let limit = Duration::from_millis(self.ctx.liveness.handshake_timeout_ms);
        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(TransportError::Cancelled),
            outcome = timeout(limit, handshake) => match outcome {
                Ok(Ok(stream)) => Ok(stream),
                Ok(Err(e)) => Err(TransportError::HandshakeFailed(e.to_string())),
                Err(_) => Err(TransportError::Timeout),
            },
        };

        let now = self.now_ms();
        match result {
            Ok(stream) => {
                self.transition(|m| m.transport_opened(now));
                debug!("[SUPERVISOR] {} transport open", self.peer);
                Ok(stream)
            }
            Err(e) => {
                let reason = match e {
                    TransportError::Timeout => FailureReason::HandshakeTimeout,
                    _ => FailureReason::Transport,
                };
                warn!("[SUPERVISOR] {} handshake failed: {}", self.peer, e);
                self.transition(|m| m.fail(reason, now));
                self.finish();
                Err(e)
            }
        }
    }

    /// Drive the connection until it closes, fails or is cancelled
    pub async fn run<S>(mut self, events: S) -> SupervisorReport
    where
        S: futures_util::Stream<Item = ConnectionEvent>,
    {
        let mut events = std::pin::pin!(events);

        while !self.machine.state().is_terminal() {
            let deadline = self.machine.next_deadline().map(|ms| self.origin + Duration::from_millis(ms));

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!("[SUPERVISOR] {} cancelled", self.peer);
                    let now = self.now_ms();
                    self.transition(|m| m.begin_close(now));
                }
                event = events.next() => self.on_event(event),
                _ = wait_until(deadline) => self.on_deadline(),
            }
        }

        self.finish()
    }

    fn on_event(&mut self, event: Option<ConnectionEvent>) {
        let now = self.now_ms();
        match event {
            Some(ConnectionEvent::Frame(bytes)) => {
                self.machine.record_activity(now);
                self.on_frame(&bytes);
            }
            Some(ConnectionEvent::Heartbeat) => self.machine.record_activity(now),
            Some(ConnectionEvent::Closed) | None => {
                debug!("[SUPERVISOR] {} closed by peer", self.peer);
                self.transition(|m| m.begin_close(now));
            }
            Some(ConnectionEvent::Failed(e)) => {
                warn!("[SUPERVISOR] {} transport error: {}", self.peer, e);
                self.transition(|m| m.fail(FailureReason::Transport, now));
            }
        }
    }

    fn on_deadline(&mut self) {
        let now = self.now_ms();
        for action in self.machine.poll(now) {
            match action {
                LivenessAction::SendPing => {
                    trace!("[SUPERVISOR] {} ping", self.peer);
                    if let Err(e) = self.handle.ping() {
                        warn!("[SUPERVISOR] {} ping failed: {}", self.peer, e);
                        self.transition(|m| m.fail(FailureReason::Transport, now));
                    }
                }
                LivenessAction::Failed(reason) => {
                    warn!("[SUPERVISOR] {} failed: {}", self.peer, reason);
                }
            }
        }
    }

    fn on_frame(&mut self, bytes: &[u8]) {
        let frame = self.ctx.router.codec().decode_frame(bytes);
        match (self.machine.state(), frame) {
            (ConnectionState::Open, Ok(InboundFrame::Registration(registration))) => self.on_registration(registration),
            (ConnectionState::Open, other) => {
                let detail = match other {
                    Ok(frame) => format!("got {} frame", frame.kind()),
                    Err(e) => e.to_string(),
                };
                warn!("[SUPERVISOR] {} expected registration: {}", self.peer, detail);
                let now = self.now_ms();
                self.transition(|m| m.fail(FailureReason::InvalidRegistration, now));
            }
            (ConnectionState::Registered, Ok(InboundFrame::Envelope(envelope))) => self.on_envelope(envelope),
            (ConnectionState::Registered, Ok(InboundFrame::Registration(registration))) => {
                warn!(
                    "[SUPERVISOR] {} sent a second registration ({}), ignoring",
                    self.peer, registration.entity_id
                );
            }
            (ConnectionState::Registered, Err(e)) => self.on_decode_error(e),
            (state, _) => trace!("[SUPERVISOR] {} frame ignored while {}", self.peer, state),
        }
    }

    fn on_registration(&mut self, registration: RegistrationFrame) {
        let now = self.now_ms();
        self.transition(|m| m.registration_received(now));

        let RegistrationFrame {
            entity_id,
            capabilities,
        } = registration;
        if self.ctx.router.is_reserved(&entity_id) {
            warn!("[SUPERVISOR] {} tried to register reserved id {}", self.peer, entity_id);
            self.transition(|m| m.fail(FailureReason::RegistrationRejected, now));
            return;
        }
        let registry = self.ctx.router.registry();
        match registry.register_with_capabilities(entity_id.clone(), Arc::clone(&self.handle), capabilities) {
            Ok(displaced) => {
                if let Some(previous) = displaced {
                    info!(
                        "[SUPERVISOR] {} superseded connection {} for {}",
                        self.peer,
                        previous.connection_id(),
                        entity_id
                    );
                    previous.close("superseded");
                }
                info!("[SUPERVISOR] {} registered as {}", self.peer, entity_id);
                self.transition(|m| m.registration_accepted(entity_id, now));
            }
            Err(e) => {
                warn!("[SUPERVISOR] {} registration rejected: {}", self.peer, e);
                self.transition(|m| m.fail(FailureReason::RegistrationRejected, now));
            }
        }
    }

    fn on_envelope(&mut self, envelope: Envelope) {
        if self.ctx.routing.enforce_sender_identity {
            if let Some(registered) = self.machine.entity_id() {
                if envelope.sender() != registered {
                    warn!(
                        "[SUPERVISOR] {} (registered as {}) sent envelope as {}, dropping",
                        self.peer,
                        registered,
                        envelope.sender()
                    );
                    return;
                }
            }
        }

        if envelope.is_expired(self.ctx.clock.now()) {
            debug!(
                "[SUPERVISOR] Dropping expired '{}' from {} to {}",
                envelope.intent(),
                envelope.sender(),
                envelope.recipient()
            );
            return;
        }

        let original = self.ctx.routing.notify_undeliverable.then(|| envelope.clone());
        match self.ctx.router.route(envelope) {
            RouteOutcome::Undeliverable(reason) => {
                if let Some(original) = original {
                    let notice = original
                        .error_reply(UNDELIVERABLE_ERROR_CODE, reason.as_str())
                        .with_sender(self.ctx.router.local_entity().clone());
                    let frame = self.ctx.router.codec().encode(&notice);
                    if let Err(e) = self.handle.send(frame) {
                        debug!("[SUPERVISOR] {} undeliverable notice not sent: {}", self.peer, e);
                    }
                }
            }
            RouteOutcome::Delivered | RouteOutcome::Broadcast { .. } | RouteOutcome::LocalDispatch(_) => {}
        }
    }

    fn on_decode_error(&self, error: DecodeError) {
        warn!("[SUPERVISOR] {} dropped undecodable frame: {}", self.peer, error);
    }

    fn finish(&mut self) -> SupervisorReport {
        let now = self.now_ms();
        let connection_id = self.handle.connection_id();
        let failure = self.machine.failure();

        let (entity_id, removed) = match self.machine.finish(now) {
            Ok(entity_id) => (entity_id, self.ctx.router.registry().remove_connection(connection_id)),
            Err(e) => {
                debug!("[SUPERVISOR] {} already finished: {}", self.peer, e);
                (self.machine.entity_id().cloned(), None)
            }
        };

        let reason = failure.map_or_else(|| "closed".to_string(), |f| f.to_string());
        self.handle.close(&reason);

        match failure {
            Some(f) => info!("[SUPERVISOR] {} ({}) disconnected: {}", self.peer, describe(&entity_id), f),
            None => info!("[SUPERVISOR] {} ({}) disconnected", self.peer, describe(&entity_id)),
        }

        SupervisorReport {
            connection_id,
            entity_id,
            failure,
            removed,
        }
    }

    fn transition<F>(&mut self, step: F)
    where
        F: FnOnce(&mut LivenessStateMachine) -> Result<(), super::LivenessError>,
    {
        if let Err(e) = step(&mut self.machine) {
            debug!("[SUPERVISOR] {}: {}", self.peer, e);
        }
    }

    fn now_ms(&self) -> NowMs {
        self.origin.elapsed().as_millis() as NowMs
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn describe(entity_id: &Option<EntityId>) -> &str {
    entity_id.as_ref().map_or("unregistered", EntityId::as_str)
}
