//! Deterministic per-connection liveness state machine.
//!
//! No sleeps and no I/O: the driver supplies a monotonic `now_ms` and carries
//! out the returned [`LivenessAction`]s. This keeps every deadline testable
//! without a runtime.

use regennexus_config::LivenessConfig;
use regennexus_protocol::EntityId;
use std::fmt;

/// Milliseconds in a monotonic clock domain provided by the driver.
pub type NowMs = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Transport handshake in progress
    Connecting,
    /// Transport up, waiting for the registration frame
    Open,
    /// Registration frame received, registry decision pending
    Registering,
    Registered,
    Closing,
    Failed,
    /// Registry cleanup done
    Closed,
}

impl ConnectionState {
    /// `true` once the connection can no longer carry traffic
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConnectionState::Closing | ConnectionState::Failed | ConnectionState::Closed
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    HandshakeTimeout,
    Transport,
    RegistrationTimeout,
    /// First frame was not a valid registration
    InvalidRegistration,
    RegistrationRejected,
    LivenessTimeout,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureReason::HandshakeTimeout => "handshake timeout",
            FailureReason::Transport => "transport error",
            FailureReason::RegistrationTimeout => "registration timeout",
            FailureReason::InvalidRegistration => "invalid registration",
            FailureReason::RegistrationRejected => "registration rejected",
            FailureReason::LivenessTimeout => "liveness timeout",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessAction {
    SendPing,
    Failed(FailureReason),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LivenessError {
    #[error("Invalid transition: cannot {event} while {from}")]
    InvalidTransition {
        from: ConnectionState,
        event: &'static str,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivenessTimings {
    pub handshake_timeout_ms: u64,
    pub registration_grace_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub liveness_timeout_ms: u64,
}

impl From<&LivenessConfig> for LivenessTimings {
    fn from(config: &LivenessConfig) -> Self {
        Self {
            handshake_timeout_ms: config.handshake_timeout_ms,
            registration_grace_ms: config.registration_grace_ms,
            heartbeat_interval_ms: config.heartbeat_interval_ms,
            liveness_timeout_ms: config.liveness_timeout_ms,
        }
    }
}

impl Default for LivenessTimings {
    fn default() -> Self {
        Self::from(&LivenessConfig::default())
    }
}

#[derive(Debug, Clone)]
pub struct LivenessStateMachine {
    timings: LivenessTimings,
    state: ConnectionState,
    entered_at_ms: NowMs,
    last_activity_ms: NowMs,
    last_ping_ms: NowMs,
    entity_id: Option<EntityId>,
    failure: Option<FailureReason>,
}

impl LivenessStateMachine {
    /// Start in `Connecting` at `now_ms`
    pub fn new(timings: LivenessTimings, now_ms: NowMs) -> Self {
        Self {
            timings,
            state: ConnectionState::Connecting,
            entered_at_ms: now_ms,
            last_activity_ms: now_ms,
            last_ping_ms: now_ms,
            entity_id: None,
            failure: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn entity_id(&self) -> Option<&EntityId> {
        self.entity_id.as_ref()
    }

    pub fn failure(&self) -> Option<FailureReason> {
        self.failure
    }

    pub fn timings(&self) -> &LivenessTimings {
        &self.timings
    }

    pub fn transport_opened(&mut self, now_ms: NowMs) -> Result<(), LivenessError> {
        self.expect(ConnectionState::Connecting, "open transport")?;
        self.enter(ConnectionState::Open, now_ms);
        self.last_activity_ms = now_ms;
        Ok(())
    }

    pub fn registration_received(&mut self, now_ms: NowMs) -> Result<(), LivenessError> {
        self.expect(ConnectionState::Open, "receive registration")?;
        self.enter(ConnectionState::Registering, now_ms);
        Ok(())
    }

    pub fn registration_accepted(&mut self, entity_id: EntityId, now_ms: NowMs) -> Result<(), LivenessError> {
        self.expect(ConnectionState::Registering, "accept registration")?;
        self.enter(ConnectionState::Registered, now_ms);
        self.entity_id = Some(entity_id);
        self.last_activity_ms = now_ms;
        self.last_ping_ms = now_ms;
        Ok(())
    }

    /// Any inbound traffic keeps the connection alive
    pub fn record_activity(&mut self, now_ms: NowMs) {
        if !self.state.is_terminal() {
            self.last_activity_ms = self.last_activity_ms.max(now_ms);
        }
    }

    /// Orderly shutdown requested by either side
    pub fn begin_close(&mut self, now_ms: NowMs) -> Result<(), LivenessError> {
        if self.state.is_terminal() {
            return Err(self.invalid("close"));
        }
        self.enter(ConnectionState::Closing, now_ms);
        Ok(())
    }

    pub fn fail(&mut self, reason: FailureReason, now_ms: NowMs) -> Result<(), LivenessError> {
        if matches!(self.state, ConnectionState::Failed | ConnectionState::Closed) {
            return Err(self.invalid("fail"));
        }
        self.failure = Some(reason);
        self.enter(ConnectionState::Failed, now_ms);
        Ok(())
    }

    /// Move `Closing`/`Failed` to `Closed`
    ///
    /// Succeeds exactly once and yields the entity that was registered, if
    /// any. The driver performs registry cleanup on that single success.
    pub fn finish(&mut self, now_ms: NowMs) -> Result<Option<EntityId>, LivenessError> {
        if !matches!(self.state, ConnectionState::Closing | ConnectionState::Failed) {
            return Err(self.invalid("finish"));
        }
        self.enter(ConnectionState::Closed, now_ms);
        Ok(self.entity_id.clone())
    }

    /// Earliest time at which [`poll`](Self::poll) has work to do
    pub fn next_deadline(&self) -> Option<NowMs> {
        let t = &self.timings;
        match self.state {
            ConnectionState::Connecting => Some(self.entered_at_ms + t.handshake_timeout_ms),
            ConnectionState::Open => Some(self.entered_at_ms + t.registration_grace_ms),
            ConnectionState::Registered => Some(
                (self.last_ping_ms + t.heartbeat_interval_ms).min(self.last_activity_ms + t.liveness_timeout_ms),
            ),
            _ => None,
        }
    }

    /// Check deadlines at `now_ms`
    pub fn poll(&mut self, now_ms: NowMs) -> Vec<LivenessAction> {
        let t = self.timings;
        let timed_out = match self.state {
            ConnectionState::Connecting => {
                (now_ms.saturating_sub(self.entered_at_ms) >= t.handshake_timeout_ms)
                    .then_some(FailureReason::HandshakeTimeout)
            }
            ConnectionState::Open => (now_ms.saturating_sub(self.entered_at_ms) >= t.registration_grace_ms)
                .then_some(FailureReason::RegistrationTimeout),
            ConnectionState::Registered => (now_ms.saturating_sub(self.last_activity_ms) >= t.liveness_timeout_ms)
                .then_some(FailureReason::LivenessTimeout),
            _ => return Vec::new(),
        };

        if let Some(reason) = timed_out {
            self.failure = Some(reason);
            self.enter(ConnectionState::Failed, now_ms);
            return vec![LivenessAction::Failed(reason)];
        }

        if self.state == ConnectionState::Registered
            && now_ms.saturating_sub(self.last_ping_ms) >= t.heartbeat_interval_ms
        {
            self.last_ping_ms = now_ms;
            return vec![LivenessAction::SendPing];
        }
        Vec::new()
    }

    fn enter(&mut self, state: ConnectionState, now_ms: NowMs) {
        self.state = state;
        self.entered_at_ms = now_ms;
    }

    fn expect(&self, state: ConnectionState, event: &'static str) -> Result<(), LivenessError> {
        if self.state == state {
            Ok(())
        } else {
            Err(self.invalid(event))
        }
    }

    fn invalid(&self, event: &'static str) -> LivenessError {
        LivenessError::InvalidTransition {
            from: self.state,
            event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timings() -> LivenessTimings {
        LivenessTimings {
            handshake_timeout_ms: 100,
            registration_grace_ms: 200,
            heartbeat_interval_ms: 1_000,
            liveness_timeout_ms: 3_000,
        }
    }

    fn registered(now: NowMs) -> LivenessStateMachine {
        let mut sm = LivenessStateMachine::new(timings(), now);
        sm.transport_opened(now).unwrap();
        sm.registration_received(now).unwrap();
        sm.registration_accepted(EntityId::new("A").unwrap(), now).unwrap();
        sm
    }

    #[test]
    fn test_happy_path() {
        let mut sm = registered(0);
        assert_eq!(sm.state(), ConnectionState::Registered);
        sm.begin_close(10).unwrap();
        assert_eq!(sm.finish(10).unwrap(), Some(EntityId::new("A").unwrap()));
        assert_eq!(sm.state(), ConnectionState::Closed);
    }

    #[test]
    fn test_handshake_timeout() {
        let mut sm = LivenessStateMachine::new(timings(), 0);
        assert_eq!(sm.next_deadline(), Some(100));
        assert!(sm.poll(99).is_empty());
        assert_eq!(sm.poll(100), vec![LivenessAction::Failed(FailureReason::HandshakeTimeout)]);
        assert_eq!(sm.state(), ConnectionState::Failed);
    }

    #[test]
    fn test_registration_grace() {
        let mut sm = LivenessStateMachine::new(timings(), 0);
        sm.transport_opened(50).unwrap();
        assert_eq!(sm.next_deadline(), Some(250));
        assert_eq!(sm.poll(250), vec![LivenessAction::Failed(FailureReason::RegistrationTimeout)]);
        assert_eq!(sm.finish(250).unwrap(), None);
    }

    #[test]
    fn test_heartbeat_then_liveness_timeout() {
        let mut sm = registered(0);
        assert_eq!(sm.next_deadline(), Some(1_000));
        assert_eq!(sm.poll(1_000), vec![LivenessAction::SendPing]);
        assert!(sm.poll(1_500).is_empty());
        assert_eq!(sm.poll(2_000), vec![LivenessAction::SendPing]);
        assert_eq!(sm.poll(3_000), vec![LivenessAction::Failed(FailureReason::LivenessTimeout)]);
        assert_eq!(sm.failure(), Some(FailureReason::LivenessTimeout));
    }

    #[test]
    fn test_activity_defers_timeout() {
        let mut sm = registered(0);
        sm.record_activity(2_500);
        assert!(!sm.poll(3_000).contains(&LivenessAction::Failed(FailureReason::LivenessTimeout)));
        assert_eq!(sm.next_deadline(), Some(4_000));
        assert_eq!(sm.poll(5_500), vec![LivenessAction::Failed(FailureReason::LivenessTimeout)]);
    }

    #[test]
    fn test_invalid_transitions() {
        let mut sm = LivenessStateMachine::new(timings(), 0);
        assert!(matches!(
            sm.registration_received(0),
            Err(LivenessError::InvalidTransition {
                from: ConnectionState::Connecting,
                ..
            })
        ));
        assert!(sm.finish(0).is_err());

        sm.fail(FailureReason::Transport, 0).unwrap();
        assert!(sm.begin_close(0).is_err());
        assert!(sm.fail(FailureReason::Transport, 0).is_err());
    }

    #[test]
    fn test_finish_succeeds_once() {
        let mut sm = registered(0);
        sm.fail(FailureReason::Transport, 5).unwrap();
        assert!(sm.finish(5).is_ok());
        assert!(sm.finish(6).is_err());
        assert!(sm.next_deadline().is_none());
    }
}
