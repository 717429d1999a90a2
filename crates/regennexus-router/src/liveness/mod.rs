//! Connection liveness: a pure state machine plus its async supervisor

pub mod state_machine;
pub mod supervisor;

pub use state_machine::{
    ConnectionState, FailureReason, LivenessAction, LivenessError, LivenessStateMachine, LivenessTimings, NowMs,
};
pub use supervisor::{ConnectionSupervisor, RoutingContext, SupervisorReport, UNDELIVERABLE_ERROR_CODE};
