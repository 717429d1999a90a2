// Copyright 2025 RegenNexus Contributors
// SPDX-License-Identifier: Apache-2.0

//! Registry-mediated intent routing for RegenNexus
//!
//! Data flow for one inbound frame:
//!
//! 1. a connection task reads the frame and hands it to its
//!    [`ConnectionSupervisor`](liveness::ConnectionSupervisor)
//! 2. the [`Codec`](regennexus_protocol::Codec) turns it into an envelope
//! 3. the [`Router`] either queues it on the recipient's connection or, for
//!    the registry's own entity, hands it to [`HandlerDispatch`]
//!
//! The identity registry is the only shared mutable structure besides the
//! handler table. Each connection's envelopes are routed sequentially by its
//! own supervisor into FIFO outbound queues, which preserves per-sender order.

pub mod connection;
pub mod dispatch;
pub mod error;
pub mod liveness;
pub mod router;
pub mod services;
#[cfg(feature = "websocket")]
pub mod websocket;

pub use connection::{
    ChannelConnection, ConnectionEvent, ConnectionHandle, ConnectionRegistry, OutboundFrame, SharedConnection,
};
pub use dispatch::{DispatchOutcome, HandlerDispatch, IntentHandler};
pub use error::{TransportError, TransportResult};
pub use liveness::{
    ConnectionState, ConnectionSupervisor, FailureReason, LivenessError, LivenessStateMachine, LivenessTimings,
    RoutingContext, SupervisorReport,
};
pub use router::{RouteOutcome, Router, UndeliverableReason};
pub use services::RegistryServices;

pub use regennexus_registry::{ConnectionId, ConnectionRef};
#[cfg(feature = "websocket")]
pub use websocket::RegistryServer;
