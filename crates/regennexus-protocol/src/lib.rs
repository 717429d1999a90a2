// Copyright 2025 RegenNexus Contributors
// SPDX-License-Identifier: Apache-2.0

//! Wire protocol shared by the RegenNexus registry and its agents
//!
//! Agents exchange JSON [`Envelope`]s addressed by [`EntityId`] and tagged
//! with an intent. The first frame on every connection is a
//! [`RegistrationFrame`]; everything after it is an envelope. The [`Codec`]
//! trait is the seam between raw transport frames and these types.

pub mod clock;
pub mod codec;
pub mod entity_id;
pub mod envelope;
pub mod frame;

pub use clock::{Clock, ManualClock, SystemClock};
pub use codec::{Codec, DecodeError, JsonCodec};
pub use entity_id::EntityId;
pub use envelope::{Envelope, BROADCAST_RECIPIENT};
pub use frame::{InboundFrame, RegistrationFrame, REGISTRATION_FRAME_TYPE};

/// Errors raised while constructing protocol values
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("Entity id cannot be empty")]
    EmptyEntityId,

    #[error("Intent cannot be empty")]
    EmptyIntent,
}

/// Well-known intents used by the registry and the reply helpers
pub mod intents {
    pub const ERROR: &str = "error";
    pub const ACK: &str = "ack";
    pub const PING: &str = "ping";
    pub const PONG: &str = "pong";
    pub const DISCOVER: &str = "discover";
    pub const DISCOVER_RESULT: &str = "discover_result";
}
