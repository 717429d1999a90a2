// Copyright 2025 RegenNexus Contributors
// SPDX-License-Identifier: Apache-2.0

//! Identity registry for RegenNexus
//!
//! Maps each registered [`EntityId`] to the handle of the connection that
//! asserted it. The registry knows nothing about transports: a handle is any
//! cloneable value implementing [`ConnectionRef`], so it can be exercised with
//! plain test doubles and reused by any transport layer.

pub mod handle;
pub mod registry;
pub mod types;

pub use handle::{ConnectionId, ConnectionRef};
pub use registry::IdentityRegistry;
pub use types::{EntitySummary, RegistryEntry};

pub use regennexus_config::DuplicatePolicy;
pub use regennexus_protocol::EntityId;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("Entity already registered: {0}")]
    AlreadyRegistered(EntityId),

    #[error("Registry capacity reached ({max} entities)")]
    CapacityReached { max: usize },
}

pub type Result<T> = std::result::Result<T, RegistryError>;
