// Copyright 2025 RegenNexus Contributors
// SPDX-License-Identifier: Apache-2.0

//! # RegenNexus Agent
//!
//! Client library for agents that talk to each other through a RegenNexus
//! registry.
//!
//! ## Quick Start
//!
//! ```ignore
//! use regennexus_agent::{AgentClient, AgentConfig};
//!
//! let mut agent = AgentClient::new(AgentConfig {
//!     entity_id: "rust_client".to_string(),
//!     registry_url: "ws://127.0.0.1:8000".to_string(),
//!     ..AgentConfig::default()
//! })?;
//!
//! let sender = agent.sender();
//! agent.on("ping", move |envelope: Envelope| {
//!     let sender = sender.clone();
//!     async move {
//!         let _ = sender.reply(&envelope, "pong", envelope.payload().clone());
//!     }
//! });
//!
//! agent.connect().await?;
//! agent.send("cpp_client", "sensor_data", serde_json::json!({"temp": 21.5}))?;
//! ```

pub mod client;
pub mod error;
pub mod heartbeat;

pub use client::{AgentClient, AgentSender};
pub use error::{AgentError, Result};
pub use heartbeat::HeartbeatService;

pub use regennexus_config::AgentConfig;
pub use regennexus_protocol::{EntityId, Envelope};
