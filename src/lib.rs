//! # RegenNexus
//!
//! Registry-mediated intent routing for agents. Agents hold one WebSocket
//! connection to a registry, register under an entity id, and exchange
//! envelopes (`sender`, `recipient`, `intent`, `payload`) that the registry
//! forwards by recipient id. The registry itself is an addressable entity that
//! answers `ping` and `discover`.
//!
//! ## Quick Start
//!
//! ```toml
//! [dependencies]
//! regennexus = "0.1"  # Default: server + agent
//! ```
//!
//! ## Feature Flags
//!
//! - **`server`** (default): router, liveness supervision and WebSocket registry
//! - **`agent`** (default): Rust agent client
//! - **`file-logging`**: rotating log files for the registry binary
//!
//! ## Usage Examples
//!
//! ### Registry
//!
//! ```rust,no_run
//! use regennexus::prelude::*;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RegenNexusConfig::default();
//! let server = RegistryServer::bind(&config).await?;
//! println!("registry at {}", server.url());
//! server.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! ### Agent
//!
//! ```rust,no_run
//! use regennexus::prelude::*;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let mut agent = AgentClient::new(AgentConfig {
//!     entity_id: "rust_client".to_string(),
//!     ..AgentConfig::default()
//! })?;
//! agent.on("sensor_data", |envelope: Envelope| async move {
//!     println!("{} sent {}", envelope.sender(), envelope.payload());
//! });
//! agent.connect().await?;
//! agent.send("cpp_client", "command", serde_json::json!({"action": "start"}))?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │  Foundation: regennexus-config, regennexus-protocol     │
//! │  (Configuration, Envelope, RegistrationFrame, codec)    │
//! └─────────────────────────────────────────────────────────┘
//!                         ↓
//! ┌─────────────────────────────────────────────────────────┐
//! │  Infrastructure: regennexus-registry                    │
//! │  (entity id -> connection table)                        │
//! └─────────────────────────────────────────────────────────┘
//!                         ↓
//! ┌─────────────────────────────────────────────────────────┐
//! │  Routing: regennexus-router                             │
//! │  (Router, liveness supervision, WebSocket registry)     │
//! └─────────────────────────────────────────────────────────┘
//!                         ↓
//! ┌─────────────────────────────────────────────────────────┐
//! │  Clients: regennexus-agent                              │
//! │  (Rust agent library)                                   │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## License
//!
//! Apache-2.0

// Re-export foundation
pub use regennexus_config as config;
pub use regennexus_protocol as protocol;
pub use regennexus_registry as registry;

// Re-export runtime layers
#[cfg(feature = "server")]
pub use regennexus_router as router;

#[cfg(feature = "server")]
pub use regennexus_observability as observability;

#[cfg(feature = "agent")]
pub use regennexus_agent as agent;

/// Prelude - commonly used types and traits
pub mod prelude {
    pub use crate::config::{AgentConfig, RegenNexusConfig};
    pub use crate::protocol::{Codec, EntityId, Envelope, JsonCodec, RegistrationFrame};

    #[cfg(feature = "server")]
    pub use crate::router::{HandlerDispatch, RegistryServer, RouteOutcome, Router};

    #[cfg(feature = "agent")]
    pub use crate::agent::{AgentClient, AgentError, AgentSender};
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_facade_imports() {
        use crate::prelude::*;
        let id = EntityId::new("python_client").unwrap();
        assert_eq!(id.as_str(), "python_client");
    }
}
