// Copyright 2025 RegenNexus Contributors
// SPDX-License-Identifier: Apache-2.0

//! Configuration type definitions
//!
//! This module defines all configuration structs that map to sections in
//! `regennexus_configuration.toml`.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct RegenNexusConfig {
    pub server: ServerConfig,
    pub registry: RegistryConfig,
    pub liveness: LivenessConfig,
    pub routing: RoutingConfig,
    pub logging: LoggingConfig,
    pub agent: AgentConfig,
}

/// WebSocket listener of the registry process
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    /// `host:port` string suitable for `TcpListener::bind`
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
        }
    }
}

/// What the registry does when an identity that is already online registers again
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
    /// The new connection replaces the old one; the old one is closed.
    #[default]
    Supersede,
    /// The new registration is refused and the old connection keeps the identity.
    Reject,
}

impl std::str::FromStr for DuplicatePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "supersede" => Ok(Self::Supersede),
            "reject" => Ok(Self::Reject),
            other => Err(format!("unknown duplicate policy '{}'", other)),
        }
    }
}

/// Identity registry settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Entity id of the registry itself; envelopes addressed here are dispatched locally.
    pub local_entity_id: String,
    /// Reserved recipient alias that also resolves to the local entity.
    pub self_alias: String,
    pub max_entities: usize,
    pub duplicate_policy: DuplicatePolicy,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            local_entity_id: "registry".to_string(),
            self_alias: "self".to_string(),
            max_entities: 1024,
            duplicate_policy: DuplicatePolicy::Supersede,
        }
    }
}

/// Per-connection lifecycle deadlines (milliseconds)
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LivenessConfig {
    /// Bound on the transport handshake (`Connecting` state).
    pub handshake_timeout_ms: u64,
    /// Time an open connection has to send its registration frame.
    pub registration_grace_ms: u64,
    /// Ping cadence once registered.
    pub heartbeat_interval_ms: u64,
    /// Silence after which a registered connection is failed.
    pub liveness_timeout_ms: u64,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_ms: 5_000,
            registration_grace_ms: 5_000,
            heartbeat_interval_ms: 10_000,
            liveness_timeout_ms: 30_000,
        }
    }
}

/// Policies applied by the supervising layer around the router
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Send an `error` envelope back to the sender when a route is undeliverable.
    pub notify_undeliverable: bool,
    /// Drop envelopes whose `sender` is not the connection's registered entity.
    pub enforce_sender_identity: bool,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            notify_undeliverable: false,
            enforce_sender_identity: true,
        }
    }
}

/// Log output encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// trace, debug, info, warn or error
    pub level: String,
    pub format: LogFormat,
    /// Directory for rolling log files; `None` logs to the console only.
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
            log_dir: None,
        }
    }
}

/// Settings used by agent clients connecting to a registry
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AgentConfig {
    pub entity_id: String,
    pub registry_url: String,
    pub capabilities: Vec<String>,
    pub connect_timeout_ms: u64,
    pub ping_interval_ms: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            entity_id: String::new(),
            registry_url: "ws://127.0.0.1:8000".to_string(),
            capabilities: Vec::new(),
            connect_timeout_ms: 5_000,
            ping_interval_ms: 10_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_policy_from_str() {
        assert_eq!("supersede".parse::<DuplicatePolicy>(), Ok(DuplicatePolicy::Supersede));
        assert_eq!(" Reject ".parse::<DuplicatePolicy>(), Ok(DuplicatePolicy::Reject));
        assert!("ignore".parse::<DuplicatePolicy>().is_err());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: RegenNexusConfig = toml::from_str(
            r#"
            [registry]
            duplicate_policy = "reject"

            [liveness]
            heartbeat_interval_ms = 2500
            "#,
        )
        .unwrap();

        assert_eq!(config.registry.duplicate_policy, DuplicatePolicy::Reject);
        assert_eq!(config.registry.local_entity_id, "registry");
        assert_eq!(config.liveness.heartbeat_interval_ms, 2500);
        assert_eq!(config.liveness.liveness_timeout_ms, 30_000);
        assert_eq!(config.server.bind_address(), "127.0.0.1:8000");
    }
}
