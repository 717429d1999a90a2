//! Configuration validation
//!
//! Ensures configuration values are within valid ranges and consistent with
//! each other before any server or agent is started from them.

use crate::{ConfigError, ConfigResult, RegenNexusConfig};

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Validation errors that can occur during config validation
#[derive(Debug, Clone)]
pub enum ConfigValidationError {
    InvalidPortRange { port_name: String, port: u16 },
    MissingRequired { field: String },
    InvalidValue { field: String, reason: String },
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidPortRange { port_name, port } => {
                write!(
                    f,
                    "Port {} = {} is outside valid range (1024-65535)",
                    port_name, port
                )
            }
            Self::MissingRequired { field } => {
                write!(f, "Missing required configuration: {}", field)
            }
            Self::InvalidValue { field, reason } => {
                write!(f, "Invalid configuration value for {}: {}", field, reason)
            }
        }
    }
}

/// Validate the complete configuration
///
/// Checks for:
/// - Port range (1024-65535)
/// - Required identifiers (local entity id, self alias)
/// - Non-zero, mutually consistent liveness deadlines
/// - Known log level
///
/// # Errors
///
/// Returns `ConfigError::ValidationError` listing every violation found
pub fn validate_config(config: &RegenNexusConfig) -> ConfigResult<()> {
    let mut errors = Vec::new();

    validate_server(config, &mut errors);
    validate_registry(config, &mut errors);
    validate_liveness(config, &mut errors);
    validate_logging(config, &mut errors);
    validate_agent(config, &mut errors);

    if !errors.is_empty() {
        let error_messages = errors
            .iter()
            .map(|e| format!("  - {}", e))
            .collect::<Vec<_>>()
            .join("\n");

        return Err(ConfigError::ValidationError(format!(
            "Configuration validation failed:\n{}",
            error_messages
        )));
    }

    Ok(())
}

fn validate_server(config: &RegenNexusConfig, errors: &mut Vec<ConfigValidationError>) {
    if config.server.port < 1024 {
        errors.push(ConfigValidationError::InvalidPortRange {
            port_name: "server.port".to_string(),
            port: config.server.port,
        });
    }
    if config.server.host.trim().is_empty() {
        errors.push(ConfigValidationError::MissingRequired {
            field: "server.host".to_string(),
        });
    }
}

fn validate_registry(config: &RegenNexusConfig, errors: &mut Vec<ConfigValidationError>) {
    let registry = &config.registry;
    if registry.local_entity_id.is_empty() {
        errors.push(ConfigValidationError::MissingRequired {
            field: "registry.local_entity_id".to_string(),
        });
    }
    if registry.self_alias.is_empty() {
        errors.push(ConfigValidationError::MissingRequired {
            field: "registry.self_alias".to_string(),
        });
    }
    if registry.max_entities == 0 {
        errors.push(ConfigValidationError::InvalidValue {
            field: "registry.max_entities".to_string(),
            reason: "must be greater than 0".to_string(),
        });
    }
}

fn validate_liveness(config: &RegenNexusConfig, errors: &mut Vec<ConfigValidationError>) {
    let liveness = &config.liveness;
    for (field, value) in [
        ("liveness.handshake_timeout_ms", liveness.handshake_timeout_ms),
        ("liveness.registration_grace_ms", liveness.registration_grace_ms),
        ("liveness.heartbeat_interval_ms", liveness.heartbeat_interval_ms),
        ("liveness.liveness_timeout_ms", liveness.liveness_timeout_ms),
    ] {
        if value == 0 {
            errors.push(ConfigValidationError::InvalidValue {
                field: field.to_string(),
                reason: "must be greater than 0".to_string(),
            });
        }
    }

    // A timeout shorter than the ping cadence would fail every quiet connection.
    if liveness.liveness_timeout_ms <= liveness.heartbeat_interval_ms {
        errors.push(ConfigValidationError::InvalidValue {
            field: "liveness.liveness_timeout_ms".to_string(),
            reason: format!(
                "must exceed liveness.heartbeat_interval_ms ({})",
                liveness.heartbeat_interval_ms
            ),
        });
    }
}

fn validate_logging(config: &RegenNexusConfig, errors: &mut Vec<ConfigValidationError>) {
    let level = config.logging.level.to_lowercase();
    if !LOG_LEVELS.contains(&level.as_str()) {
        errors.push(ConfigValidationError::InvalidValue {
            field: "logging.level".to_string(),
            reason: format!("'{}' is not one of {}", config.logging.level, LOG_LEVELS.join(", ")),
        });
    }
}

fn validate_agent(config: &RegenNexusConfig, errors: &mut Vec<ConfigValidationError>) {
    let agent = &config.agent;
    if !(agent.registry_url.starts_with("ws://") || agent.registry_url.starts_with("wss://")) {
        errors.push(ConfigValidationError::InvalidValue {
            field: "agent.registry_url".to_string(),
            reason: "must be a ws:// or wss:// URL".to_string(),
        });
    }
    if agent.connect_timeout_ms == 0 || agent.ping_interval_ms == 0 {
        errors.push(ConfigValidationError::InvalidValue {
            field: "agent".to_string(),
            reason: "connect_timeout_ms and ping_interval_ms must be greater than 0".to_string(),
        });
    }
}
