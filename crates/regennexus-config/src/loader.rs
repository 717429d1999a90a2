// Copyright 2025 RegenNexus Contributors
// SPDX-License-Identifier: Apache-2.0

//! Configuration file loading with override support
//!
//! This module implements the 3-tier configuration loading system:
//! 1. TOML file (base defaults)
//! 2. Environment variables (runtime overrides)
//! 3. CLI arguments (explicit user overrides)

use crate::{ConfigError, ConfigResult, RegenNexusConfig};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_FILE_NAME: &str = "regennexus_configuration.toml";

/// Find the RegenNexus configuration file
///
/// Search order:
/// 1. `REGENNEXUS_CONFIG_PATH` environment variable
/// 2. Current working directory
/// 3. Up to 5 parent directories
///
/// # Errors
///
/// Returns `ConfigError::FileNotFound` if no config file is found in any location
pub fn find_config_file() -> ConfigResult<PathBuf> {
    if let Ok(env_path) = env::var("REGENNEXUS_CONFIG_PATH") {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        }
        return Err(ConfigError::FileNotFound(format!(
            "Config file specified by REGENNEXUS_CONFIG_PATH not found: {}",
            path.display()
        )));
    }

    let mut search_paths = Vec::new();
    if let Ok(cwd) = env::current_dir() {
        search_paths.push(cwd.join(CONFIG_FILE_NAME));
        let mut current = cwd.as_path();
        for _ in 0..5 {
            match current.parent() {
                Some(parent) => {
                    search_paths.push(parent.join(CONFIG_FILE_NAME));
                    current = parent;
                }
                None => break,
            }
        }
    }

    if let Some(found) = search_paths.iter().find(|p| p.exists()) {
        return Ok(found.clone());
    }

    let search_list = search_paths
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    Err(ConfigError::FileNotFound(format!(
        "'{}' not found in any of these locations:\n{}\n\nSet REGENNEXUS_CONFIG_PATH to specify a custom location.",
        CONFIG_FILE_NAME, search_list
    )))
}

/// Load configuration from a TOML file
///
/// # Arguments
///
/// * `config_path` - Optional path to config file. If `None`, will search for config file.
/// * `cli_args` - Optional CLI argument overrides (see [`apply_cli_overrides`])
///
/// # Errors
///
/// Returns error if the config file is not found or contains invalid TOML.
/// Validation is a separate step ([`crate::validate_config`]).
pub fn load_config(
    config_path: Option<&Path>,
    cli_args: Option<&HashMap<String, String>>,
) -> ConfigResult<RegenNexusConfig> {
    let config_file = match config_path {
        Some(path) => path.to_path_buf(),
        None => find_config_file()?,
    };

    let content = fs::read_to_string(&config_file)?;
    let mut config: RegenNexusConfig = toml::from_str(&content)?;

    apply_environment_overrides(&mut config);
    if let Some(cli) = cli_args {
        apply_cli_overrides(&mut config, cli);
    }

    Ok(config)
}

/// Apply environment variable overrides to configuration
///
/// Supported environment variables:
/// - `REGENNEXUS_SERVER_HOST` -> `server.host`
/// - `REGENNEXUS_SERVER_PORT` -> `server.port`
/// - `REGENNEXUS_LOCAL_ENTITY_ID` -> `registry.local_entity_id`
/// - `REGENNEXUS_MAX_ENTITIES` -> `registry.max_entities`
/// - `REGENNEXUS_DUPLICATE_POLICY` -> `registry.duplicate_policy`
/// - `REGENNEXUS_HEARTBEAT_INTERVAL_MS` -> `liveness.heartbeat_interval_ms`
/// - `REGENNEXUS_LIVENESS_TIMEOUT_MS` -> `liveness.liveness_timeout_ms`
/// - `REGENNEXUS_LOG_LEVEL` -> `logging.level`
/// - `REGENNEXUS_AGENT_REGISTRY_URL` -> `agent.registry_url`
/// - `REGENNEXUS_AGENT_ENTITY_ID` -> `agent.entity_id`
///
/// Values that fail to parse are ignored and the file value is kept.
pub fn apply_environment_overrides(config: &mut RegenNexusConfig) {
    let vars: HashMap<String, String> = [
        ("REGENNEXUS_SERVER_HOST", "server.host"),
        ("REGENNEXUS_SERVER_PORT", "server.port"),
        ("REGENNEXUS_LOCAL_ENTITY_ID", "registry.local_entity_id"),
        ("REGENNEXUS_MAX_ENTITIES", "registry.max_entities"),
        ("REGENNEXUS_DUPLICATE_POLICY", "registry.duplicate_policy"),
        ("REGENNEXUS_HEARTBEAT_INTERVAL_MS", "liveness.heartbeat_interval_ms"),
        ("REGENNEXUS_LIVENESS_TIMEOUT_MS", "liveness.liveness_timeout_ms"),
        ("REGENNEXUS_LOG_LEVEL", "logging.level"),
        ("REGENNEXUS_AGENT_REGISTRY_URL", "agent.registry_url"),
        ("REGENNEXUS_AGENT_ENTITY_ID", "agent.entity_id"),
    ]
    .into_iter()
    .filter_map(|(var, key)| env::var(var).ok().map(|value| (key.to_string(), value)))
    .collect();

    apply_cli_overrides(config, &vars);
}

/// Apply CLI argument overrides to configuration
///
/// Keys use the dotted TOML path of the field, e.g.
/// `{"server.port": "9000", "registry.duplicate_policy": "reject"}`.
/// Unknown keys and unparsable values are ignored.
pub fn apply_cli_overrides(config: &mut RegenNexusConfig, cli_args: &HashMap<String, String>) {
    for (key, value) in cli_args {
        match key.as_str() {
            "server.host" => config.server.host = value.clone(),
            "server.port" => set_parsed(&mut config.server.port, value),
            "registry.local_entity_id" => config.registry.local_entity_id = value.clone(),
            "registry.self_alias" => config.registry.self_alias = value.clone(),
            "registry.max_entities" => set_parsed(&mut config.registry.max_entities, value),
            "registry.duplicate_policy" => set_parsed(&mut config.registry.duplicate_policy, value),
            "liveness.handshake_timeout_ms" => {
                set_parsed(&mut config.liveness.handshake_timeout_ms, value)
            }
            "liveness.registration_grace_ms" => {
                set_parsed(&mut config.liveness.registration_grace_ms, value)
            }
            "liveness.heartbeat_interval_ms" => {
                set_parsed(&mut config.liveness.heartbeat_interval_ms, value)
            }
            "liveness.liveness_timeout_ms" => {
                set_parsed(&mut config.liveness.liveness_timeout_ms, value)
            }
            "routing.notify_undeliverable" => {
                config.routing.notify_undeliverable = parse_flag(value)
            }
            "routing.enforce_sender_identity" => {
                config.routing.enforce_sender_identity = parse_flag(value)
            }
            "logging.level" => config.logging.level = value.clone(),
            "logging.log_dir" => config.logging.log_dir = Some(PathBuf::from(value)),
            "agent.entity_id" => config.agent.entity_id = value.clone(),
            "agent.registry_url" => config.agent.registry_url = value.clone(),
            "agent.ping_interval_ms" => set_parsed(&mut config.agent.ping_interval_ms, value),
            _ => {}
        }
    }
}

fn set_parsed<T: std::str::FromStr>(target: &mut T, value: &str) {
    if let Ok(parsed) = value.trim().parse::<T>() {
        *target = parsed;
    }
}

fn parse_flag(value: &str) -> bool {
    let value = value.to_lowercase();
    value == "true" || value == "1" || value == "yes"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DuplicatePolicy;
    use std::fs::File;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::tempdir;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_find_config_file_env_var() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("custom_config.toml");
        File::create(&config_path).unwrap();

        env::set_var("REGENNEXUS_CONFIG_PATH", config_path.to_str().unwrap());
        let result = find_config_file();
        env::remove_var("REGENNEXUS_CONFIG_PATH");

        assert_eq!(result.unwrap(), config_path);
    }

    #[test]
    fn test_find_config_file_env_var_missing_file() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        env::set_var("REGENNEXUS_CONFIG_PATH", "/definitely/not/here.toml");
        let result = find_config_file();
        env::remove_var("REGENNEXUS_CONFIG_PATH");

        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_load_config_with_overrides() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        let saved_port = env::var("REGENNEXUS_SERVER_PORT").ok();
        env::set_var("REGENNEXUS_SERVER_PORT", "9100");

        let dir = tempdir().unwrap();
        let config_path = dir.path().join(CONFIG_FILE_NAME);
        let mut file = File::create(&config_path).unwrap();
        writeln!(file, "[server]").unwrap();
        writeln!(file, "host = \"0.0.0.0\"").unwrap();
        writeln!(file, "port = 9000").unwrap();
        writeln!(file, "[registry]").unwrap();
        writeln!(file, "max_entities = 16").unwrap();

        let mut cli = HashMap::new();
        cli.insert("registry.duplicate_policy".to_string(), "reject".to_string());
        cli.insert("registry.max_entities".to_string(), "not-a-number".to_string());

        let config = load_config(Some(&config_path), Some(&cli));

        match saved_port {
            Some(port) => env::set_var("REGENNEXUS_SERVER_PORT", port),
            None => env::remove_var("REGENNEXUS_SERVER_PORT"),
        }

        let config = config.unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.registry.max_entities, 16);
        assert_eq!(config.registry.duplicate_policy, DuplicatePolicy::Reject);
    }

    #[test]
    fn test_load_config_invalid_toml() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join(CONFIG_FILE_NAME);
        let mut file = File::create(&config_path).unwrap();
        writeln!(file, "[server").unwrap();

        let result = load_config(Some(&config_path), None);
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_cli_flag_parsing() {
        let mut config = RegenNexusConfig::default();
        let mut cli = HashMap::new();
        cli.insert("routing.notify_undeliverable".to_string(), "YES".to_string());
        cli.insert("routing.enforce_sender_identity".to_string(), "0".to_string());
        cli.insert("logging.log_dir".to_string(), "/tmp/regennexus-logs".to_string());

        apply_cli_overrides(&mut config, &cli);

        assert!(config.routing.notify_undeliverable);
        assert!(!config.routing.enforce_sender_identity);
        assert_eq!(config.logging.log_dir, Some(PathBuf::from("/tmp/regennexus-logs")));
    }
}
