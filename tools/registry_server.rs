// Copyright 2025 RegenNexus Contributors
// SPDX-License-Identifier: Apache-2.0

/*!
RegenNexus Registry Server

Accepts agent WebSocket connections, registers them by entity id and routes
envelopes between them until interrupted.

Usage:
  cargo run --bin regennexus-registry-server -- [--config <path>] [--host <host>] [--port <port>]

Per-crate debug logging:
  cargo run --bin regennexus-registry-server -- --debug-regennexus-router
*/

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use regennexus_config::{load_config, validate_config, ConfigError, RegenNexusConfig};
use regennexus_observability::{debug_flags_help, init_logging, CrateDebugFlags};
use regennexus_router::RegistryServer;
use tracing::{info, warn};

/// RegenNexus registry - routes intents between connected agents
#[derive(Parser, Debug)]
#[command(name = "regennexus-registry-server", version, long_about = None, after_help = debug_flags_help())]
struct Args {
    /// Path to regennexus_configuration.toml (searched for when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Host to bind (overrides server.host)
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (overrides server.port)
    #[arg(short, long)]
    port: Option<u16>,

    /// Log level: trace, debug, info, warn, error (overrides logging.level)
    #[arg(long)]
    log_level: Option<String>,

    /// Send an error envelope back when a recipient is unknown
    #[arg(long, default_value_t = false)]
    notify_undeliverable: bool,
}

impl Args {
    fn overrides(&self) -> HashMap<String, String> {
        let mut cli = HashMap::new();
        if let Some(host) = &self.host {
            cli.insert("server.host".to_string(), host.clone());
        }
        if let Some(port) = self.port {
            cli.insert("server.port".to_string(), port.to_string());
        }
        if let Some(level) = &self.log_level {
            cli.insert("logging.level".to_string(), level.clone());
        }
        if self.notify_undeliverable {
            cli.insert("routing.notify_undeliverable".to_string(), "true".to_string());
        }
        cli
    }
}

/// `--debug-*` flags are consumed here so clap never sees them
fn split_debug_args(args: impl IntoIterator<Item = String>) -> (Vec<String>, CrateDebugFlags) {
    let (debug, rest): (Vec<String>, Vec<String>) = args.into_iter().partition(|arg| arg.starts_with("--debug-"));
    let mut flags = CrateDebugFlags::from_args(debug);
    if let Ok(value) = std::env::var("REGENNEXUS_DEBUG") {
        flags.merge_env_value(&value);
    }
    (rest, flags)
}

fn resolve_config(args: &Args) -> Result<RegenNexusConfig> {
    let overrides = args.overrides();
    let config = match load_config(args.config.as_deref(), Some(&overrides)) {
        Ok(config) => config,
        // Only a missing, unrequested file falls back to defaults
        Err(ConfigError::FileNotFound(searched)) if args.config.is_none() => {
            eprintln!("No configuration file found, using defaults ({})", searched.lines().next().unwrap_or(""));
            let mut config = RegenNexusConfig::default();
            regennexus_config::apply_environment_overrides(&mut config);
            regennexus_config::apply_cli_overrides(&mut config, &overrides);
            config
        }
        Err(e) => return Err(e).context("Failed to load configuration"),
    };
    validate_config(&config).context("Invalid configuration")?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let (argv, debug_flags) = split_debug_args(std::env::args());
    let args = Args::parse_from(argv);

    let config = resolve_config(&args)?;
    let _logging = init_logging(&debug_flags, &config.logging)?;

    info!("RegenNexus registry v{}", env!("CARGO_PKG_VERSION"));
    let server = RegistryServer::bind(&config)
        .await
        .with_context(|| format!("Failed to start registry on {}", config.server.bind_address()))?;
    info!("Registry ready at {}", server.url());

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
    }

    info!("Shutting down registry ({} entities connected)", server.registry().len());
    server.shutdown().await;
    info!("Registry stopped");
    Ok(())
}
