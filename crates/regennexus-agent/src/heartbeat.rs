// Copyright 2025 RegenNexus Contributors
// SPDX-License-Identifier: Apache-2.0

//! Heartbeat service for maintaining agent liveness

use regennexus_protocol::EntityId;
use regennexus_router::SharedConnection;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::{AgentError, Result};

/// Sends a transport ping every `interval` until stopped or the connection closes
pub struct HeartbeatService {
    entity_id: EntityId,
    connection: SharedConnection,
    interval: Duration,
    cancel: Option<CancellationToken>,
    task: Option<JoinHandle<()>>,
}

impl HeartbeatService {
    /// Create a new heartbeat service
    ///
    /// # Arguments
    /// * `entity_id` - Agent identity, for logging
    /// * `connection` - Connection whose writer emits the pings
    /// * `interval` - Time between pings
    pub fn new(entity_id: EntityId, connection: SharedConnection, interval: Duration) -> Self {
        Self {
            entity_id,
            connection,
            interval,
            cancel: None,
            task: None,
        }
    }

    /// Start pinging; stops by itself when `parent` is cancelled
    pub fn start(&mut self, parent: &CancellationToken) -> Result<()> {
        if self.is_running() {
            return Err(AgentError::Other("Heartbeat service already running".to_string()));
        }
        if self.interval.is_zero() {
            return Err(AgentError::InvalidConfig("heartbeat interval must be > 0".to_string()));
        }

        let cancel = parent.child_token();
        let entity_id = self.entity_id.clone();
        let connection = self.connection.clone();
        let interval = self.interval;
        let stop = cancel.clone();

        let task = tokio::spawn(async move {
            debug!("[HEARTBEAT] Service started for agent: {}", entity_id);
            loop {
                // Sleep first to avoid an immediate ping right after registration
                tokio::select! {
                    biased;
                    _ = stop.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                if let Err(e) = connection.ping() {
                    warn!("[HEARTBEAT] Failed to send ping for {}: {}", entity_id, e);
                    break;
                }
                trace!("[HEARTBEAT] Ping sent for {}", entity_id);
            }
            debug!("[HEARTBEAT] Service stopped for agent: {}", entity_id);
        });

        self.cancel = Some(cancel);
        self.task = Some(task);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stop the service and wait for its task to exit
    pub async fn stop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(
                    "[HEARTBEAT] Task join failed for agent {} (task may have panicked): {}",
                    self.entity_id, e
                );
            }
        }
    }
}
