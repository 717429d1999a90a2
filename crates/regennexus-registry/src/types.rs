//! Registry records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ConnectionId, ConnectionRef, EntityId};

/// A live registration
#[derive(Debug, Clone)]
pub struct RegistryEntry<H> {
    pub entity_id: EntityId,
    pub handle: H,
    pub registered_at: DateTime<Utc>,
    pub capabilities: Vec<String>,
}

impl<H: ConnectionRef> RegistryEntry<H> {
    pub fn new(entity_id: EntityId, handle: H, capabilities: Vec<String>) -> Self {
        Self {
            entity_id,
            handle,
            registered_at: Utc::now(),
            capabilities,
        }
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }

    pub fn summary(&self) -> EntitySummary {
        EntitySummary {
            entity_id: self.entity_id.clone(),
            connection_id: self.handle.connection_id(),
            registered_at: self.registered_at,
            capabilities: self.capabilities.clone(),
        }
    }
}

/// Handle-free view of an entry, safe to serialize and hand to agents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySummary {
    pub entity_id: EntityId,
    pub connection_id: ConnectionId,
    pub registered_at: DateTime<Utc>,
    #[serde(default)]
    pub capabilities: Vec<String>,
}
