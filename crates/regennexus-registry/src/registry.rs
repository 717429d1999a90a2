//! Identity registry implementation

use parking_lot::RwLock;
use regennexus_config::RegistryConfig;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::{
    ConnectionId, ConnectionRef, DuplicatePolicy, EntityId, EntitySummary, RegistryEntry, RegistryError,
    Result,
};

struct RegistryState<H> {
    /// entity_id -> entry
    entries: HashMap<EntityId, RegistryEntry<H>>,
    /// connection_id -> entity_id it currently owns
    owners: HashMap<ConnectionId, EntityId>,
}

/// Maps entity ids to live connection handles
///
/// Both maps sit behind one lock so that an entry and its ownership record
/// always change together. No I/O happens while the lock is held; handles
/// displaced by a new registration are returned to the caller to close.
pub struct IdentityRegistry<H> {
    state: RwLock<RegistryState<H>>,
    max_entities: usize,
    duplicate_policy: DuplicatePolicy,
}

impl<H: ConnectionRef + Clone> IdentityRegistry<H> {
    /// Create a new identity registry
    ///
    /// # Arguments
    /// * `max_entities` - Maximum number of concurrently registered entities
    /// * `duplicate_policy` - What to do when an id is registered twice
    pub fn new(max_entities: usize, duplicate_policy: DuplicatePolicy) -> Self {
        info!(
            "Initializing identity registry (max_entities={}, duplicate_policy={:?})",
            max_entities, duplicate_policy
        );
        Self {
            state: RwLock::new(RegistryState {
                entries: HashMap::new(),
                owners: HashMap::new(),
            }),
            max_entities,
            duplicate_policy,
        }
    }

    pub fn from_config(config: &RegistryConfig) -> Self {
        Self::new(config.max_entities, config.duplicate_policy)
    }

    pub fn duplicate_policy(&self) -> DuplicatePolicy {
        self.duplicate_policy
    }

    /// Bind `entity_id` to `handle`
    ///
    /// Returns the handle this registration displaced, if any. Re-registering
    /// from the connection that already owns the id displaces nothing.
    pub fn register(&self, entity_id: EntityId, handle: H) -> Result<Option<H>> {
        self.register_with_capabilities(entity_id, handle, Vec::new())
    }

    /// Like [`register`](Self::register), recording the capabilities the agent advertised
    pub fn register_with_capabilities(
        &self,
        entity_id: EntityId,
        handle: H,
        capabilities: Vec<String>,
    ) -> Result<Option<H>> {
        let connection_id = handle.connection_id();
        let mut state = self.state.write();

        let previous_owner = state.entries.get(&entity_id).map(|e| e.handle.connection_id());
        match previous_owner {
            Some(owner) if owner != connection_id && self.duplicate_policy == DuplicatePolicy::Reject => {
                warn!("Entity already registered: {}", entity_id);
                return Err(RegistryError::AlreadyRegistered(entity_id));
            }
            None if state.entries.len() >= self.max_entities => {
                warn!(
                    "Identity registry full ({}/{}), rejecting {}",
                    state.entries.len(),
                    self.max_entities,
                    entity_id
                );
                return Err(RegistryError::CapacityReached {
                    max: self.max_entities,
                });
            }
            _ => {}
        }

        // A connection owns at most one identity
        if let Some(stale) = state.owners.get(&connection_id).cloned() {
            if stale != entity_id {
                state.entries.remove(&stale);
                debug!("Connection {} switched identity {} -> {}", connection_id, stale, entity_id);
            }
        }

        let entry = RegistryEntry::new(entity_id.clone(), handle, capabilities);
        let displaced = state.entries.insert(entity_id.clone(), entry).and_then(|old| {
            let old_connection = old.handle.connection_id();
            if old_connection == connection_id {
                None
            } else {
                state.owners.remove(&old_connection);
                Some(old.handle)
            }
        });
        state.owners.insert(connection_id, entity_id.clone());

        if displaced.is_some() {
            info!(
                "Entity re-registered, superseding previous connection: {} (total entities: {})",
                entity_id,
                state.entries.len()
            );
        } else {
            info!(
                "Entity registered: {} on {} (total entities: {})",
                entity_id,
                connection_id,
                state.entries.len()
            );
        }
        Ok(displaced)
    }

    /// Look up the handle for `entity_id`
    pub fn resolve(&self, entity_id: &str) -> Option<H> {
        self.state.read().entries.get(entity_id).map(|e| e.handle.clone())
    }

    pub fn contains(&self, entity_id: &str) -> bool {
        self.state.read().entries.contains_key(entity_id)
    }

    /// Remove `entity_id` regardless of which connection owns it
    pub fn remove(&self, entity_id: &str) -> Option<RegistryEntry<H>> {
        let mut state = self.state.write();
        let entry = state.entries.remove(entity_id)?;
        state.owners.remove(&entry.handle.connection_id());
        info!("Entity removed: {} (total entities: {})", entity_id, state.entries.len());
        Some(entry)
    }

    /// Drop whatever entry `connection_id` still owns
    ///
    /// A connection that has been superseded no longer owns its former id, so
    /// its cleanup leaves the successor's entry alone.
    pub fn remove_connection(&self, connection_id: ConnectionId) -> Option<EntityId> {
        let mut state = self.state.write();
        let entity_id = state.owners.remove(&connection_id)?;

        let owned = state
            .entries
            .get(&entity_id)
            .is_some_and(|e| e.handle.connection_id() == connection_id);
        if !owned {
            return None;
        }
        state.entries.remove(&entity_id);
        info!(
            "Entity deregistered: {} (connection {} closed, total entities: {})",
            entity_id,
            connection_id,
            state.entries.len()
        );
        Some(entity_id)
    }

    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().entries.is_empty()
    }

    /// Snapshot of all registrations, ordered by entity id
    pub fn entities(&self) -> Vec<EntitySummary> {
        let state = self.state.read();
        let mut summaries: Vec<EntitySummary> = state.entries.values().map(RegistryEntry::summary).collect();
        summaries.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
        summaries
    }

    /// Snapshot of every registered handle, taken under a single read lock
    pub fn handles(&self) -> Vec<(EntityId, H)> {
        let state = self.state.read();
        state
            .entries
            .values()
            .map(|e| (e.entity_id.clone(), e.handle.clone()))
            .collect()
    }

    /// Entities that advertised `capability` at registration, ordered by id
    pub fn find_by_capability(&self, capability: &str) -> Vec<EntityId> {
        let state = self.state.read();
        let mut found: Vec<EntityId> = state
            .entries
            .values()
            .filter(|e| e.has_capability(capability))
            .map(|e| e.entity_id.clone())
            .collect();
        found.sort();
        found
    }
}
