//! Envelope routing

use regennexus_config::RegistryConfig;
use regennexus_protocol::{Codec, EntityId, Envelope, ProtocolError, BROADCAST_RECIPIENT};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::connection::ConnectionRegistry;
use crate::dispatch::{DispatchOutcome, HandlerDispatch};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UndeliverableReason {
    /// Recipient is not registered
    UnknownRecipient,
    /// Recipient was registered but its connection refused the frame
    PeerGone,
}

impl UndeliverableReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            UndeliverableReason::UnknownRecipient => "unknown recipient",
            UndeliverableReason::PeerGone => "peer gone",
        }
    }
}

impl fmt::Display for UndeliverableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Queued on the recipient's connection
    Delivered,
    Undeliverable(UndeliverableReason),
    /// Addressed to the local entity and handed to dispatch
    LocalDispatch(DispatchOutcome),
    /// Addressed to `*`; `delivered` connections accepted the frame
    Broadcast { delivered: usize },
}

/// Routes envelopes to registered connections or the local handler table
///
/// The router never replies on its own; whether the sender hears about an
/// undeliverable envelope is up to the caller.
pub struct Router {
    local_entity: EntityId,
    self_alias: String,
    registry: Arc<ConnectionRegistry>,
    dispatch: Arc<HandlerDispatch>,
    codec: Arc<dyn Codec>,
}

impl Router {
    pub fn new(
        local_entity: EntityId,
        self_alias: impl Into<String>,
        registry: Arc<ConnectionRegistry>,
        dispatch: Arc<HandlerDispatch>,
        codec: Arc<dyn Codec>,
    ) -> Self {
        Self {
            local_entity,
            self_alias: self_alias.into(),
            registry,
            dispatch,
            codec,
        }
    }

    /// Build a router and a fresh registry from the `[registry]` section
    pub fn from_config(
        config: &RegistryConfig,
        dispatch: Arc<HandlerDispatch>,
        codec: Arc<dyn Codec>,
    ) -> Result<Self, ProtocolError> {
        let local_entity = EntityId::new(config.local_entity_id.as_str())?;
        let registry = Arc::new(ConnectionRegistry::from_config(config));
        Ok(Self::new(local_entity, config.self_alias.as_str(), registry, dispatch, codec))
    }

    pub fn local_entity(&self) -> &EntityId {
        &self.local_entity
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn dispatch(&self) -> &Arc<HandlerDispatch> {
        &self.dispatch
    }

    pub fn codec(&self) -> &Arc<dyn Codec> {
        &self.codec
    }

    /// `true` if `recipient` names this registry
    pub fn is_local(&self, recipient: &EntityId) -> bool {
        *recipient == self.local_entity || recipient.as_str() == self.self_alias
    }

    /// `true` if no agent may register as `entity_id`
    pub fn is_reserved(&self, entity_id: &EntityId) -> bool {
        self.is_local(entity_id) || entity_id.as_str() == BROADCAST_RECIPIENT
    }

    pub fn route(&self, envelope: Envelope) -> RouteOutcome {
        if envelope.is_broadcast() {
            return self.broadcast(&envelope);
        }
        if self.is_local(envelope.recipient()) {
            return RouteOutcome::LocalDispatch(self.dispatch.dispatch(envelope));
        }

        // resolve() clones the handle and releases the read lock before any write
        let Some(handle) = self.registry.resolve(envelope.recipient().as_str()) else {
            debug!(
                "Undeliverable '{}' from {} to {}: {}",
                envelope.intent(),
                envelope.sender(),
                envelope.recipient(),
                UndeliverableReason::UnknownRecipient
            );
            return RouteOutcome::Undeliverable(UndeliverableReason::UnknownRecipient);
        };

        let frame = self.codec.encode(&envelope);
        match handle.send(frame) {
            Ok(()) => {
                trace!(
                    "Routed '{}' {} -> {}",
                    envelope.intent(),
                    envelope.sender(),
                    envelope.recipient()
                );
                RouteOutcome::Delivered
            }
            Err(e) => {
                debug!(
                    "Undeliverable '{}' from {} to {}: {}",
                    envelope.intent(),
                    envelope.sender(),
                    envelope.recipient(),
                    e
                );
                RouteOutcome::Undeliverable(UndeliverableReason::PeerGone)
            }
        }
    }

    /// Encode once and queue on every registered connection but the sender's
    fn broadcast(&self, envelope: &Envelope) -> RouteOutcome {
        // handles() releases the read lock before any write
        let targets = self.registry.handles();
        let frame = self.codec.encode(envelope);

        let mut delivered = 0;
        for (entity_id, handle) in targets {
            if &entity_id == envelope.sender() {
                continue;
            }
            match handle.send(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => debug!("Broadcast '{}' to {} failed: {}", envelope.intent(), entity_id, e),
            }
        }
        trace!(
            "Broadcast '{}' from {} to {} entities",
            envelope.intent(),
            envelope.sender(),
            delivered
        );
        RouteOutcome::Broadcast { delivered }
    }
}
