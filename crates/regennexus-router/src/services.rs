//! Built-in handlers answered by the registry itself
//!
//! * `ping` -> `pong`, echoing the payload
//! * `discover` -> `discover_result` with `{"entities": [...]}`, optionally
//!   filtered by `payload.capability`

use regennexus_protocol::{intents, Codec, EntityId, Envelope};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::connection::ConnectionRegistry;
use crate::router::Router;

/// Replies to agents through the registry, never through the router
#[derive(Clone)]
pub struct RegistryServices {
    local_entity: EntityId,
    registry: Arc<ConnectionRegistry>,
    codec: Arc<dyn Codec>,
}

impl RegistryServices {
    pub fn new(router: &Router) -> Self {
        Self {
            local_entity: router.local_entity().clone(),
            registry: Arc::clone(router.registry()),
            codec: Arc::clone(router.codec()),
        }
    }

    /// Register the built-in handlers on the router's dispatch table
    pub fn install(router: &Router) {
        let services = Self::new(router);
        let dispatch = router.dispatch();

        let ping = services.clone();
        dispatch.register_handler(intents::PING, move |envelope: Envelope| {
            let services = ping.clone();
            async move { services.pong(envelope) }
        });

        let discover = services;
        dispatch.register_handler(intents::DISCOVER, move |envelope: Envelope| {
            let services = discover.clone();
            async move { services.discover(envelope) }
        });
    }

    fn pong(&self, request: Envelope) {
        let payload = request.payload().clone();
        self.respond(&request, intents::PONG, payload);
    }

    fn discover(&self, request: Envelope) {
        let capability = request.payload().get("capability").and_then(Value::as_str);

        let entities = match capability {
            Some(capability) => {
                let matching = self.registry.find_by_capability(capability);
                self.registry
                    .entities()
                    .into_iter()
                    .filter(|summary| matching.contains(&summary.entity_id))
                    .collect::<Vec<_>>()
            }
            None => self.registry.entities(),
        };

        match serde_json::to_value(&entities) {
            Ok(list) => self.respond(&request, intents::DISCOVER_RESULT, json!({ "entities": list })),
            Err(e) => warn!("[SERVICES] Failed to serialize entity list: {}", e),
        }
    }

    fn respond(&self, request: &Envelope, intent: &str, payload: Value) {
        let reply = match request.reply(intent, payload) {
            Ok(reply) => reply.with_sender(self.local_entity.clone()),
            Err(e) => {
                warn!("[SERVICES] Cannot build '{}' reply: {}", intent, e);
                return;
            }
        };

        let Some(handle) = self.registry.resolve(request.sender().as_str()) else {
            debug!("[SERVICES] {} left before '{}' reply", request.sender(), intent);
            return;
        };
        if let Err(e) = handle.send(self.codec.encode(&reply)) {
            debug!("[SERVICES] '{}' reply to {} not sent: {}", intent, request.sender(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ChannelConnection, OutboundFrame};
    use crate::dispatch::HandlerDispatch;
    use crate::router::RouteOutcome;
    use regennexus_config::RegistryConfig;
    use regennexus_protocol::JsonCodec;

    fn router() -> Router {
        let router = Router::from_config(
            &RegistryConfig::default(),
            Arc::new(HandlerDispatch::new()),
            Arc::new(JsonCodec::new()),
        )
        .unwrap();
        RegistryServices::install(&router);
        router
    }

    fn request(intent: &str, payload: Value) -> Envelope {
        Envelope::new(EntityId::new("A").unwrap(), EntityId::new("self").unwrap(), intent, payload)
            .unwrap()
            .with_id("42")
    }

    async fn reply(router: &Router, rx: &mut tokio::sync::mpsc::UnboundedReceiver<OutboundFrame>) -> Envelope {
        router.dispatch().shutdown().await;
        match rx.try_recv().unwrap() {
            OutboundFrame::Data(bytes) => router.codec().decode(&bytes).unwrap(),
            other => panic!("unexpected frame {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_ping_pong() {
        let router = router();
        let (a, mut rx) = ChannelConnection::shared();
        router.registry().register(EntityId::new("A").unwrap(), a).unwrap();

        let outcome = router.route(request("ping", json!({"seq": 7})));
        assert!(matches!(outcome, RouteOutcome::LocalDispatch(_)));

        let pong = reply(&router, &mut rx).await;
        assert_eq!(pong.intent(), "pong");
        assert_eq!(pong.sender(), &EntityId::new("registry").unwrap());
        assert_eq!(pong.id(), Some("response-42"));
        assert_eq!(pong.payload(), &json!({"seq": 7}));
    }

    #[tokio::test]
    async fn test_discover_filters_by_capability() {
        let router = router();
        let (a, mut rx) = ChannelConnection::shared();
        let (cam, _cam_rx) = ChannelConnection::shared();
        router
            .registry()
            .register_with_capabilities(EntityId::new("A").unwrap(), a, vec![])
            .unwrap();
        router
            .registry()
            .register_with_capabilities(EntityId::new("cam").unwrap(), cam, vec!["vision".into()])
            .unwrap();

        router.route(request("discover", json!({"capability": "vision"})));

        let result = reply(&router, &mut rx).await;
        assert_eq!(result.intent(), "discover_result");
        let entities = result.payload()["entities"].as_array().unwrap();
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0]["entity_id"], "cam");
    }
}
