//! WebSocket agent client
//!
//! An [`AgentClient`] owns one session with the registry: a writer task
//! draining the outbound queue, a reader task dispatching envelopes to intent
//! handlers, and a [`HeartbeatService`]. The registration frame is always the
//! first frame written on a new socket.

use futures_util::{SinkExt, Stream, StreamExt};
use parking_lot::RwLock;
use regennexus_config::AgentConfig;
use regennexus_protocol::{Clock, Codec, EntityId, Envelope, JsonCodec, RegistrationFrame};
use regennexus_router::websocket::{connection_event, write_outbound};
use regennexus_router::{
    ChannelConnection, ConnectionEvent, HandlerDispatch, IntentHandler, SharedConnection,
    TransportError,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{AgentError, Result};
use crate::heartbeat::HeartbeatService;

type Link = Arc<RwLock<Option<SharedConnection>>>;

/// How long `connect` waits for the registry to refuse a registration
const REGISTRATION_SETTLE: Duration = Duration::from_millis(200);

/// Cloneable handle for sending envelopes as this agent
///
/// Usable from inside intent handlers. Sends fail with
/// [`AgentError::NotConnected`] while no session is open.
#[derive(Clone)]
pub struct AgentSender {
    entity_id: EntityId,
    codec: Arc<JsonCodec>,
    link: Link,
}

impl AgentSender {
    pub fn entity_id(&self) -> &EntityId {
        &self.entity_id
    }

    /// Send `payload` to `recipient`; returns the generated envelope id
    pub fn send(&self, recipient: &str, intent: &str, payload: Value) -> Result<String> {
        let id = Uuid::now_v7().to_string();
        let envelope = Envelope::new(self.entity_id.clone(), EntityId::new(recipient)?, intent, payload)?
            .with_id(id.clone())
            .with_timestamp(self.codec.clock().now());
        self.send_envelope(&envelope)?;
        Ok(id)
    }

    /// Reply to `request`, correlated by its id
    pub fn reply(&self, request: &Envelope, intent: &str, payload: Value) -> Result<()> {
        let response = request.reply(intent, payload)?;
        self.send_envelope(&response)
    }

    /// Queue an already built envelope as-is
    pub fn send_envelope(&self, envelope: &Envelope) -> Result<()> {
        let connection = self.link.read().clone().ok_or(AgentError::NotConnected)?;
        connection.send(self.codec.encode(envelope))?;
        Ok(())
    }
}

struct Session {
    connection: SharedConnection,
    cancel: CancellationToken,
    tasks: TaskTracker,
    heartbeat: HeartbeatService,
}

/// An agent connected to a RegenNexus registry
pub struct AgentClient {
    config: AgentConfig,
    entity_id: EntityId,
    dispatch: Arc<HandlerDispatch>,
    sender: AgentSender,
    session: Option<Session>,
}

impl AgentClient {
    pub fn new(config: AgentConfig) -> Result<Self> {
        let entity_id = EntityId::new(config.entity_id.clone())?;
        if config.registry_url.is_empty() {
            return Err(AgentError::InvalidConfig("registry_url is empty".to_string()));
        }
        if config.ping_interval_ms == 0 {
            return Err(AgentError::InvalidConfig("ping_interval_ms must be > 0".to_string()));
        }

        let sender = AgentSender {
            entity_id: entity_id.clone(),
            codec: Arc::new(JsonCodec::new()),
            link: Arc::new(RwLock::new(None)),
        };
        Ok(Self {
            config,
            entity_id,
            dispatch: Arc::new(HandlerDispatch::new()),
            sender,
            session: None,
        })
    }

    pub fn entity_id(&self) -> &EntityId {
        &self.entity_id
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Register `handler` for envelopes with `intent`
    pub fn on<H: IntentHandler>(&self, intent: impl Into<String>, handler: H) {
        self.dispatch.register_handler(intent, handler);
    }

    pub fn sender(&self) -> AgentSender {
        self.sender.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| !s.cancel.is_cancelled() && !s.connection.is_closed())
    }

    /// Open the socket, register, and start the session tasks
    pub async fn connect(&mut self) -> Result<()> {
        if self.is_connected() {
            return Err(AgentError::AlreadyConnected);
        }
        // A session whose socket already dropped is torn down first
        self.teardown().await;

        let url = self.config.registry_url.clone();
        info!("[AGENT] Connecting {} to {}", self.entity_id, url);

        let limit = Duration::from_millis(self.config.connect_timeout_ms);
        let (socket, _) = timeout(limit, connect_async(url.as_str()))
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
        let (mut sink, stream) = socket.split();

        let registration =
            RegistrationFrame::new(self.entity_id.clone()).with_capabilities(self.config.capabilities.clone());
        sink.send(Message::Text(registration.to_value().to_string()))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;

        let (connection, outbound) = ChannelConnection::shared();
        let cancel = CancellationToken::new();
        let reader_done = CancellationToken::new();
        let tasks = TaskTracker::new();

        let peer = url.clone();
        tasks.spawn(async move { write_outbound(sink, outbound, &peer).await });
        tasks.spawn(read_loop(
            stream,
            self.entity_id.clone(),
            Arc::clone(&self.sender.codec),
            Arc::clone(&self.dispatch),
            connection.clone(),
            cancel.clone(),
            reader_done.clone(),
        ));

        let mut heartbeat = HeartbeatService::new(
            self.entity_id.clone(),
            connection.clone(),
            Duration::from_millis(self.config.ping_interval_ms),
        );
        heartbeat.start(&cancel)?;

        *self.sender.link.write() = Some(connection.clone());
        self.session = Some(Session {
            connection,
            cancel,
            tasks,
            heartbeat,
        });
        info!("[AGENT] {} registration sent to {}", self.entity_id, url);

        // The registry acknowledges nothing; a refused registration shows up as an early close
        if timeout(REGISTRATION_SETTLE, reader_done.cancelled()).await.is_ok() {
            warn!("[AGENT] {} was disconnected right after registering with {}", self.entity_id, url);
            self.teardown().await;
            return Err(TransportError::ConnectionClosed.into());
        }
        Ok(())
    }

    /// Send `payload` to `recipient`; returns the generated envelope id
    pub fn send(&self, recipient: &str, intent: &str, payload: Value) -> Result<String> {
        self.sender.send(recipient, intent, payload)
    }

    pub fn send_envelope(&self, envelope: &Envelope) -> Result<()> {
        self.sender.send_envelope(envelope)
    }

    /// Close the socket and wait for every session task and handler to finish
    pub async fn disconnect(&mut self) {
        if self.session.is_some() {
            self.teardown().await;
            self.dispatch.shutdown().await;
            info!("[AGENT] {} disconnected", self.entity_id);
        }
    }

    async fn teardown(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        *self.sender.link.write() = None;

        session.heartbeat.stop().await;
        // Writer sends the close frame and exits
        session.connection.close("client disconnect");
        session.cancel.cancel();
        session.tasks.close();
        session.tasks.wait().await;
    }
}

impl Drop for AgentClient {
    fn drop(&mut self) {
        if let Some(session) = &self.session {
            session.connection.close("client dropped");
            session.cancel.cancel();
        }
    }
}

async fn read_loop<S>(
    mut stream: S,
    entity_id: EntityId,
    codec: Arc<JsonCodec>,
    dispatch: Arc<HandlerDispatch>,
    connection: SharedConnection,
    cancel: CancellationToken,
    done: CancellationToken,
) where
    S: Stream<Item = std::result::Result<Message, WsError>> + Unpin,
{
    let _done = done.drop_guard();
    loop {
        let message = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            message = stream.next() => message,
        };
        let Some(message) = message else {
            debug!("[AGENT] Registry closed the stream for {}", entity_id);
            break;
        };

        match connection_event(message) {
            Some(ConnectionEvent::Frame(bytes)) => match codec.decode(&bytes) {
                Ok(envelope) if envelope.recipient() == &entity_id => {
                    dispatch.dispatch(envelope);
                }
                Ok(envelope) => {
                    warn!(
                        "[AGENT] Dropping envelope for {} delivered to {}",
                        envelope.recipient(),
                        entity_id
                    );
                }
                Err(e) => warn!("[AGENT] Undecodable frame for {}: {}", entity_id, e),
            },
            Some(ConnectionEvent::Heartbeat) | None => {}
            Some(ConnectionEvent::Closed) => {
                debug!("[AGENT] Registry closed the connection for {}", entity_id);
                break;
            }
            Some(ConnectionEvent::Failed(e)) => {
                warn!("[AGENT] Connection for {} failed: {}", entity_id, e);
                break;
            }
        }
    }
    // Stops the writer, which in turn stops the heartbeat
    connection.close("reader stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(entity: &str) -> AgentConfig {
        AgentConfig {
            entity_id: entity.to_string(),
            ..AgentConfig::default()
        }
    }

    #[test]
    fn test_rejects_empty_entity_id() {
        assert!(matches!(AgentClient::new(config("")), Err(AgentError::Protocol(_))));
    }

    #[test]
    fn test_rejects_zero_ping_interval() {
        let mut cfg = config("A");
        cfg.ping_interval_ms = 0;
        assert!(matches!(AgentClient::new(cfg), Err(AgentError::InvalidConfig(_))));
    }

    #[test]
    fn test_send_before_connect() {
        let client = AgentClient::new(config("A")).unwrap();
        assert!(!client.is_connected());
        assert!(matches!(
            client.send("B", "hello", serde_json::json!({})),
            Err(AgentError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_sender_queues_on_open_link() {
        let client = AgentClient::new(config("A")).unwrap();
        let (connection, mut outbound) = ChannelConnection::shared();
        *client.sender.link.write() = Some(connection);

        let id = client.send("B", "hello", serde_json::json!({"x": 1})).unwrap();
        let Some(regennexus_router::OutboundFrame::Data(bytes)) = outbound.recv().await else {
            panic!("expected data frame");
        };
        let envelope = JsonCodec::new().decode(&bytes).unwrap();
        assert_eq!(envelope.id(), Some(id.as_str()));
        assert_eq!(envelope.sender(), "A");
        assert_eq!(envelope.recipient(), "B");
        assert!(envelope.timestamp().is_some());
    }
}
