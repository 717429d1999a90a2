//! Connection adapter contract
//!
//! A connection task owns its socket. Everyone else (registry, router, other
//! supervisors) holds a [`SharedConnection`], which only queues frames for
//! that task to write.

use regennexus_registry::{ConnectionId, ConnectionRef, IdentityRegistry};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::{TransportError, TransportResult};

/// Outbound side of a connection
pub trait ConnectionHandle: ConnectionRef {
    /// Queue an encoded frame for writing
    fn send(&self, frame: Vec<u8>) -> TransportResult<()>;

    /// Queue a transport-level ping
    fn ping(&self) -> TransportResult<()>;

    /// Ask the connection task to close the transport
    fn close(&self, reason: &str);

    fn is_closed(&self) -> bool;
}

pub type SharedConnection = Arc<dyn ConnectionHandle>;

pub type ConnectionRegistry = IdentityRegistry<SharedConnection>;

/// What a connection task should write next
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    Data(Vec<u8>),
    Ping,
    Close(String),
}

/// Inbound occurrence observed by a connection's read loop
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// A text or binary data frame
    Frame(Vec<u8>),
    /// Ping or pong from the peer
    Heartbeat,
    /// Orderly close by the peer
    Closed,
    Failed(TransportError),
}

/// Handle backed by an unbounded FIFO drained by the connection's writer task
#[derive(Clone)]
pub struct ChannelConnection {
    id: ConnectionId,
    tx: mpsc::UnboundedSender<OutboundFrame>,
}

impl ChannelConnection {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<OutboundFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                id: ConnectionId::new(),
                tx,
            },
            rx,
        )
    }

    pub fn shared() -> (SharedConnection, mpsc::UnboundedReceiver<OutboundFrame>) {
        let (connection, rx) = Self::new();
        (Arc::new(connection), rx)
    }

    fn enqueue(&self, frame: OutboundFrame) -> TransportResult<()> {
        self.tx.send(frame).map_err(|_| TransportError::ConnectionClosed)
    }
}

impl fmt::Debug for ChannelConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelConnection")
            .field("id", &self.id)
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl ConnectionRef for ChannelConnection {
    fn connection_id(&self) -> ConnectionId {
        self.id
    }
}

impl ConnectionHandle for ChannelConnection {
    fn send(&self, frame: Vec<u8>) -> TransportResult<()> {
        self.enqueue(OutboundFrame::Data(frame))
    }

    fn ping(&self) -> TransportResult<()> {
        self.enqueue(OutboundFrame::Ping)
    }

    fn close(&self, reason: &str) {
        // Already closed when the writer is gone
        let _ = self.enqueue(OutboundFrame::Close(reason.to_string()));
    }

    fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
