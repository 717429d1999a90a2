//! WebSocket transport
//!
//! Glue between `tokio-tungstenite` and the transport-neutral connection
//! contract: inbound messages become [`ConnectionEvent`]s and a writer task
//! drains [`OutboundFrame`]s into the socket.

pub mod server;

pub use server::RegistryServer;

use futures_util::{Sink, SinkExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, trace};

use crate::connection::{ConnectionEvent, OutboundFrame};
use crate::error::TransportError;

/// Map one read result to a connection event; raw frames are skipped
pub fn connection_event(message: Result<Message, WsError>) -> Option<ConnectionEvent> {
    match message {
        Ok(Message::Text(text)) => Some(ConnectionEvent::Frame(text.into_bytes())),
        Ok(Message::Binary(data)) => Some(ConnectionEvent::Frame(data)),
        Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => Some(ConnectionEvent::Heartbeat),
        Ok(Message::Close(_)) => Some(ConnectionEvent::Closed),
        Ok(Message::Frame(_)) => None,
        Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => Some(ConnectionEvent::Closed),
        Err(e) => Some(ConnectionEvent::Failed(TransportError::ReceiveFailed(e.to_string()))),
    }
}

/// Drain `outbound` into `sink` until a close is requested or the socket fails
///
/// UTF-8 payloads go out as text frames, anything else as binary.
pub async fn write_outbound<S>(mut sink: S, mut outbound: mpsc::UnboundedReceiver<OutboundFrame>, peer: &str)
where
    S: Sink<Message, Error = WsError> + Unpin,
{
    while let Some(frame) = outbound.recv().await {
        let result = match frame {
            OutboundFrame::Data(bytes) => match String::from_utf8(bytes) {
                Ok(text) => sink.send(Message::Text(text)).await,
                Err(e) => sink.send(Message::Binary(e.into_bytes())).await,
            },
            OutboundFrame::Ping => sink.send(Message::Ping(Vec::new())).await,
            OutboundFrame::Close(reason) => {
                trace!("[WS] Closing {}: {}", peer, reason);
                let close = CloseFrame {
                    code: CloseCode::Normal,
                    reason: reason.into(),
                };
                if let Err(e) = sink.send(Message::Close(Some(close))).await {
                    trace!("[WS] Close frame to {} not sent: {}", peer, e);
                }
                break;
            }
        };

        if let Err(e) = result {
            debug!("[WS] Write to {} failed: {}", peer, e);
            break;
        }
    }
    outbound.close();
}
