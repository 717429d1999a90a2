// Copyright 2025 RegenNexus Contributors
// SPDX-License-Identifier: Apache-2.0

//! WebSocket registry server
//!
//! Accepts agent connections and gives each one a [`ConnectionSupervisor`]
//! (reader, registration, liveness, routing) plus a writer task draining its
//! outbound queue. All tasks hang off one [`TaskTracker`] and one
//! [`CancellationToken`], so [`RegistryServer::shutdown`] stops and joins
//! everything.

use futures_util::{future, StreamExt};
use regennexus_config::RegenNexusConfig;
use regennexus_protocol::JsonCodec;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_async;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

use super::{connection_event, write_outbound};
use crate::connection::{ChannelConnection, ConnectionRegistry};
use crate::dispatch::HandlerDispatch;
use crate::error::{TransportError, TransportResult};
use crate::liveness::{ConnectionSupervisor, LivenessTimings, RoutingContext};
use crate::router::Router;
use crate::services::RegistryServices;

pub struct RegistryServer {
    local_addr: SocketAddr,
    context: RoutingContext,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl RegistryServer {
    /// Build the router from `config`, install the registry services and start listening
    pub async fn bind(config: &RegenNexusConfig) -> TransportResult<Self> {
        let dispatch = Arc::new(HandlerDispatch::new());
        let router = Router::from_config(&config.registry, dispatch, Arc::new(JsonCodec::new()))
            .map_err(|e| TransportError::InvalidConfig(e.to_string()))?;
        RegistryServices::install(&router);

        let context = RoutingContext::new(
            Arc::new(router),
            LivenessTimings::from(&config.liveness),
            config.routing.clone(),
        );
        Self::bind_with_context(&config.server.bind_address(), context).await
    }

    /// Start listening on `address` with a caller-built routing context
    pub async fn bind_with_context(address: &str, context: RoutingContext) -> TransportResult<Self> {
        let listener = TcpListener::bind(address)
            .await
            .map_err(|e| TransportError::BindFailed(format!("{}: {}", address, e)))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| TransportError::BindFailed(e.to_string()))?;

        info!(
            "[WS-REGISTRY] Listening on {} as '{}'",
            local_addr,
            context.router.local_entity()
        );

        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();
        tracker.spawn(accept_loop(listener, context.clone(), cancel.clone(), tracker.clone()));

        Ok(Self {
            local_addr,
            context,
            cancel,
            tracker,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// `ws://` URL agents should connect to
    pub fn url(&self) -> String {
        format!("ws://{}", self.local_addr)
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.context.router
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        self.context.router.registry()
    }

    pub fn dispatch(&self) -> &Arc<HandlerDispatch> {
        self.context.router.dispatch()
    }

    /// Stop accepting, close every connection and join all tasks
    pub async fn shutdown(&self) {
        info!("[WS-REGISTRY] Shutting down ({} connections)", self.registry().len());
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        self.dispatch().shutdown().await;
        info!("[WS-REGISTRY] Stopped");
    }
}

impl Drop for RegistryServer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn accept_loop(listener: TcpListener, context: RoutingContext, cancel: CancellationToken, tracker: TaskTracker) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer_addr)) => {
                    debug!("[WS-REGISTRY] New connection from {}", peer_addr);
                    tracker.spawn(handle_client(
                        stream,
                        peer_addr,
                        context.clone(),
                        cancel.child_token(),
                        tracker.clone(),
                    ));
                }
                Err(e) => error!("[WS-REGISTRY] Accept error: {}", e),
            },
        }
    }
    debug!("[WS-REGISTRY] Accept loop stopped");
}

async fn handle_client(
    stream: TcpStream,
    peer_addr: SocketAddr,
    context: RoutingContext,
    cancel: CancellationToken,
    tracker: TaskTracker,
) {
    let peer = peer_addr.to_string();
    let (handle, outbound) = ChannelConnection::shared();
    let mut supervisor = ConnectionSupervisor::new(context, handle, peer.clone(), cancel);

    let Ok(ws_stream) = supervisor.connect(accept_async(stream)).await else {
        return;
    };
    let (sink, read) = ws_stream.split();

    let writer_peer = peer.clone();
    tracker.spawn(async move { write_outbound(sink, outbound, &writer_peer).await });

    let events = read.filter_map(|message| future::ready(connection_event(message)));
    let report = supervisor.run(events).await;
    debug!("[WS-REGISTRY] Client {} finished: {:?}", peer, report);
}
