// Copyright 2025 RegenNexus Contributors
// SPDX-License-Identifier: Apache-2.0

//! Intent handler dispatch
//!
//! Envelopes addressed to the local entity are handed to the handler
//! registered for their intent. Handlers run on their own tracked tasks so a
//! slow handler never stalls the connection that delivered the envelope.

use async_trait::async_trait;
use parking_lot::RwLock;
use regennexus_protocol::Envelope;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

/// Handler for one intent
#[async_trait]
pub trait IntentHandler: Send + Sync + 'static {
    async fn handle(&self, envelope: Envelope);
}

#[async_trait]
impl<F, Fut> IntentHandler for F
where
    F: Fn(Envelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn handle(&self, envelope: Envelope) {
        (self)(envelope).await
    }
}

/// Result of handing an envelope to [`HandlerDispatch`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A handler task was started
    Spawned,
    /// No handler is registered for the intent
    UnhandledIntent,
}

/// Intent -> handler table plus the tasks it has spawned
pub struct HandlerDispatch {
    handlers: RwLock<HashMap<String, Arc<dyn IntentHandler>>>,
    tracker: TaskTracker,
}

impl HandlerDispatch {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            tracker: TaskTracker::new(),
        }
    }

    /// Register `handler` for `intent`, replacing any existing one
    pub fn register_handler<H: IntentHandler>(&self, intent: impl Into<String>, handler: H) {
        let intent = intent.into();
        if self.handlers.write().insert(intent.clone(), Arc::new(handler)).is_some() {
            debug!("Replaced handler for intent '{}'", intent);
        } else {
            debug!("Registered handler for intent '{}'", intent);
        }
    }

    /// Returns `false` if nothing was registered for `intent`
    pub fn unregister_handler(&self, intent: &str) -> bool {
        self.handlers.write().remove(intent).is_some()
    }

    pub fn has_handler(&self, intent: &str) -> bool {
        self.handlers.read().contains_key(intent)
    }

    /// Start the handler for `envelope.intent()` on a tracked task
    ///
    /// Must be called from within a Tokio runtime.
    pub fn dispatch(&self, envelope: Envelope) -> DispatchOutcome {
        let handler = self.handlers.read().get(envelope.intent()).cloned();
        let Some(handler) = handler else {
            warn!(
                "No handler for intent '{}' (from {}), dropping",
                envelope.intent(),
                envelope.sender()
            );
            return DispatchOutcome::UnhandledIntent;
        };

        self.tracker.spawn(async move {
            handler.handle(envelope).await;
        });
        DispatchOutcome::Spawned
    }

    /// Number of handler tasks still running
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Wait for every spawned handler task to finish
    ///
    /// Dispatch stays usable afterwards.
    pub async fn shutdown(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
        debug!("Handler dispatch drained");
    }
}

impl Default for HandlerDispatch {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use regennexus_protocol::EntityId;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    fn envelope(intent: &str) -> Envelope {
        Envelope::new(
            EntityId::new("a").unwrap(),
            EntityId::new("registry").unwrap(),
            intent,
            json!({}),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_unhandled_intent() {
        let dispatch = HandlerDispatch::new();
        assert_eq!(dispatch.dispatch(envelope("status")), DispatchOutcome::UnhandledIntent);
    }

    #[tokio::test]
    async fn test_last_registration_wins() {
        let dispatch = HandlerDispatch::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let first = tx.clone();
        dispatch.register_handler("status", move |_env: Envelope| {
            let tx = first.clone();
            async move {
                let _ = tx.send("first");
            }
        });
        dispatch.register_handler("status", move |_env: Envelope| {
            let tx = tx.clone();
            async move {
                let _ = tx.send("second");
            }
        });

        assert_eq!(dispatch.dispatch(envelope("status")), DispatchOutcome::Spawned);
        dispatch.shutdown().await;
        assert_eq!(rx.recv().await, Some("second"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_shutdown_joins_handlers() {
        let dispatch = HandlerDispatch::new();
        let done = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&done);
        dispatch.register_handler("work", move |_env: Envelope| {
            let counter = Arc::clone(&counter);
            async move {
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        for _ in 0..5 {
            dispatch.dispatch(envelope("work"));
        }
        dispatch.shutdown().await;

        assert_eq!(done.load(Ordering::SeqCst), 5);
        assert_eq!(dispatch.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_unregister() {
        let dispatch = HandlerDispatch::new();
        dispatch.register_handler("status", |_env: Envelope| async {});
        assert!(dispatch.unregister_handler("status"));
        assert!(!dispatch.unregister_handler("status"));
        assert_eq!(dispatch.dispatch(envelope("status")), DispatchOutcome::UnhandledIntent);
    }
}
