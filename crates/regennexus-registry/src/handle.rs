//! Connection identity

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Unique id assigned to every accepted transport connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Time-ordered (UUID v7) id
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Anything the registry can store as a connection handle
///
/// The registry only needs to know which connection a handle belongs to so
/// that cleanup of a superseded connection never evicts its successor.
pub trait ConnectionRef: Send + Sync {
    fn connection_id(&self) -> ConnectionId;
}

impl<T: ConnectionRef + ?Sized> ConnectionRef for Arc<T> {
    fn connection_id(&self) -> ConnectionId {
        (**self).connection_id()
    }
}
