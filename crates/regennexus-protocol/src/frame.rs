//! Connection-level frames

use serde_json::{json, Value};

use crate::{EntityId, Envelope};

/// Value of the `type` field that marks a registration frame
pub const REGISTRATION_FRAME_TYPE: &str = "registration";

/// First frame an agent sends after the transport opens
///
/// ```json
/// {"type": "registration", "entity_id": "python_client", "capabilities": ["ping"]}
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationFrame {
    pub entity_id: EntityId,
    pub capabilities: Vec<String>,
}

impl RegistrationFrame {
    pub fn new(entity_id: EntityId) -> Self {
        Self {
            entity_id,
            capabilities: Vec::new(),
        }
    }

    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }

    pub fn to_value(&self) -> Value {
        json!({
            "type": REGISTRATION_FRAME_TYPE,
            "entity_id": self.entity_id.as_str(),
            "capabilities": self.capabilities,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        self.to_value().to_string().into_bytes()
    }
}

/// A decoded inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    Registration(RegistrationFrame),
    Envelope(Envelope),
}

impl InboundFrame {
    pub fn kind(&self) -> &'static str {
        match self {
            InboundFrame::Registration(_) => "registration",
            InboundFrame::Envelope(_) => "envelope",
        }
    }
}
