// Copyright 2025 RegenNexus Contributors
// SPDX-License-Identifier: Apache-2.0

//! The routed message unit
//!
//! An [`Envelope`] carries `sender`, `recipient`, `intent` and an opaque
//! `payload`. Optional `id`, `timestamp` and `ttl` metadata ride along, and
//! any field the codec does not recognise is kept in `extensions` so that a
//! relayed envelope reaches its recipient with those fields intact.

use serde_json::{json, Map, Value};

use crate::{intents, EntityId, ProtocolError};

/// Prefix applied to a request id to form the id of its reply
pub const RESPONSE_ID_PREFIX: &str = "response-";

/// Recipient that addresses every registered entity except the sender
pub const BROADCAST_RECIPIENT: &str = "*";

#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    id: Option<String>,
    sender: EntityId,
    recipient: EntityId,
    intent: String,
    payload: Value,
    timestamp: Option<f64>,
    ttl: Option<f64>,
    extensions: Map<String, Value>,
}

impl Envelope {
    /// Create an envelope with no metadata
    ///
    /// # Errors
    /// [`ProtocolError::EmptyIntent`] if `intent` is empty.
    pub fn new(
        sender: EntityId,
        recipient: EntityId,
        intent: impl Into<String>,
        payload: Value,
    ) -> Result<Self, ProtocolError> {
        let intent = intent.into();
        if intent.is_empty() {
            return Err(ProtocolError::EmptyIntent);
        }
        Ok(Self::with_known_intent(sender, recipient, intent, payload))
    }

    fn with_known_intent(sender: EntityId, recipient: EntityId, intent: String, payload: Value) -> Self {
        Self {
            id: None,
            sender,
            recipient,
            intent,
            payload,
            timestamp: None,
            ttl: None,
            extensions: Map::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: f64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Time-to-live in seconds, measured from `timestamp`
    pub fn with_ttl(mut self, ttl_seconds: f64) -> Self {
        self.ttl = Some(ttl_seconds);
        self
    }

    pub fn with_sender(mut self, sender: EntityId) -> Self {
        self.sender = sender;
        self
    }

    pub fn with_extension(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extensions.insert(key.into(), value);
        self
    }

    pub(crate) fn with_extensions(mut self, extensions: Map<String, Value>) -> Self {
        self.extensions = extensions;
        self
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn sender(&self) -> &EntityId {
        &self.sender
    }

    pub fn recipient(&self) -> &EntityId {
        &self.recipient
    }

    pub fn intent(&self) -> &str {
        &self.intent
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn timestamp(&self) -> Option<f64> {
        self.timestamp
    }

    pub fn ttl(&self) -> Option<f64> {
        self.ttl
    }

    /// Fields carried through unchanged that are not part of the core envelope
    pub fn extensions(&self) -> &Map<String, Value> {
        &self.extensions
    }

    /// `true` once `now` is past `timestamp + ttl`
    ///
    /// Envelopes lacking either field never expire.
    pub fn is_expired(&self, now: f64) -> bool {
        match (self.timestamp, self.ttl) {
            (Some(timestamp), Some(ttl)) => now > timestamp + ttl,
            _ => false,
        }
    }

    pub fn is_broadcast(&self) -> bool {
        self.recipient.as_str() == BROADCAST_RECIPIENT
    }

    /// Build a reply travelling back to this envelope's sender
    ///
    /// The reply id is the request id with [`RESPONSE_ID_PREFIX`] prepended.
    pub fn reply(&self, intent: impl Into<String>, payload: Value) -> Result<Envelope, ProtocolError> {
        let mut reply = Envelope::new(self.recipient.clone(), self.sender.clone(), intent, payload)?;
        reply.id = self.response_id();
        Ok(reply)
    }

    /// Reply with intent `error` describing why this envelope was not handled
    pub fn error_reply(&self, error_code: &str, error_message: &str) -> Envelope {
        let payload = json!({
            "error_code": error_code,
            "error_message": error_message,
            "original_intent": self.intent,
        });
        let mut reply = Self::with_known_intent(
            self.recipient.clone(),
            self.sender.clone(),
            intents::ERROR.to_string(),
            payload,
        );
        reply.id = self.response_id();
        reply
    }

    /// Reply with intent `ack`
    pub fn ack(&self) -> Envelope {
        let mut reply = Self::with_known_intent(
            self.recipient.clone(),
            self.sender.clone(),
            intents::ACK.to_string(),
            json!({ "original_intent": self.intent }),
        );
        reply.id = self.response_id();
        reply
    }

    fn response_id(&self) -> Option<String> {
        self.id.as_ref().map(|id| format!("{RESPONSE_ID_PREFIX}{id}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> EntityId {
        EntityId::new(s).unwrap()
    }

    fn request() -> Envelope {
        Envelope::new(id("python_client"), id("cpp_client"), "ping", json!({"n": 1}))
            .unwrap()
            .with_id("abc")
    }

    #[test]
    fn test_empty_intent_rejected() {
        let result = Envelope::new(id("a"), id("b"), "", Value::Null);
        assert_eq!(result, Err(ProtocolError::EmptyIntent));
    }

    #[test]
    fn test_expiry_requires_timestamp_and_ttl() {
        let env = request();
        assert!(!env.is_expired(f64::MAX));

        let env = env.with_timestamp(100.0).with_ttl(5.0);
        assert!(!env.is_expired(105.0));
        assert!(env.is_expired(105.5));
    }

    #[test]
    fn test_reply_swaps_addresses() {
        let reply = request().reply("pong", json!({})).unwrap();
        assert_eq!(reply.sender(), &id("cpp_client"));
        assert_eq!(reply.recipient(), &id("python_client"));
        assert_eq!(reply.id(), Some("response-abc"));
        assert_eq!(reply.intent(), "pong");
        assert!(reply.timestamp().is_none());
    }

    #[test]
    fn test_error_reply_payload() {
        let reply = request().error_reply("unknown_recipient", "no such entity");
        assert_eq!(reply.intent(), intents::ERROR);
        assert_eq!(reply.payload()["error_code"], "unknown_recipient");
        assert_eq!(reply.payload()["error_message"], "no such entity");
        assert_eq!(reply.payload()["original_intent"], "ping");
    }

    #[test]
    fn test_broadcast_recipient() {
        let env = Envelope::new(id("lamp"), id("*"), "status", json!({"on": true})).unwrap();
        assert!(env.is_broadcast());
        assert!(!request().is_broadcast());
    }

    #[test]
    fn test_ack_without_request_id() {
        let env = Envelope::new(id("a"), id("b"), "status", Value::Null).unwrap();
        let ack = env.ack();
        assert_eq!(ack.intent(), "ack");
        assert!(ack.id().is_none());
    }
}
