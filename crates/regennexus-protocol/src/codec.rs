// Copyright 2025 RegenNexus Contributors
// SPDX-License-Identifier: Apache-2.0

//! Frame codec
//!
//! Frames are UTF-8 JSON objects. Decoding is strict about the three routing
//! fields (`sender`, `recipient`, `intent` must be non-empty strings) and
//! lenient about everything else: unknown fields are kept as extensions and
//! re-emitted on encode.

use serde_json::{Map, Value};

use crate::clock::{Clock, SystemClock};
use crate::frame::{InboundFrame, RegistrationFrame, REGISTRATION_FRAME_TYPE};
use crate::{EntityId, Envelope};

const FIELD_ID: &str = "id";
const FIELD_SENDER: &str = "sender";
const FIELD_RECIPIENT: &str = "recipient";
const FIELD_INTENT: &str = "intent";
const FIELD_PAYLOAD: &str = "payload";
const FIELD_TIMESTAMP: &str = "timestamp";
const FIELD_TTL: &str = "ttl";
const FIELD_TYPE: &str = "type";
const FIELD_ENTITY_ID: &str = "entity_id";
const FIELD_CAPABILITIES: &str = "capabilities";

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecodeError {
    #[error("Malformed frame: {0}")]
    Malformed(String),

    #[error("Missing required field '{0}'")]
    MissingField(&'static str),
}

/// Converts between raw transport frames and protocol values
pub trait Codec: Send + Sync {
    /// Decode an envelope frame
    fn decode(&self, raw: &[u8]) -> Result<Envelope, DecodeError>;

    /// Decode either a registration frame or an envelope
    fn decode_frame(&self, raw: &[u8]) -> Result<InboundFrame, DecodeError>;

    /// Encode an envelope, stamping `timestamp` if it is absent
    fn encode(&self, envelope: &Envelope) -> Vec<u8>;
}

/// JSON codec; the clock supplies timestamps for envelopes that lack one
#[derive(Debug, Clone, Default)]
pub struct JsonCodec<C = SystemClock> {
    clock: C,
}

impl JsonCodec<SystemClock> {
    pub fn new() -> Self {
        Self { clock: SystemClock }
    }
}

impl<C: Clock> JsonCodec<C> {
    pub fn with_clock(clock: C) -> Self {
        Self { clock }
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Build the JSON object for an envelope without serializing it
    pub fn to_value(&self, envelope: &Envelope) -> Value {
        let mut map = envelope.extensions().clone();
        if let Some(id) = envelope.id() {
            map.insert(FIELD_ID.into(), Value::from(id));
        }
        map.insert(FIELD_SENDER.into(), Value::from(envelope.sender().as_str()));
        map.insert(FIELD_RECIPIENT.into(), Value::from(envelope.recipient().as_str()));
        map.insert(FIELD_INTENT.into(), Value::from(envelope.intent()));
        map.insert(FIELD_PAYLOAD.into(), envelope.payload().clone());
        let timestamp = envelope.timestamp().unwrap_or_else(|| self.clock.now());
        map.insert(FIELD_TIMESTAMP.into(), Value::from(timestamp));
        if let Some(ttl) = envelope.ttl() {
            map.insert(FIELD_TTL.into(), Value::from(ttl));
        }
        Value::Object(map)
    }
}

impl<C: Clock> Codec for JsonCodec<C> {
    fn decode(&self, raw: &[u8]) -> Result<Envelope, DecodeError> {
        envelope_from_map(parse_object(raw)?)
    }

    fn decode_frame(&self, raw: &[u8]) -> Result<InboundFrame, DecodeError> {
        let map = parse_object(raw)?;
        let is_registration = matches!(
            map.get(FIELD_TYPE),
            Some(Value::String(kind)) if kind == REGISTRATION_FRAME_TYPE
        );
        if is_registration {
            registration_from_map(&map).map(InboundFrame::Registration)
        } else {
            envelope_from_map(map).map(InboundFrame::Envelope)
        }
    }

    fn encode(&self, envelope: &Envelope) -> Vec<u8> {
        self.to_value(envelope).to_string().into_bytes()
    }
}

fn parse_object(raw: &[u8]) -> Result<Map<String, Value>, DecodeError> {
    match serde_json::from_slice::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(DecodeError::Malformed(format!(
            "expected a JSON object, got {}",
            json_kind(&other)
        ))),
        Err(e) => Err(DecodeError::Malformed(e.to_string())),
    }
}

fn envelope_from_map(mut map: Map<String, Value>) -> Result<Envelope, DecodeError> {
    let sender = take_entity_id(&mut map, FIELD_SENDER)?;
    let recipient = take_entity_id(&mut map, FIELD_RECIPIENT)?;
    let intent = take_required_string(&mut map, FIELD_INTENT)?;
    let payload = match map.remove(FIELD_PAYLOAD) {
        None | Some(Value::Null) => Value::Object(Map::new()),
        Some(payload) => payload,
    };
    let id = match map.remove(FIELD_ID) {
        None | Some(Value::Null) => None,
        Some(Value::String(id)) => Some(id),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(other) => return Err(wrong_type(FIELD_ID, "a string", &other)),
    };
    let timestamp = take_optional_number(&mut map, FIELD_TIMESTAMP)?;
    let ttl = take_optional_number(&mut map, FIELD_TTL)?;

    let mut envelope = Envelope::new(sender, recipient, intent, payload)
        .map_err(|_| DecodeError::MissingField(FIELD_INTENT))?
        .with_extensions(map);
    if let Some(id) = id {
        envelope = envelope.with_id(id);
    }
    if let Some(timestamp) = timestamp {
        envelope = envelope.with_timestamp(timestamp);
    }
    if let Some(ttl) = ttl {
        envelope = envelope.with_ttl(ttl);
    }
    Ok(envelope)
}

fn registration_from_map(map: &Map<String, Value>) -> Result<RegistrationFrame, DecodeError> {
    let entity_id = match map.get(FIELD_ENTITY_ID) {
        None | Some(Value::Null) => return Err(DecodeError::MissingField(FIELD_ENTITY_ID)),
        Some(Value::String(s)) => {
            EntityId::new(s.as_str()).map_err(|_| DecodeError::MissingField(FIELD_ENTITY_ID))?
        }
        Some(other) => return Err(wrong_type(FIELD_ENTITY_ID, "a string", other)),
    };
    let capabilities = match map.get(FIELD_CAPABILITIES) {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => Ok(s.clone()),
                other => Err(wrong_type(FIELD_CAPABILITIES, "an array of strings", other)),
            })
            .collect::<Result<Vec<_>, _>>()?,
        Some(other) => return Err(wrong_type(FIELD_CAPABILITIES, "an array of strings", other)),
    };
    Ok(RegistrationFrame {
        entity_id,
        capabilities,
    })
}

fn take_required_string(map: &mut Map<String, Value>, field: &'static str) -> Result<String, DecodeError> {
    match map.remove(field) {
        None | Some(Value::Null) => Err(DecodeError::MissingField(field)),
        Some(Value::String(s)) if s.is_empty() => Err(DecodeError::MissingField(field)),
        Some(Value::String(s)) => Ok(s),
        Some(other) => Err(wrong_type(field, "a string", &other)),
    }
}

fn take_entity_id(map: &mut Map<String, Value>, field: &'static str) -> Result<EntityId, DecodeError> {
    let raw = take_required_string(map, field)?;
    EntityId::new(raw).map_err(|_| DecodeError::MissingField(field))
}

fn take_optional_number(map: &mut Map<String, Value>, field: &'static str) -> Result<Option<f64>, DecodeError> {
    match map.remove(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_f64()
            .map(Some)
            .ok_or_else(|| DecodeError::Malformed(format!("field '{field}' is out of range"))),
        Some(other) => Err(wrong_type(field, "a number", &other)),
    }
}

fn wrong_type(field: &str, expected: &str, got: &Value) -> DecodeError {
    DecodeError::Malformed(format!(
        "field '{}' must be {}, got {}",
        field,
        expected,
        json_kind(got)
    ))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
