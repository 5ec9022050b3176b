//! # Event Envelope
//!
//! The `{routing_key, msg}` pair is the only object that crosses the wire
//! between a service and the gateway, in either direction.
//!
//! ## Payload type-erasure
//!
//! [`DynamicMessage`] carries a serialized domain message plus a type URL.
//! Receivers recover the concrete type with [`DynamicMessage::unwrap_into`].
//!
//! Decoding is partial-tolerant: unknown fields are discarded and missing
//! fields take their defaults, because publishers and subscribers are
//! deployed independently. Only structurally invalid bytes fail with
//! [`CodecError::Decoding`]; a type URL for a different message fails with
//! [`CodecError::TypeMismatch`].

use crate::routing_key::RoutingKey;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Prefix of every type URL produced by [`DynamicMessage::wrap`]
pub const TYPE_URL_PREFIX: &str = "type.msgbus/";

/// A message type that can travel inside a [`DynamicMessage`].
///
/// Implementors should derive `Deserialize` with `#[serde(default)]` so that
/// older or newer publishers can omit fields.
pub trait DomainMessage: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Stable, versioned name, e.g. `events.v1.NodeCreated`
    const TYPE_NAME: &'static str;

    fn type_url() -> String {
        format!("{TYPE_URL_PREFIX}{}", Self::TYPE_NAME)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("failed to encode {type_name}: {reason}")]
    Encoding { type_name: String, reason: String },

    #[error("payload type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    #[error("failed to decode {type_url}: {reason}")]
    Decoding { type_url: String, reason: String },
}

/// Type-erased domain message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynamicMessage {
    pub type_url: String,
    #[serde(with = "base64_bytes")]
    pub value: Vec<u8>,
}

impl DynamicMessage {
    /// Serialize `msg` and record its type identity.
    pub fn wrap<M: DomainMessage>(msg: &M) -> Result<Self, CodecError> {
        let value = serde_json::to_vec(msg).map_err(|e| CodecError::Encoding {
            type_name: M::TYPE_NAME.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            type_url: M::type_url(),
            value,
        })
    }

    /// Wrap bytes produced elsewhere without interpreting them
    pub fn from_raw(type_url: impl Into<String>, value: Vec<u8>) -> Self {
        Self {
            type_url: type_url.into(),
            value,
        }
    }

    /// Type name with the URL prefix stripped
    pub fn type_name(&self) -> &str {
        self.type_url
            .rsplit_once('/')
            .map(|(_, name)| name)
            .unwrap_or(&self.type_url)
    }

    pub fn is<M: DomainMessage>(&self) -> bool {
        self.type_name() == M::TYPE_NAME
    }

    /// Recover the concrete message.
    pub fn unwrap_into<M: DomainMessage>(&self) -> Result<M, CodecError> {
        if !self.is::<M>() {
            return Err(CodecError::TypeMismatch {
                expected: M::TYPE_NAME.to_string(),
                found: self.type_url.clone(),
            });
        }
        serde_json::from_slice(&self.value).map_err(|e| CodecError::Decoding {
            type_url: self.type_url.clone(),
            reason: e.to_string(),
        })
    }

    /// Decode into an existing value, leaving it untouched on error.
    pub fn unwrap_to<M: DomainMessage>(&self, target: &mut M) -> Result<(), CodecError> {
        *target = self.unwrap_into()?;
        Ok(())
    }

    /// Short description for log lines
    pub fn summary(&self) -> String {
        format!("{} ({} bytes)", self.type_name(), self.value.len())
    }
}

/// Routing key plus type-erased payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub routing_key: RoutingKey,
    pub msg: DynamicMessage,
}

impl Envelope {
    pub fn new(routing_key: RoutingKey, msg: DynamicMessage) -> Self {
        Self { routing_key, msg }
    }

    pub fn wrap<M: DomainMessage>(routing_key: RoutingKey, msg: &M) -> Result<Self, CodecError> {
        Ok(Self::new(routing_key, DynamicMessage::wrap(msg)?))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(self).map_err(|e| CodecError::Encoding {
            type_name: "Envelope".to_string(),
            reason: e.to_string(),
        })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Decoding {
            type_url: "Envelope".to_string(),
            reason: e.to_string(),
        })
    }
}

mod base64_bytes {
    use super::{Engine, BASE64};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64.decode(encoded.as_bytes()).map_err(de::Error::custom)
    }
}
