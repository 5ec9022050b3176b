//! # Gateway Contract
//!
//! Wire types and traits for the two directions of the fabric:
//!
//! - [`GatewayTransport`]: service → gateway (register, listener session
//!   control, publish)
//! - [`EventNotificationService`]: gateway → service, the single inbound call
//!   every service implements
//!
//! Request and reply bodies are JSON. Replies from either side are wrapped in
//! [`Reply`] so a remote failure is distinguishable from a transport failure.

use crate::envelope::{CodecError, DynamicMessage, Envelope};
use crate::routing_key::{RoutingKey, RoutingKeyPattern};
use crate::BusResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque handle issued by the gateway on successful registration
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceHandle(String);

impl ServiceHandle {
    pub fn new(uuid: impl Into<String>) -> Self {
        Self(uuid.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServiceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterServiceRequest {
    pub org_name: String,
    pub system_name: String,
    pub service_name: String,
    pub instance_id: String,
    pub gateway_uri: String,
    pub service_uri: String,
    pub routes: Vec<RoutingKeyPattern>,
    pub listen_queue: String,
    pub publish_queue: String,
    pub exchange: String,
    pub retry_count: u32,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RegistrationState {
    Registered,
    Rejected,
    #[serde(other)]
    Unknown,
}

impl fmt::Display for RegistrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RegistrationState::Registered => "REGISTERED",
            RegistrationState::Rejected => "REJECTED",
            RegistrationState::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterServiceResponse {
    pub state: RegistrationState,
    #[serde(default)]
    pub service_uuid: String,
}

/// Body of start/stop/unregister calls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceHandleRequest {
    pub service_uuid: ServiceHandle,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishMsgRequest {
    pub service_uuid: ServiceHandle,
    pub routing_key: RoutingKey,
    pub msg: DynamicMessage,
}

/// Receipt acknowledgement. Carries no data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {}

/// Result wrapper used on every request/reply exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reply<T> {
    Ok(T),
    Error(String),
}

/// Service-side view of the broker gateway.
///
/// Implementations must be safe for concurrent use: one transport is shared by
/// every publisher in the process.
#[async_trait]
pub trait GatewayTransport: Send + Sync {
    async fn register(&self, req: RegisterServiceRequest) -> BusResult<RegisterServiceResponse>;

    /// Idempotent
    async fn start_listener(&self, handle: &ServiceHandle) -> BusResult<()>;

    /// Idempotent
    async fn stop_listener(&self, handle: &ServiceHandle) -> BusResult<()>;

    async fn unregister(&self, handle: &ServiceHandle) -> BusResult<()>;

    /// Returns once the gateway has accepted the message, not once
    /// subscribers have processed it.
    async fn publish(&self, req: PublishMsgRequest) -> BusResult<Ack>;
}

/// Handler-level failure as returned by business code
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Logged by dispatchers, never returned to the gateway
    #[error("no handler registered for routing key {0}")]
    Unroutable(RoutingKey),

    #[error("failed to decode payload on {routing_key}: {source}")]
    Decode {
        routing_key: RoutingKey,
        #[source]
        source: CodecError,
    },

    #[error("handler failed on {routing_key}: {source}")]
    Handler {
        routing_key: RoutingKey,
        #[source]
        source: HandlerError,
    },
}

/// The inbound push contract: the gateway delivers one envelope per call.
#[async_trait]
pub trait EventNotificationService: Send + Sync {
    async fn event_notification(&self, envelope: Envelope) -> Result<Ack, DispatchError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_registration_state_wire_values() {
        let resp: RegisterServiceResponse =
            serde_json::from_value(json!({"state": "REGISTERED", "service_uuid": "abc"})).unwrap();
        assert_eq!(resp.state, RegistrationState::Registered);
        assert_eq!(resp.service_uuid, "abc");

        let resp: RegisterServiceResponse =
            serde_json::from_value(json!({"state": "PENDING"})).unwrap();
        assert_eq!(resp.state, RegistrationState::Unknown);
        assert_eq!(resp.service_uuid, "");
    }

    #[test]
    fn test_reply_wire_shape() {
        let ok: Reply<Ack> = Reply::Ok(Ack {});
        assert_eq!(serde_json::to_value(&ok).unwrap(), json!({"ok": {}}));

        let err: Reply<Ack> = serde_json::from_value(json!({"error": "unknown service"})).unwrap();
        assert_eq!(err, Reply::Error("unknown service".to_string()));
    }

    #[test]
    fn test_handle_serializes_transparently() {
        let req = ServiceHandleRequest {
            service_uuid: ServiceHandle::new("1234"),
        };
        assert_eq!(serde_json::to_value(&req).unwrap(), json!({"service_uuid": "1234"}));
    }
}
