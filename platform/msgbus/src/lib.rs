//! # Messaging Fabric Client
//!
//! The platform-level contract every service uses to talk to every other
//! service. Services never reach the broker directly: they register with a
//! broker-facing gateway, publish through it, and receive pushes from it.
//!
//! ## Pieces
//!
//! - **Routing keys**: [`RoutingKeyBuilder`], [`RoutingKeyPattern`],
//!   [`prepare_route`]
//! - **Envelope codec**: [`Envelope`], [`DynamicMessage`], [`EventPayload`]
//! - **Client**: [`MsgBusClient`] (`Unregistered → Registered → Running →
//!   Stopped`)
//! - **Transports**: [`NatsGateway`] (production), [`InMemoryGateway`]
//!   (dev/test)
//! - **Direct publisher**: [`BrokerAdminClient`], tooling-only path to the
//!   broker's management API
//!
//! ## Usage
//!
//! ```rust,no_run
//! use msgbus::{events, prepare_routes, MsgBusClient, MsgBusConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let cfg = MsgBusConfig::from_env()?;
//! let routes = prepare_routes(&cfg.org_name, &[events::EVENT_NODE_CREATE])?;
//!
//! let client = MsgBusClient::connect(cfg.to_descriptor(routes), &cfg.gateway_subject).await?;
//! client.register().await?;
//! client.start().await?;
//!
//! let key = client
//!     .base_routing_key()
//!     .set_object("invoice")
//!     .set_action("generate")
//!     .must_build();
//! client.publish_request(&key, &events::InvoiceGenerated::default()).await?;
//! # Ok(())
//! # }
//! ```

mod client;
pub mod config;
pub mod direct;
mod envelope;
pub mod events;
mod gateway;
mod inmemory_gateway;
mod nats_gateway;
pub mod periodic;
pub mod retry;
mod routing_key;

pub use client::{ClientState, MsgBusClient, RegistrationDescriptor, ServiceIdentity};
pub use config::{BrokerAdminConfig, ConfigError, MsgBusConfig};
pub use direct::{BrokerAdminClient, DirectPayload, DirectPublishError, PublishAck};
pub use envelope::{CodecError, DomainMessage, DynamicMessage, Envelope, TYPE_URL_PREFIX};
pub use events::EventPayload;
pub use gateway::{
    Ack, DispatchError, EventNotificationService, GatewayTransport, HandlerError,
    PublishMsgRequest, RegisterServiceRequest, RegisterServiceResponse, RegistrationState, Reply,
    ServiceHandle, ServiceHandleRequest,
};
pub use inmemory_gateway::{InMemoryGateway, PublishedRecord};
pub use nats_gateway::NatsGateway;
pub use periodic::PeriodicTask;
pub use routing_key::{
    prepare_route, prepare_routes, MessageType, RoutingKey, RoutingKeyBuilder, RoutingKeyError,
    RoutingKeyPattern, Scope, Source, DELIMITER, ORG_PLACEHOLDER, WILDCARD_ONE, WILDCARD_REST,
};

use std::time::Duration;

/// Errors surfaced by the fabric client
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("connection error: {0}")]
    ConnectionError(String),

    #[error("registration of {service} not accepted: state {state}")]
    RegistrationError {
        service: String,
        state: RegistrationState,
    },

    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    RoutingKey(#[from] RoutingKeyError),

    #[error("{operation} not allowed while client is {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    #[error("gateway error: {0}")]
    GatewayError(String),
}

impl BusError {
    /// Deadline exceeded. Callers should handle it like any other remote error.
    pub fn is_timeout(&self) -> bool {
        matches!(self, BusError::Timeout { .. })
    }
}

/// Result type for fabric operations
pub type BusResult<T> = Result<T, BusError>;
