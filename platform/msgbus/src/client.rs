//! # Message Bus Client
//!
//! Owns a service's identity and its session with the gateway.
//!
//! ```text
//! Unregistered --register--> Registered --start--> Running
//!                                 ^                  |
//!                                 |      stop        v
//!                              (start) <-------- Stopped
//! ```
//!
//! `unregister` is allowed from any state holding a handle and returns the
//! client to `Unregistered`. Every gateway call is bounded by the descriptor's
//! timeout; an elapsed deadline is returned as [`BusError::Timeout`] and leaves
//! the client state unchanged.

use crate::envelope::{DomainMessage, DynamicMessage};
use crate::events::ServiceStatus;
use crate::gateway::{
    GatewayTransport, PublishMsgRequest, RegisterServiceRequest, RegistrationState, ServiceHandle,
};
use crate::nats_gateway::NatsGateway;
use crate::routing_key::{RoutingKey, RoutingKeyBuilder, RoutingKeyPattern};
use crate::{BusError, BusResult};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

const SERVICE_OBJECT: &str = "service";
const SERVICE_UP: &str = "up";

/// Who a service is on the fabric
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceIdentity {
    pub org_name: String,
    pub system_name: String,
    pub service_name: String,
    /// Stable for the process lifetime
    pub instance_id: String,
}

impl ServiceIdentity {
    pub fn new(
        org_name: impl Into<String>,
        system_name: impl Into<String>,
        service_name: impl Into<String>,
        instance_id: impl Into<String>,
    ) -> Self {
        Self {
            org_name: org_name.into(),
            system_name: system_name.into(),
            service_name: service_name.into(),
            instance_id: instance_id.into(),
        }
    }

    /// Use the orchestrator's pod name as instance id, or a fresh uuid when
    /// there is none.
    pub fn from_pod_name(
        org_name: impl Into<String>,
        system_name: impl Into<String>,
        service_name: impl Into<String>,
        pod_name: Option<String>,
    ) -> Self {
        let instance_id = pod_name
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        Self::new(org_name, system_name, service_name, instance_id)
    }

    /// `event.cloud.local.{org}.{system}.{service}`, ready for object/action
    pub fn base_routing_key(&self) -> RoutingKeyBuilder {
        RoutingKeyBuilder::new()
            .set_event_type()
            .set_cloud_source()
            .set_local_scope()
            .set_org_name(&self.org_name)
            .set_system(&self.system_name)
            .set_service(&self.service_name)
    }
}

/// Everything the gateway needs to know about a service. Fixed once the
/// client is built; changing routes means building a new client.
#[derive(Debug, Clone)]
pub struct RegistrationDescriptor {
    pub identity: ServiceIdentity,
    /// Address of the gateway as seen by the service
    pub gateway_uri: String,
    /// Where the gateway pushes inbound envelopes for this service
    pub service_uri: String,
    pub routes: Vec<RoutingKeyPattern>,
    pub listen_queue: String,
    pub publish_queue: String,
    pub exchange: String,
    /// Delivery retries, enforced by the gateway
    pub retry_count: u32,
    /// Deadline applied to every gateway call
    pub timeout: Duration,
    /// Log payload summaries of every publish
    pub debug_mode: bool,
}

impl RegistrationDescriptor {
    pub fn to_request(&self) -> RegisterServiceRequest {
        RegisterServiceRequest {
            org_name: self.identity.org_name.clone(),
            system_name: self.identity.system_name.clone(),
            service_name: self.identity.service_name.clone(),
            instance_id: self.identity.instance_id.clone(),
            gateway_uri: self.gateway_uri.clone(),
            service_uri: self.service_uri.clone(),
            routes: self.routes.clone(),
            listen_queue: self.listen_queue.clone(),
            publish_queue: self.publish_queue.clone(),
            exchange: self.exchange.clone(),
            retry_count: self.retry_count,
            // whole seconds on the wire, never rounded down to zero
            timeout_seconds: self.timeout.as_secs().max(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientState {
    Unregistered,
    Registered(ServiceHandle),
    Running(ServiceHandle),
    Stopped(ServiceHandle),
}

impl ClientState {
    pub fn name(&self) -> &'static str {
        match self {
            ClientState::Unregistered => "unregistered",
            ClientState::Registered(_) => "registered",
            ClientState::Running(_) => "running",
            ClientState::Stopped(_) => "stopped",
        }
    }

    pub fn handle(&self) -> Option<&ServiceHandle> {
        match self {
            ClientState::Unregistered => None,
            ClientState::Registered(h) | ClientState::Running(h) | ClientState::Stopped(h) => {
                Some(h)
            }
        }
    }
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A service's connection to the messaging fabric.
///
/// Safe to share behind an `Arc`: publishes only read the current handle, so
/// any number of tasks may publish concurrently. Lifecycle calls are
/// serialised against each other.
pub struct MsgBusClient {
    descriptor: RegistrationDescriptor,
    transport: Arc<dyn GatewayTransport>,
    state: RwLock<ClientState>,
    base_key: RoutingKeyBuilder,
}

impl MsgBusClient {
    /// Connect to the gateway over NATS. No registration happens here.
    ///
    /// Callers should treat an error as fatal: a service without its fabric
    /// cannot do useful work.
    pub async fn connect(
        descriptor: RegistrationDescriptor,
        gateway_subject: &str,
    ) -> BusResult<Self> {
        let gateway = NatsGateway::connect(&descriptor.gateway_uri, gateway_subject).await?;
        Ok(Self::with_nats_gateway(descriptor, gateway, gateway_subject))
    }

    /// Build a client over an existing NATS connection, so a service can
    /// share one connection between its gateway calls and its listener.
    pub fn with_nats(
        descriptor: RegistrationDescriptor,
        nats: async_nats::Client,
        gateway_subject: &str,
    ) -> Self {
        Self::with_nats_gateway(descriptor, NatsGateway::new(nats, gateway_subject), gateway_subject)
    }

    fn with_nats_gateway(
        descriptor: RegistrationDescriptor,
        gateway: NatsGateway,
        gateway_subject: &str,
    ) -> Self {
        info!(
            gateway = %descriptor.gateway_uri,
            subject = %gateway_subject,
            service = %descriptor.identity.service_name,
            "connected to message bus gateway"
        );
        Self::with_transport(descriptor, Arc::new(gateway))
    }

    /// Build a client over an existing transport
    pub fn with_transport(
        descriptor: RegistrationDescriptor,
        transport: Arc<dyn GatewayTransport>,
    ) -> Self {
        let base_key = descriptor.identity.base_routing_key();
        Self {
            descriptor,
            transport,
            state: RwLock::new(ClientState::Unregistered),
            base_key,
        }
    }

    pub fn descriptor(&self) -> &RegistrationDescriptor {
        &self.descriptor
    }

    pub fn identity(&self) -> &ServiceIdentity {
        &self.descriptor.identity
    }

    pub async fn state(&self) -> ClientState {
        self.state.read().await.clone()
    }

    /// Builder pre-filled with this service's org/system/service
    pub fn base_routing_key(&self) -> RoutingKeyBuilder {
        self.base_key.clone()
    }

    async fn bounded<T, F>(&self, operation: &'static str, call: F) -> BusResult<T>
    where
        F: Future<Output = BusResult<T>>,
    {
        let timeout = self.descriptor.timeout;
        match tokio::time::timeout(timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(BusError::Timeout { operation, timeout }),
        }
    }

    /// Register identity and routes with the gateway.
    ///
    /// Anything but `REGISTERED` is returned as [`BusError::RegistrationError`];
    /// nothing is retried here.
    pub async fn register(&self) -> BusResult<ServiceHandle> {
        let mut state = self.state.write().await;
        if !matches!(*state, ClientState::Unregistered) {
            return Err(BusError::InvalidState {
                operation: "register",
                state: state.name(),
            });
        }

        let identity = &self.descriptor.identity;
        let resp = self
            .bounded("register", self.transport.register(self.descriptor.to_request()))
            .await?;

        if resp.state != RegistrationState::Registered || resp.service_uuid.is_empty() {
            return Err(BusError::RegistrationError {
                service: identity.service_name.clone(),
                state: resp.state,
            });
        }

        let handle = ServiceHandle::new(resp.service_uuid);
        info!(
            service = %identity.service_name,
            system = %identity.system_name,
            instance_id = %identity.instance_id,
            service_uuid = %handle,
            routes = self.descriptor.routes.len(),
            "registered with gateway"
        );
        *state = ClientState::Registered(handle.clone());
        Ok(handle)
    }

    /// Activate the listener session, then announce the service as up.
    ///
    /// The status publish is attempted exactly once per transition into
    /// `Running`; its failure is logged, not returned. Calling `start` on a
    /// running client is a no-op.
    pub async fn start(&self) -> BusResult<()> {
        let handle = {
            let mut state = self.state.write().await;
            let handle = match &*state {
                ClientState::Registered(h) | ClientState::Stopped(h) => h.clone(),
                ClientState::Running(_) => return Ok(()),
                ClientState::Unregistered => {
                    return Err(BusError::InvalidState {
                        operation: "start",
                        state: state.name(),
                    })
                }
            };

            self.bounded("start", self.transport.start_listener(&handle))
                .await?;
            *state = ClientState::Running(handle.clone());
            handle
        };

        info!(
            service = %self.descriptor.identity.service_name,
            service_uuid = %handle,
            "listener session started"
        );

        if let Err(e) = self.publish_service_status(SERVICE_UP).await {
            warn!(
                service = %self.descriptor.identity.service_name,
                error = %e,
                "failed to publish service status"
            );
        }
        Ok(())
    }

    /// Deactivate the listener session. The connection stays open so
    /// in-flight publishes can complete.
    pub async fn stop(&self) -> BusResult<()> {
        let mut state = self.state.write().await;
        let handle = match &*state {
            ClientState::Running(h) => h.clone(),
            other => {
                return Err(BusError::InvalidState {
                    operation: "stop",
                    state: other.name(),
                })
            }
        };

        self.bounded("stop", self.transport.stop_listener(&handle))
            .await?;
        info!(
            service = %self.descriptor.identity.service_name,
            service_uuid = %handle,
            "listener session stopped"
        );
        *state = ClientState::Stopped(handle);
        Ok(())
    }

    /// Drop the registration. The client can register again afterwards.
    pub async fn unregister(&self) -> BusResult<()> {
        let mut state = self.state.write().await;
        let handle = match state.handle() {
            Some(h) => h.clone(),
            None => {
                return Err(BusError::InvalidState {
                    operation: "unregister",
                    state: state.name(),
                })
            }
        };

        self.bounded("unregister", self.transport.unregister(&handle))
            .await?;
        info!(
            service = %self.descriptor.identity.service_name,
            service_uuid = %handle,
            "unregistered from gateway"
        );
        *state = ClientState::Unregistered;
        Ok(())
    }

    /// Wrap `msg` and hand it to the gateway.
    ///
    /// Resolves once the gateway has acknowledged receipt. Failures are
    /// logged with the routing key and a payload summary and returned; the
    /// message is never silently dropped.
    pub async fn publish_request<M: DomainMessage>(
        &self,
        routing_key: &RoutingKey,
        msg: &M,
    ) -> BusResult<()> {
        let payload = DynamicMessage::wrap(msg)?;
        self.publish_dynamic(routing_key, payload).await
    }

    /// Publish an already type-erased payload
    pub async fn publish_dynamic(
        &self,
        routing_key: &RoutingKey,
        payload: DynamicMessage,
    ) -> BusResult<()> {
        let handle = {
            let state = self.state.read().await;
            match state.handle() {
                Some(h) => h.clone(),
                None => {
                    return Err(BusError::InvalidState {
                        operation: "publish",
                        state: state.name(),
                    })
                }
            }
        };

        let summary = payload.summary();
        if self.descriptor.debug_mode {
            debug!(routing_key = %routing_key, payload = %summary, "publishing");
        }

        let req = PublishMsgRequest {
            service_uuid: handle,
            routing_key: routing_key.clone(),
            msg: payload,
        };

        match self.bounded("publish", self.transport.publish(req)).await {
            Ok(_) => Ok(()),
            Err(e) => {
                warn!(
                    routing_key = %routing_key,
                    payload = %summary,
                    error = %e,
                    "publish failed"
                );
                Err(e)
            }
        }
    }

    async fn publish_service_status(&self, status: &str) -> BusResult<()> {
        let key = self
            .base_routing_key()
            .set_object(SERVICE_OBJECT)
            .set_action(status)
            .build()?;
        let identity = &self.descriptor.identity;
        let event = ServiceStatus {
            org_name: identity.org_name.clone(),
            system_name: identity.system_name.clone(),
            service_name: identity.service_name.clone(),
            instance_id: identity.instance_id.clone(),
            status: status.to_string(),
            timestamp: Some(chrono::Utc::now()),
        };
        self.publish_request(&key, &event).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{InvoiceGenerated, ServiceStatus};
    use crate::inmemory_gateway::InMemoryGateway;

    fn descriptor(service: &str, timeout: Duration) -> RegistrationDescriptor {
        RegistrationDescriptor {
            identity: ServiceIdentity::new("acme", "billing", service, "billing-7f9c"),
            gateway_uri: "mem://gateway".into(),
            service_uri: format!("svc.{service}"),
            routes: vec![RoutingKeyPattern::parse("org.billing.invoice.create").unwrap()],
            listen_queue: format!("{service}-listen"),
            publish_queue: format!("{service}-publish"),
            exchange: "amq.topic".into(),
            retry_count: 3,
            timeout,
            debug_mode: false,
        }
    }

    fn client_on(gateway: &InMemoryGateway, service: &str) -> MsgBusClient {
        MsgBusClient::with_transport(
            descriptor(service, Duration::from_millis(500)),
            Arc::new(gateway.clone()),
        )
    }

    #[test]
    fn test_identity_from_pod_name() {
        let id = ServiceIdentity::from_pod_name("acme", "billing", "invoice", Some("invoice-0".into()));
        assert_eq!(id.instance_id, "invoice-0");

        let a = ServiceIdentity::from_pod_name("acme", "billing", "invoice", None);
        let b = ServiceIdentity::from_pod_name("acme", "billing", "invoice", Some("  ".into()));
        assert!(Uuid::parse_str(&a.instance_id).is_ok());
        assert_ne!(a.instance_id, b.instance_id);
    }

    #[test]
    fn test_timeout_rounds_up_to_one_second() {
        let req = descriptor("invoice", Duration::from_millis(500)).to_request();
        assert_eq!(req.timeout_seconds, 1);
        assert_eq!(req.exchange, "amq.topic");
        assert_eq!(req.instance_id, "billing-7f9c");
    }

    #[tokio::test]
    async fn test_lifecycle_transitions() {
        let gateway = InMemoryGateway::new();
        let client = client_on(&gateway, "invoice");
        assert_eq!(client.state().await, ClientState::Unregistered);

        let handle = client.register().await.unwrap();
        assert_eq!(client.state().await, ClientState::Registered(handle.clone()));
        assert_eq!(
            gateway.registration(&handle).await.unwrap().service_name,
            "invoice"
        );

        client.start().await.unwrap();
        assert!(gateway.is_listening(&handle).await);

        client.stop().await.unwrap();
        assert_eq!(client.state().await, ClientState::Stopped(handle.clone()));
        assert!(!gateway.is_listening(&handle).await);

        client.start().await.unwrap();
        assert_eq!(client.state().await, ClientState::Running(handle.clone()));

        client.unregister().await.unwrap();
        assert_eq!(client.state().await, ClientState::Unregistered);
        assert!(gateway.registration(&handle).await.is_none());
    }

    #[tokio::test]
    async fn test_illegal_transitions_rejected() {
        let gateway = InMemoryGateway::new();
        let client = client_on(&gateway, "invoice");

        let err = client.start().await.unwrap_err();
        assert!(matches!(err, BusError::InvalidState { operation: "start", .. }));
        assert!(client.stop().await.is_err());
        assert!(client.unregister().await.is_err());

        let key = client.base_routing_key().set_object("invoice").set_action("generate").must_build();
        let err = client
            .publish_request(&key, &InvoiceGenerated::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::InvalidState { operation: "publish", state: "unregistered" }));

        client.register().await.unwrap();
        assert!(client.register().await.is_err());
        assert!(client.stop().await.is_err());
    }

    #[tokio::test]
    async fn test_rejected_registration_is_an_error() {
        let gateway = InMemoryGateway::new();
        gateway.reject_service("invoice").await;
        let client = client_on(&gateway, "invoice");

        match client.register().await {
            Err(BusError::RegistrationError { service, state }) => {
                assert_eq!(service, "invoice");
                assert_eq!(state, RegistrationState::Rejected);
            }
            other => panic!("expected registration error, got {other:?}"),
        }
        assert_eq!(client.state().await, ClientState::Unregistered);
    }

    #[tokio::test]
    async fn test_start_publishes_exactly_one_service_up() {
        let gateway = InMemoryGateway::new();
        let client = client_on(&gateway, "invoice");
        let handle = client.register().await.unwrap();

        client.start().await.unwrap();
        // already running: no second announcement
        client.start().await.unwrap();

        let published = gateway.published().await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].service_uuid, handle);
        assert_eq!(
            published[0].envelope.routing_key.as_str(),
            "event.cloud.local.acme.billing.invoice.service.up"
        );
        let status: ServiceStatus = published[0].envelope.msg.unwrap_into().unwrap();
        assert_eq!(status.status, "up");
        assert_eq!(status.instance_id, "billing-7f9c");
        assert!(status.timestamp.is_some());
    }

    #[tokio::test]
    async fn test_start_succeeds_when_service_up_publish_fails() {
        let gateway = InMemoryGateway::new();
        let client = client_on(&gateway, "invoice");
        let handle = client.register().await.unwrap();
        gateway.fail_publishes(true).await;

        client.start().await.unwrap();

        assert_eq!(client.state().await, ClientState::Running(handle.clone()));
        assert!(gateway.is_listening(&handle).await);
        assert!(gateway.published().await.is_empty());
    }

    #[tokio::test]
    async fn test_each_restart_announces_once() {
        let gateway = InMemoryGateway::new();
        let client = client_on(&gateway, "invoice");
        client.register().await.unwrap();

        client.start().await.unwrap();
        client.stop().await.unwrap();
        client.start().await.unwrap();

        assert_eq!(gateway.published().await.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_timeout_leaves_client_usable() {
        let gateway = InMemoryGateway::new();
        let client = client_on(&gateway, "invoice");
        client.register().await.unwrap();

        let key = client.base_routing_key().set_object("invoice").set_action("generate").must_build();

        gateway.set_latency(Some(Duration::from_secs(5))).await;
        let err = client
            .publish_request(&key, &InvoiceGenerated::default())
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(matches!(err, BusError::Timeout { operation: "publish", .. }));

        gateway.set_latency(None).await;
        client
            .publish_request(&key, &InvoiceGenerated::default())
            .await
            .unwrap();
        assert!(matches!(client.state().await, ClientState::Registered(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_register_timeout_keeps_unregistered() {
        let gateway = InMemoryGateway::new();
        gateway.set_latency(Some(Duration::from_secs(5))).await;
        let client = client_on(&gateway, "invoice");

        assert!(client.register().await.unwrap_err().is_timeout());
        assert_eq!(client.state().await, ClientState::Unregistered);
    }

    #[tokio::test]
    async fn test_concurrent_publishes_both_succeed() {
        let gateway = InMemoryGateway::new();
        let client = Arc::new(client_on(&gateway, "invoice"));
        client.register().await.unwrap();

        let key = client.base_routing_key().set_object("invoice").set_action("generate").must_build();
        let first = InvoiceGenerated {
            id: "inv-1".into(),
            amount_cents: 1000,
            ..Default::default()
        };
        let second = InvoiceGenerated {
            id: "inv-2".into(),
            amount_cents: 2500,
            ..Default::default()
        };

        let (a, b) = tokio::join!(
            client.publish_request(&key, &first),
            client.publish_request(&key, &second)
        );
        a.unwrap();
        b.unwrap();

        let mut ids: Vec<InvoiceGenerated> = gateway
            .published()
            .await
            .iter()
            .map(|r| r.envelope.msg.unwrap_into().unwrap())
            .collect();
        ids.sort_by(|x, y| x.id.cmp(&y.id));
        assert_eq!(ids, vec![first, second]);
    }

    #[tokio::test]
    async fn test_with_nats_uses_the_given_connection() {
        // Nothing listens on port 1; the connection keeps retrying in the background
        let nats = async_nats::ConnectOptions::new()
            .retry_on_initial_connect()
            .connect("nats://127.0.0.1:1")
            .await
            .unwrap();
        let client = MsgBusClient::with_nats(
            descriptor("invoice", Duration::from_millis(100)),
            nats,
            "msgclient",
        );

        assert_eq!(client.state().await, ClientState::Unregistered);
        assert!(client.register().await.is_err());
        assert_eq!(client.state().await, ClientState::Unregistered);
    }
}
