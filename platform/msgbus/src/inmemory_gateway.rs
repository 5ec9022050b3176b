//! In-memory implementation of the gateway for testing and development

use crate::envelope::Envelope;
use crate::gateway::{
    Ack, EventNotificationService, GatewayTransport, PublishMsgRequest, RegisterServiceRequest,
    RegisterServiceResponse, RegistrationState, ServiceHandle,
};
use crate::{BusError, BusResult};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

/// A message accepted by [`InMemoryGateway::publish`]
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedRecord {
    pub service_uuid: ServiceHandle,
    pub envelope: Envelope,
}

struct RegisteredService {
    request: RegisterServiceRequest,
    listening: bool,
}

#[derive(Default)]
struct GatewayState {
    services: HashMap<ServiceHandle, RegisteredService>,
    endpoints: HashMap<String, Arc<dyn EventNotificationService>>,
    rejected_services: HashSet<String>,
    published: Vec<PublishedRecord>,
    fail_publishes: bool,
    latency: Option<Duration>,
    deliveries: Vec<JoinHandle<()>>,
}

/// Gateway implementation that keeps everything in process
///
/// This implementation is suitable for:
/// - Unit and integration tests (no broker, no NATS)
/// - Local development of a single service
///
/// Behaves like the real gateway: registrations are remembered, publishes are
/// acknowledged as soon as they are recorded, and delivery to every listening
/// service whose routes match the key happens on a separate task, retried up
/// to the subscriber's registered `retry_count`.
///
/// Inbound endpoints are attached by callback URI with
/// [`attach`](Self::attach), standing in for the network hop to the service.
#[derive(Clone, Default)]
pub struct InMemoryGateway {
    state: Arc<Mutex<GatewayState>>,
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route pushes for `service_uri` to `endpoint`
    pub async fn attach(&self, service_uri: &str, endpoint: Arc<dyn EventNotificationService>) {
        self.state
            .lock()
            .await
            .endpoints
            .insert(service_uri.to_string(), endpoint);
    }

    /// Answer future registrations for `service_name` with `REJECTED`
    pub async fn reject_service(&self, service_name: &str) {
        self.state
            .lock()
            .await
            .rejected_services
            .insert(service_name.to_string());
    }

    /// Delay every call by `latency`
    pub async fn set_latency(&self, latency: Option<Duration>) {
        self.state.lock().await.latency = latency;
    }

    /// Refuse every publish while set
    pub async fn fail_publishes(&self, fail: bool) {
        self.state.lock().await.fail_publishes = fail;
    }

    pub async fn published(&self) -> Vec<PublishedRecord> {
        self.state.lock().await.published.clone()
    }

    pub async fn registration(&self, handle: &ServiceHandle) -> Option<RegisterServiceRequest> {
        self.state
            .lock()
            .await
            .services
            .get(handle)
            .map(|s| s.request.clone())
    }

    pub async fn is_listening(&self, handle: &ServiceHandle) -> bool {
        self.state
            .lock()
            .await
            .services
            .get(handle)
            .map(|s| s.listening)
            .unwrap_or(false)
    }

    /// Wait for every in-flight delivery, including ones started by handlers
    /// that publish in turn.
    pub async fn settle(&self) {
        loop {
            let pending = std::mem::take(&mut self.state.lock().await.deliveries);
            if pending.is_empty() {
                return;
            }
            for delivery in pending {
                if let Err(e) = delivery.await {
                    warn!(error = %e, "InMemoryGateway: delivery task panicked");
                }
            }
        }
    }

    async fn simulate_latency(&self) {
        let latency = self.state.lock().await.latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn unknown(handle: &ServiceHandle) -> BusError {
        BusError::GatewayError(format!("unknown service {handle}"))
    }
}

async fn deliver(
    endpoint: Arc<dyn EventNotificationService>,
    envelope: Envelope,
    service_name: String,
    retry_count: u32,
) {
    for attempt in 0..=retry_count {
        match endpoint.event_notification(envelope.clone()).await {
            Ok(_) => {
                debug!(
                    service = %service_name,
                    routing_key = %envelope.routing_key,
                    attempt,
                    "delivered"
                );
                return;
            }
            Err(e) => {
                warn!(
                    service = %service_name,
                    routing_key = %envelope.routing_key,
                    attempt,
                    error = %e,
                    "delivery failed"
                );
            }
        }
    }
    warn!(
        service = %service_name,
        routing_key = %envelope.routing_key,
        retry_count,
        "delivery abandoned after retries"
    );
}

#[async_trait]
impl GatewayTransport for InMemoryGateway {
    async fn register(&self, req: RegisterServiceRequest) -> BusResult<RegisterServiceResponse> {
        self.simulate_latency().await;
        let mut state = self.state.lock().await;

        if state.rejected_services.contains(&req.service_name) {
            return Ok(RegisterServiceResponse {
                state: RegistrationState::Rejected,
                service_uuid: String::new(),
            });
        }

        let handle = ServiceHandle::new(Uuid::new_v4().to_string());
        state.services.insert(
            handle.clone(),
            RegisteredService {
                request: req,
                listening: false,
            },
        );

        Ok(RegisterServiceResponse {
            state: RegistrationState::Registered,
            service_uuid: handle.as_str().to_string(),
        })
    }

    async fn start_listener(&self, handle: &ServiceHandle) -> BusResult<()> {
        self.simulate_latency().await;
        let mut state = self.state.lock().await;
        let service = state
            .services
            .get_mut(handle)
            .ok_or_else(|| Self::unknown(handle))?;
        service.listening = true;
        Ok(())
    }

    async fn stop_listener(&self, handle: &ServiceHandle) -> BusResult<()> {
        self.simulate_latency().await;
        let mut state = self.state.lock().await;
        let service = state
            .services
            .get_mut(handle)
            .ok_or_else(|| Self::unknown(handle))?;
        service.listening = false;
        Ok(())
    }

    async fn unregister(&self, handle: &ServiceHandle) -> BusResult<()> {
        self.simulate_latency().await;
        self.state
            .lock()
            .await
            .services
            .remove(handle)
            .map(|_| ())
            .ok_or_else(|| Self::unknown(handle))
    }

    async fn publish(&self, req: PublishMsgRequest) -> BusResult<Ack> {
        self.simulate_latency().await;
        let mut state = self.state.lock().await;

        if !state.services.contains_key(&req.service_uuid) {
            return Err(Self::unknown(&req.service_uuid));
        }
        if state.fail_publishes {
            return Err(BusError::GatewayError("publish refused".to_string()));
        }

        let envelope = Envelope::new(req.routing_key, req.msg);
        state.published.push(PublishedRecord {
            service_uuid: req.service_uuid,
            envelope: envelope.clone(),
        });

        let targets: Vec<_> = state
            .services
            .values()
            .filter(|s| s.listening)
            .filter(|s| s.request.routes.iter().any(|r| r.matches(&envelope.routing_key)))
            .filter_map(|s| {
                state.endpoints.get(&s.request.service_uri).map(|endpoint| {
                    (
                        endpoint.clone(),
                        s.request.service_name.clone(),
                        s.request.retry_count,
                    )
                })
            })
            .collect();

        state.deliveries.retain(|d| !d.is_finished());
        for (endpoint, service_name, retry_count) in targets {
            let delivery = tokio::spawn(deliver(endpoint, envelope.clone(), service_name, retry_count));
            state.deliveries.push(delivery);
        }

        Ok(Ack {})
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::DynamicMessage;
    use crate::gateway::DispatchError;
    use crate::routing_key::{RoutingKey, RoutingKeyPattern};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Recorder {
        received: Mutex<Vec<Envelope>>,
        failures_left: AtomicU32,
    }

    impl Recorder {
        fn new(failures: u32) -> Arc<Self> {
            Arc::new(Self {
                received: Mutex::new(Vec::new()),
                failures_left: AtomicU32::new(failures),
            })
        }

        async fn keys(&self) -> Vec<String> {
            self.received
                .lock()
                .await
                .iter()
                .map(|e| e.routing_key.to_string())
                .collect()
        }
    }

    #[async_trait]
    impl EventNotificationService for Recorder {
        async fn event_notification(&self, envelope: Envelope) -> Result<Ack, DispatchError> {
            self.received.lock().await.push(envelope.clone());
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(DispatchError::Unroutable(envelope.routing_key));
            }
            Ok(Ack {})
        }
    }

    fn request(name: &str, uri: &str, routes: &[&str], retry_count: u32) -> RegisterServiceRequest {
        RegisterServiceRequest {
            org_name: "org".into(),
            system_name: "test".into(),
            service_name: name.into(),
            instance_id: "i-1".into(),
            gateway_uri: "mem://gateway".into(),
            service_uri: uri.into(),
            routes: routes.iter().map(|r| RoutingKeyPattern::parse(r).unwrap()).collect(),
            listen_queue: String::new(),
            publish_queue: String::new(),
            exchange: "amq.topic".into(),
            retry_count,
            timeout_seconds: 3,
        }
    }

    async fn registered(gateway: &InMemoryGateway, req: RegisterServiceRequest) -> ServiceHandle {
        let resp = gateway.register(req).await.unwrap();
        assert_eq!(resp.state, RegistrationState::Registered);
        ServiceHandle::new(resp.service_uuid)
    }

    fn publish_req(handle: &ServiceHandle, key: &str) -> PublishMsgRequest {
        PublishMsgRequest {
            service_uuid: handle.clone(),
            routing_key: RoutingKey::parse(key).unwrap(),
            msg: DynamicMessage::from_raw("type.msgbus/test.v1.Empty", b"{}".to_vec()),
        }
    }

    #[tokio::test]
    async fn test_wildcard_route_delivery() {
        let gateway = InMemoryGateway::new();
        let recorder = Recorder::new(0);
        gateway.attach("svc.registry", recorder.clone()).await;

        let subscriber =
            registered(&gateway, request("node-state", "svc.registry", &["org.registry.node.*"], 0)).await;
        gateway.start_listener(&subscriber).await.unwrap();

        let publisher = registered(&gateway, request("registry", "svc.pub", &[], 0)).await;
        gateway.publish(publish_req(&publisher, "org.registry.node.assign")).await.unwrap();
        gateway.publish(publish_req(&publisher, "org.registry.site.assign")).await.unwrap();
        gateway.settle().await;

        assert_eq!(recorder.keys().await, vec!["org.registry.node.assign"]);
        assert_eq!(gateway.published().await.len(), 2);
    }

    #[tokio::test]
    async fn test_no_delivery_until_listener_started() {
        let gateway = InMemoryGateway::new();
        let recorder = Recorder::new(0);
        gateway.attach("svc.a", recorder.clone()).await;

        let handle = registered(&gateway, request("a", "svc.a", &["org.#"], 0)).await;
        gateway.publish(publish_req(&handle, "org.one")).await.unwrap();
        gateway.settle().await;
        assert!(recorder.keys().await.is_empty());

        gateway.start_listener(&handle).await.unwrap();
        gateway.start_listener(&handle).await.unwrap();
        assert!(gateway.is_listening(&handle).await);
        gateway.publish(publish_req(&handle, "org.two")).await.unwrap();
        gateway.settle().await;
        assert_eq!(recorder.keys().await, vec!["org.two"]);

        gateway.stop_listener(&handle).await.unwrap();
        gateway.publish(publish_req(&handle, "org.three")).await.unwrap();
        gateway.settle().await;
        assert_eq!(recorder.keys().await, vec!["org.two"]);
    }

    #[tokio::test]
    async fn test_failed_delivery_is_retried_up_to_retry_count() {
        let gateway = InMemoryGateway::new();
        let recorder = Recorder::new(2);
        gateway.attach("svc.a", recorder.clone()).await;

        let handle = registered(&gateway, request("a", "svc.a", &["org.#"], 3)).await;
        gateway.start_listener(&handle).await.unwrap();
        gateway.publish(publish_req(&handle, "org.event")).await.unwrap();
        gateway.settle().await;

        // two failures, then success
        assert_eq!(recorder.keys().await.len(), 3);
    }

    #[tokio::test]
    async fn test_finished_deliveries_are_pruned_without_settle() {
        let gateway = InMemoryGateway::new();
        let recorder = Recorder::new(0);
        gateway.attach("svc.a", recorder.clone()).await;
        let handle = registered(&gateway, request("a", "svc.a", &["org.#"], 0)).await;
        gateway.start_listener(&handle).await.unwrap();

        for n in 0..5 {
            gateway.publish(publish_req(&handle, &format!("org.event{n}"))).await.unwrap();
            for _ in 0..100 {
                if gateway.state.lock().await.deliveries.iter().all(|d| d.is_finished()) {
                    break;
                }
                tokio::task::yield_now().await;
            }
        }

        assert_eq!(recorder.keys().await.len(), 5);
        assert_eq!(gateway.state.lock().await.deliveries.len(), 1);
    }

    #[tokio::test]
    async fn test_rejected_registration() {
        let gateway = InMemoryGateway::new();
        gateway.reject_service("rogue").await;
        let resp = gateway.register(request("rogue", "svc.r", &[], 0)).await.unwrap();
        assert_eq!(resp.state, RegistrationState::Rejected);
        assert!(resp.service_uuid.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_handle_is_an_error() {
        let gateway = InMemoryGateway::new();
        let ghost = ServiceHandle::new("ghost");
        assert!(gateway.start_listener(&ghost).await.is_err());
        assert!(gateway.publish(publish_req(&ghost, "org.x")).await.is_err());

        let handle = registered(&gateway, request("a", "svc.a", &[], 0)).await;
        gateway.unregister(&handle).await.unwrap();
        assert!(gateway.unregister(&handle).await.is_err());
        assert!(gateway.registration(&handle).await.is_none());
    }
}
