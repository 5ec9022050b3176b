//! NATS request/reply implementation of the gateway transport

use crate::gateway::{
    Ack, GatewayTransport, PublishMsgRequest, RegisterServiceRequest, RegisterServiceResponse,
    Reply, ServiceHandle, ServiceHandleRequest,
};
use crate::{BusError, BusResult};
use async_nats::Client;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

/// Gateway transport over NATS request/reply
///
/// Each gateway operation is a request on `{prefix}.{operation}` with a JSON
/// body; the gateway answers with a JSON [`Reply`]. The underlying
/// `async_nats::Client` is cheap to clone and safe to share, so one
/// `NatsGateway` serves every publisher in the process.
///
/// Reconnection after a mid-session partition is handled by the NATS client
/// itself; calls made while disconnected fail and surface as
/// [`BusError::GatewayError`] or [`BusError::Timeout`] to the caller.
///
/// # Example
/// ```rust,no_run
/// use msgbus::{GatewayTransport, NatsGateway, ServiceHandle};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let gateway = NatsGateway::connect("nats://localhost:4222", "msgclient").await?;
/// gateway.start_listener(&ServiceHandle::new("3f1c…")).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct NatsGateway {
    client: Client,
    subject_prefix: String,
}

impl NatsGateway {
    /// Create a transport from an already-connected client
    pub fn new(client: Client, subject_prefix: impl Into<String>) -> Self {
        Self {
            client,
            subject_prefix: subject_prefix.into(),
        }
    }

    /// Connect to the NATS server fronting the gateway
    pub async fn connect(url: &str, subject_prefix: &str) -> BusResult<Self> {
        let client = async_nats::connect(url)
            .await
            .map_err(|e| BusError::ConnectionError(format!("{url}: {e}")))?;
        Ok(Self::new(client, subject_prefix))
    }

    /// Get a reference to the underlying NATS client
    pub fn client(&self) -> &Client {
        &self.client
    }

    fn subject(&self, operation: &str) -> String {
        format!("{}.{}", self.subject_prefix, operation)
    }

    async fn call<Req, Resp>(&self, operation: &str, req: &Req) -> BusResult<Resp>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let subject = self.subject(operation);
        let body = serde_json::to_vec(req)
            .map_err(|e| BusError::GatewayError(format!("encode {operation} request: {e}")))?;

        debug!(subject = %subject, bytes = body.len(), "gateway request");

        let response = self
            .client
            .request(subject, body.into())
            .await
            .map_err(|e| BusError::GatewayError(format!("{operation}: {e}")))?;

        let reply: Reply<Resp> = serde_json::from_slice(&response.payload)
            .map_err(|e| BusError::GatewayError(format!("decode {operation} reply: {e}")))?;

        match reply {
            Reply::Ok(value) => Ok(value),
            Reply::Error(message) => Err(BusError::GatewayError(message)),
        }
    }
}

#[async_trait]
impl GatewayTransport for NatsGateway {
    async fn register(&self, req: RegisterServiceRequest) -> BusResult<RegisterServiceResponse> {
        self.call("register", &req).await
    }

    async fn start_listener(&self, handle: &ServiceHandle) -> BusResult<()> {
        let req = ServiceHandleRequest {
            service_uuid: handle.clone(),
        };
        self.call::<_, Ack>("start", &req).await.map(|_| ())
    }

    async fn stop_listener(&self, handle: &ServiceHandle) -> BusResult<()> {
        let req = ServiceHandleRequest {
            service_uuid: handle.clone(),
        };
        self.call::<_, Ack>("stop", &req).await.map(|_| ())
    }

    async fn unregister(&self, handle: &ServiceHandle) -> BusResult<()> {
        let req = ServiceHandleRequest {
            service_uuid: handle.clone(),
        };
        self.call::<_, Ack>("unregister", &req).await.map(|_| ())
    }

    async fn publish(&self, req: PublishMsgRequest) -> BusResult<Ack> {
        self.call("publish", &req).await
    }
}
