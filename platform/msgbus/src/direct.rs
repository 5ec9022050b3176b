//! # Direct Publisher
//!
//! Publishes straight to the broker's HTTP management API, bypassing the
//! gateway. Meant for diagnostic and event-replay tooling that has no
//! registered service identity.
//!
//! There is no registration and no retry on this path, and the caller must
//! already know the exchange topology. Service-to-service traffic goes
//! through [`MsgBusClient`](crate::MsgBusClient) instead.

use crate::config::BrokerAdminConfig;
use crate::envelope::{CodecError, Envelope};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum DirectPublishError {
    #[error("invalid broker admin url: {0}")]
    InvalidUrl(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("broker API error (status {status}): {error}: {reason}")]
    Api {
        status: u16,
        error: String,
        reason: String,
    },

    #[error("unexpected response body: {0}")]
    Decode(String),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl DirectPublishError {
    /// 4xx from the broker, e.g. bad credentials or unknown exchange
    pub fn is_client_error(&self) -> bool {
        matches!(self, DirectPublishError::Api { status, .. } if (400..500).contains(status))
    }
}

/// Message body for a direct publish
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectPayload {
    /// Sent as-is with `payload_encoding: "string"`
    Text(String),
    /// Sent base64-encoded with `payload_encoding: "base64"`
    Binary(Vec<u8>),
}

impl DirectPayload {
    fn encode(&self) -> (String, &'static str) {
        match self {
            DirectPayload::Text(text) => (text.clone(), "string"),
            DirectPayload::Binary(bytes) => (BASE64.encode(bytes), "base64"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PublishAck {
    /// Whether the broker found at least one queue bound to the key
    pub routed: bool,
}

#[derive(Serialize)]
struct PublishBody<'a> {
    properties: HashMap<String, String>,
    routing_key: &'a str,
    payload: String,
    payload_encoding: &'static str,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct ApiErrorBody {
    error: String,
    reason: String,
}

/// HTTP client for the broker management API
#[derive(Clone)]
pub struct BrokerAdminClient {
    config: Arc<BrokerAdminConfig>,
    base_url: Url,
    http_client: Client,
}

impl BrokerAdminClient {
    pub fn new(config: BrokerAdminConfig) -> Result<Self, DirectPublishError> {
        let base_url = Url::parse(&config.admin_url)
            .map_err(|e| DirectPublishError::InvalidUrl(format!("{}: {e}", config.admin_url)))?;
        if base_url.cannot_be_a_base() {
            return Err(DirectPublishError::InvalidUrl(config.admin_url.clone()));
        }

        let http_client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| DirectPublishError::Http(e.to_string()))?;

        Ok(Self {
            config: Arc::new(config),
            base_url,
            http_client,
        })
    }

    pub fn from_env() -> Result<Self, DirectPublishError> {
        let config = BrokerAdminConfig::from_env()
            .map_err(|e| DirectPublishError::InvalidUrl(e.to_string()))?;
        Self::new(config)
    }

    /// `{base}/api/exchanges/{vhost}/{exchange}/publish`, each segment
    /// percent-encoded (the default vhost `/` becomes `%2F`)
    fn publish_url(&self, vhost: &str, exchange: &str) -> Result<Url, DirectPublishError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| DirectPublishError::InvalidUrl(self.config.admin_url.clone()))?
            .pop_if_empty()
            .extend(["api", "exchanges", vhost, exchange, "publish"]);
        Ok(url)
    }

    /// Publish one message to `exchange` in `vhost`.
    ///
    /// Any status outside 2xx/3xx is an error; the broker's `{error, reason}`
    /// body is decoded when present.
    pub async fn publish_message(
        &self,
        vhost: &str,
        exchange: &str,
        routing_key: &str,
        payload: &DirectPayload,
    ) -> Result<PublishAck, DirectPublishError> {
        let url = self.publish_url(vhost, exchange)?;
        let (payload, payload_encoding) = payload.encode();
        let body = PublishBody {
            properties: HashMap::new(),
            routing_key,
            payload,
            payload_encoding,
        };

        debug!(url = %url, routing_key = %routing_key, "direct publish");

        let response = self
            .http_client
            .post(url)
            .basic_auth(&self.config.user, Some(&self.config.password))
            .json(&body)
            .send()
            .await
            .map_err(|e| DirectPublishError::Http(e.to_string()))?;

        let status = response.status();
        if status.is_success() || status.is_redirection() {
            let ack = response
                .json::<PublishAck>()
                .await
                .map_err(|e| DirectPublishError::Decode(e.to_string()))?;
            if !ack.routed {
                warn!(exchange = %exchange, routing_key = %routing_key, "message not routed");
            }
            return Ok(ack);
        }

        let text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unable to read error response".to_string());
        let parsed = serde_json::from_str::<ApiErrorBody>(&text).unwrap_or_else(|_| ApiErrorBody {
            error: text.clone(),
            reason: String::new(),
        });

        Err(DirectPublishError::Api {
            status: status.as_u16(),
            error: parsed.error,
            reason: parsed.reason,
        })
    }

    /// Publish a full envelope as a base64 payload on its own routing key
    pub async fn publish_envelope(
        &self,
        vhost: &str,
        exchange: &str,
        envelope: &Envelope,
    ) -> Result<PublishAck, DirectPublishError> {
        let payload = DirectPayload::Binary(envelope.to_bytes()?);
        self.publish_message(vhost, exchange, envelope.routing_key.as_str(), &payload)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NodeOnline;
    use crate::routing_key::RoutingKey;
    use axum::extract::{Path, State};
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{json, Value};
    use std::time::Duration;
    use tokio::sync::Mutex;

    #[derive(Clone, Default)]
    struct MockBroker {
        received: Arc<Mutex<Vec<(String, String, Value)>>>,
    }

    async fn publish_handler(
        State(broker): State<MockBroker>,
        Path((vhost, exchange)): Path<(String, String)>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> (StatusCode, Json<Value>) {
        let expected = format!("Basic {}", BASE64.encode("guest:secret"));
        let auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if auth != expected {
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": "not_authorised", "reason": "Login failed"})),
            );
        }
        if exchange != "amq.topic" {
            return (
                StatusCode::NOT_FOUND,
                Json(json!({"error": "Object Not Found", "reason": "Not Found"})),
            );
        }

        let routed = body["routing_key"]
            .as_str()
            .map(|k| k.starts_with("event."))
            .unwrap_or(false);
        broker.received.lock().await.push((vhost, exchange, body));
        (StatusCode::OK, Json(json!({ "routed": routed })))
    }

    async fn spawn_broker() -> (MockBroker, String) {
        let broker = MockBroker::default();
        let app = Router::new()
            .route("/api/exchanges/{vhost}/{exchange}/publish", post(publish_handler))
            .with_state(broker.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (broker, format!("http://{addr}"))
    }

    fn client(url: &str, password: &str) -> BrokerAdminClient {
        BrokerAdminClient::new(BrokerAdminConfig {
            admin_url: url.to_string(),
            user: "guest".into(),
            password: password.into(),
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[test]
    fn test_publish_url_encodes_default_vhost() {
        let c = client("http://broker:15672", "secret");
        let url = c.publish_url("/", "amq.topic").unwrap();
        assert_eq!(url.as_str(), "http://broker:15672/api/exchanges/%2F/amq.topic/publish");

        let c = client("http://broker:15672/admin/", "secret");
        let url = c.publish_url("prod", "amq.topic").unwrap();
        assert_eq!(url.as_str(), "http://broker:15672/admin/api/exchanges/prod/amq.topic/publish");
    }

    #[test]
    fn test_invalid_url_rejected() {
        let err = BrokerAdminClient::new(BrokerAdminConfig {
            admin_url: "not a url".into(),
            user: "guest".into(),
            password: "guest".into(),
            timeout: Duration::from_secs(1),
        })
        .err()
        .unwrap();
        assert!(matches!(err, DirectPublishError::InvalidUrl(_)));
    }

    #[tokio::test]
    async fn test_publish_text_message() {
        let (broker, url) = spawn_broker().await;
        let ack = client(&url, "secret")
            .publish_message("/", "amq.topic", "event.cloud.local.acme.ops.tool.replay.run", &DirectPayload::Text("hello".into()))
            .await
            .unwrap();
        assert!(ack.routed);

        let received = broker.received.lock().await;
        let (vhost, exchange, body) = &received[0];
        assert_eq!(vhost, "/");
        assert_eq!(exchange, "amq.topic");
        assert_eq!(body["payload"], "hello");
        assert_eq!(body["payload_encoding"], "string");
        assert_eq!(body["properties"], json!({}));
    }

    #[tokio::test]
    async fn test_publish_envelope_as_base64() {
        let (broker, url) = spawn_broker().await;
        let key = RoutingKey::parse("event.cloud.local.acme.messaging.mesh.node.online").unwrap();
        let envelope = Envelope::wrap(
            key,
            &NodeOnline {
                node_id: "uk-sa2341-hnode-v0-a1a0".into(),
                ..Default::default()
            },
        )
        .unwrap();

        let ack = client(&url, "secret")
            .publish_envelope("/", "amq.topic", &envelope)
            .await
            .unwrap();
        assert!(ack.routed);

        let received = broker.received.lock().await;
        let body = &received[0].2;
        assert_eq!(body["routing_key"], envelope.routing_key.as_str());
        assert_eq!(body["payload_encoding"], "base64");
        let bytes = BASE64.decode(body["payload"].as_str().unwrap()).unwrap();
        assert_eq!(Envelope::from_bytes(&bytes).unwrap(), envelope);
    }

    #[tokio::test]
    async fn test_unrouted_message_is_not_an_error() {
        let (_broker, url) = spawn_broker().await;
        let ack = client(&url, "secret")
            .publish_message("/", "amq.topic", "diag.ping", &DirectPayload::Binary(vec![1, 2, 3]))
            .await
            .unwrap();
        assert!(!ack.routed);
    }

    #[tokio::test]
    async fn test_api_errors_are_decoded() {
        let (_broker, url) = spawn_broker().await;

        let err = client(&url, "wrong")
            .publish_message("/", "amq.topic", "event.x", &DirectPayload::Text("x".into()))
            .await
            .unwrap_err();
        match &err {
            DirectPublishError::Api { status, error, reason } => {
                assert_eq!(*status, 401);
                assert_eq!(error, "not_authorised");
                assert_eq!(reason, "Login failed");
            }
            other => panic!("expected API error, got {other:?}"),
        }
        assert!(err.is_client_error());

        let err = client(&url, "secret")
            .publish_message("/", "missing", "event.x", &DirectPayload::Text("x".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, DirectPublishError::Api { status: 404, .. }));
    }
}
