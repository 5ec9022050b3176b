//! Inbound envelope router

use crate::handler_table::HandlerTable;
use async_trait::async_trait;
use msgbus::{Ack, DispatchError, Envelope, EventNotificationService};
use std::sync::Arc;
use tracing::{debug, error, Instrument};

/// Routes each pushed envelope to its handler.
///
/// - unknown routing key: logged at error level, acknowledged
/// - payload that does not decode into the handler's type: [`DispatchError::Decode`]
/// - handler failure: [`DispatchError::Handler`]
///
/// The table is read-only, so concurrent deliveries need no locking.
#[derive(Clone)]
pub struct EventDispatcher {
    service: String,
    table: Arc<HandlerTable>,
}

impl EventDispatcher {
    pub fn new(service: impl Into<String>, table: HandlerTable) -> Self {
        Self {
            service: service.into(),
            table: Arc::new(table),
        }
    }

    pub fn table(&self) -> &HandlerTable {
        &self.table
    }

    pub async fn dispatch(&self, envelope: Envelope) -> Result<Ack, DispatchError> {
        let Envelope { routing_key, msg } = envelope;

        let Some(handler) = self.table.lookup(&routing_key) else {
            error!(
                service = %self.service,
                routing_key = %routing_key,
                payload = %msg.summary(),
                "No handler for routing key"
            );
            return Ok(Ack {});
        };

        let span = tracing::info_span!(
            "dispatch",
            service = %self.service,
            routing_key = %routing_key,
            payload_type = %msg.type_name(),
        );

        async {
            let fut = handler
                .prepare(routing_key.clone(), &msg)
                .map_err(|source| {
                    error!(error = %source, "failed to decode payload");
                    DispatchError::Decode {
                        routing_key: routing_key.clone(),
                        source,
                    }
                })?;

            fut.await.map_err(|source| {
                error!(error = %source, "handler failed");
                DispatchError::Handler {
                    routing_key: routing_key.clone(),
                    source,
                }
            })?;

            debug!("event handled");
            Ok::<_, DispatchError>(Ack {})
        }
        .instrument(span)
        .await
    }
}

#[async_trait]
impl EventNotificationService for EventDispatcher {
    async fn event_notification(&self, envelope: Envelope) -> Result<Ack, DispatchError> {
        self.dispatch(envelope).await
    }
}
