//! Inbound push session
//!
//! The gateway delivers envelopes as NATS requests on the service's callback
//! subject and waits for a JSON [`Reply<Ack>`](msgbus::Reply). The listener
//! answers each request with the outcome of
//! [`EventNotificationService::event_notification`].

use futures::StreamExt;
use msgbus::retry::{retry_with_backoff, RetryConfig};
use msgbus::{Ack, Envelope, EventNotificationService, Reply};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Resubscription policy after the subscription stream ends
pub fn default_resubscribe_policy() -> RetryConfig {
    RetryConfig {
        max_attempts: 8,
        ..RetryConfig::default()
    }
    .with_jitter()
}

/// Decode one pushed request body and dispatch it
pub async fn process_push(service: &dyn EventNotificationService, payload: &[u8]) -> Reply<Ack> {
    let envelope = match Envelope::from_bytes(payload) {
        Ok(envelope) => envelope,
        Err(e) => {
            error!(error = %e, bytes = payload.len(), "Failed to decode pushed envelope");
            return Reply::Error(e.to_string());
        }
    };

    let routing_key = envelope.routing_key.clone();
    match service.event_notification(envelope).await {
        Ok(ack) => Reply::Ok(ack),
        Err(e) => {
            warn!(routing_key = %routing_key, error = %e, "Event notification failed");
            Reply::Error(e.to_string())
        }
    }
}

/// Background task serving the gateway's pushes for one service.
///
/// When the subscription stream ends (for example after the NATS client gave
/// up on a connection) the listener subscribes again, backing off
/// exponentially with jitter. It exits when resubscription is exhausted or
/// when [`stop`](Self::stop) is called.
pub struct NotificationListener {
    subject: String,
    stop_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl NotificationListener {
    /// Start serving `subject`. With a `queue`, instances of the same service
    /// share the load instead of each receiving every push.
    pub fn spawn(
        client: async_nats::Client,
        subject: impl Into<String>,
        queue: Option<String>,
        service: Arc<dyn EventNotificationService>,
        resubscribe: RetryConfig,
    ) -> Self {
        let subject = subject.into();
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let task_subject = subject.clone();

        let handle = tokio::spawn(async move {
            let subject = task_subject;

            'session: loop {
                let subscribe = retry_with_backoff(
                    || {
                        let client = client.clone();
                        let subject = subject.clone();
                        let queue = queue.clone();
                        async move {
                            match queue {
                                Some(group) => client.queue_subscribe(subject, group).await,
                                None => client.subscribe(subject).await,
                            }
                            .map_err(|e| e.to_string())
                        }
                    },
                    &resubscribe,
                    "notification_listener_subscribe",
                );

                let mut subscriber = tokio::select! {
                    _ = &mut stop_rx => break 'session,
                    result = subscribe => match result {
                        Ok(s) => s,
                        Err(e) => {
                            error!(subject = %subject, error = %e, "Failed to subscribe, listener exiting");
                            break 'session;
                        }
                    },
                };

                info!(subject = %subject, "Listening for event notifications");

                loop {
                    tokio::select! {
                        _ = &mut stop_rx => {
                            if let Err(e) = subscriber.unsubscribe().await {
                                warn!(subject = %subject, error = %e, "Failed to unsubscribe");
                            }
                            break 'session;
                        }
                        next = subscriber.next() => {
                            let Some(msg) = next else {
                                warn!(subject = %subject, "Subscription ended, resubscribing");
                                continue 'session;
                            };

                            let reply = process_push(service.as_ref(), &msg.payload).await;
                            let Some(inbox) = msg.reply else {
                                debug!(subject = %subject, "Push without reply subject");
                                continue;
                            };
                            match serde_json::to_vec(&reply) {
                                Ok(body) => {
                                    if let Err(e) = client.publish(inbox, body.into()).await {
                                        warn!(subject = %subject, error = %e, "Failed to send reply");
                                    }
                                }
                                Err(e) => error!(error = %e, "Failed to encode reply"),
                            }
                        }
                    }
                }
            }

            info!(subject = %subject, "Notification listener stopped");
        });

        Self {
            subject,
            stop_tx,
            handle,
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Signal the listener and wait until it has exited
    pub async fn stop(self) {
        let _ = self.stop_tx.send(());
        if let Err(e) = self.handle.await {
            warn!(subject = %self.subject, error = %e, "Notification listener panicked");
        }
    }
}
