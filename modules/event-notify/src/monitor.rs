//! Policy monitor
//!
//! Ticks on a fixed period and republishes every notification that has not
//! been announced yet on the catalogue's `notification.store` route.

use crate::store::{Notification, NotificationStore};
use msgbus::events::{NotificationStored, EVENT_NOTIFICATION_STORE};
use msgbus::{prepare_route, BusError, MsgBusClient, PeriodicTask, RoutingKey, RoutingKeyError};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("invalid notification routing key: {0}")]
    RoutingKey(#[from] RoutingKeyError),

    #[error("notification route {0} is not an exact key")]
    NotExact(String),

    #[error("failed to publish notification {id}: {source}")]
    Publish {
        id: uuid::Uuid,
        #[source]
        source: BusError,
    },
}

impl From<&Notification> for NotificationStored {
    fn from(n: &Notification) -> Self {
        Self {
            id: n.id.to_string(),
            node_id: n.node_id.clone(),
            title: n.title.clone(),
            description: n.description.clone(),
            severity: n.notification_type.as_str().to_string(),
            notification_type: n.notification_type.as_str().to_string(),
            details: n.details.clone(),
        }
    }
}

/// Key the monitor publishes on: the catalogue route with `org` filled in,
/// so subscribers declaring `EVENT_NOTIFICATION_STORE` receive it.
pub fn store_key(org: &str) -> Result<RoutingKey, MonitorError> {
    let route = prepare_route(org, EVENT_NOTIFICATION_STORE)?;
    route
        .to_routing_key()
        .ok_or_else(|| MonitorError::NotExact(route.to_string()))
}

/// Publish pending notifications once. Stops at the first failure so the
/// rest stay pending for the next tick. Returns how many were published.
pub async fn publish_pending(
    client: &MsgBusClient,
    store: &NotificationStore,
) -> Result<usize, MonitorError> {
    let pending = store.unpublished().await;
    if pending.is_empty() {
        return Ok(0);
    }

    let key = store_key(&client.identity().org_name)?;
    let mut published = 0;
    for notification in &pending {
        let event = NotificationStored::from(notification);
        client
            .publish_request(&key, &event)
            .await
            .map_err(|source| MonitorError::Publish {
                id: notification.id,
                source,
            })?;
        store.mark_published(notification.id).await;
        published += 1;
    }

    tracing::info!(routing_key = %key, count = published, "Published pending notifications");
    Ok(published)
}

pub fn spawn_policy_monitor(
    client: Arc<MsgBusClient>,
    store: NotificationStore,
    period: Duration,
) -> PeriodicTask {
    PeriodicTask::spawn("policy-monitor", period, move || {
        let client = client.clone();
        let store = store.clone();
        async move { publish_pending(&client, &store).await.map(|_| ()) }
    })
}
