use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    Info,
    Warning,
    Error,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::Info => "info",
            NotificationType::Warning => "warning",
            NotificationType::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationScope {
    Org,
    Network,
    Node,
    User,
}

/// Who and what a notification is about. Empty strings mean "not applicable".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Subject {
    pub org_id: String,
    pub network_id: String,
    pub node_id: String,
    pub user_id: String,
    pub resource_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    /// Routing key the source event arrived on
    pub event_key: String,
    pub title: String,
    pub description: String,
    pub notification_type: NotificationType,
    pub scope: NotificationScope,
    pub org_id: String,
    pub network_id: String,
    pub node_id: String,
    pub user_id: String,
    pub resource_id: String,
    /// Raw source event
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub published: bool,
}

/// Default number of published notifications kept after announcement
pub const DEFAULT_RETAIN_PUBLISHED: usize = 1000;

#[derive(Default)]
struct Log {
    pending: VecDeque<Notification>,
    published: VecDeque<Notification>,
}

/// In-memory notification log, shared between handlers and the monitor.
///
/// Pending notifications are kept until published. Published ones are kept
/// only up to the retention cap, oldest evicted first.
#[derive(Clone)]
pub struct NotificationStore {
    inner: Arc<RwLock<Log>>,
    retain_published: usize,
}

impl Default for NotificationStore {
    fn default() -> Self {
        Self::with_retention(DEFAULT_RETAIN_PUBLISHED)
    }
}

impl NotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention(retain_published: usize) -> Self {
        Self {
            inner: Arc::default(),
            retain_published,
        }
    }

    pub async fn insert(&self, notification: Notification) {
        self.inner.write().await.pending.push_back(notification);
    }

    /// Retained published entries, then pending ones, each oldest first
    pub async fn list(&self) -> Vec<Notification> {
        let log = self.inner.read().await;
        log.published.iter().chain(log.pending.iter()).cloned().collect()
    }

    pub async fn len(&self) -> usize {
        let log = self.inner.read().await;
        log.published.len() + log.pending.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn unpublished(&self) -> Vec<Notification> {
        self.inner.read().await.pending.iter().cloned().collect()
    }

    pub async fn mark_published(&self, id: Uuid) -> bool {
        let mut log = self.inner.write().await;
        let Some(pos) = log.pending.iter().position(|n| n.id == id) else {
            return false;
        };
        let Some(mut notification) = log.pending.remove(pos) else {
            return false;
        };
        notification.published = true;
        log.published.push_back(notification);
        while log.published.len() > self.retain_published {
            log.published.pop_front();
        }
        true
    }
}
