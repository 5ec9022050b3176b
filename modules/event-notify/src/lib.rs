//! # Event Notify
//!
//! Subscribes to platform lifecycle events, records one notification per
//! event and periodically republishes new notifications on the fabric.

pub mod config;
pub mod handlers;
pub mod monitor;
pub mod store;

pub use config::Config;
pub use handlers::handler_table;
pub use monitor::{publish_pending, spawn_policy_monitor, store_key, MonitorError};
pub use store::{Notification, NotificationScope, NotificationStore, NotificationType, Subject};
