//! # Event Consumer
//!
//! Receiving side of the messaging fabric. A service declares which routing
//! keys it handles in a [`HandlerTable`], wraps it in an [`EventDispatcher`]
//! and serves the gateway's pushes with a [`NotificationListener`].
//!
//! ```rust,no_run
//! use event_consumer::{listener, EventDispatcher, HandlerTable, NotificationListener};
//! use msgbus::events::{self, NodeCreated};
//! use msgbus::{HandlerError, RoutingKey};
//! use std::sync::Arc;
//!
//! # async fn example(nats: async_nats::Client) -> Result<(), Box<dyn std::error::Error>> {
//! let table = HandlerTable::builder()
//!     .org("acme")
//!     .on(events::EVENT_NODE_CREATE, |key: RoutingKey, node: NodeCreated| async move {
//!         tracing::info!(routing_key = %key, node_id = %node.node_id, "node created");
//!         Ok::<_, HandlerError>(())
//!     })
//!     .build()?;
//!
//! let routes = table.routes();
//! let dispatcher = Arc::new(EventDispatcher::new("node-watch", table));
//! let listener = NotificationListener::spawn(
//!     nats,
//!     "registry.node-watch.notify",
//!     None,
//!     dispatcher,
//!     listener::default_resubscribe_policy(),
//! );
//! # let _ = routes;
//! listener.stop().await;
//! # Ok(())
//! # }
//! ```

mod dispatcher;
mod handler_table;
pub mod listener;

pub use dispatcher::EventDispatcher;
pub use handler_table::{HandlerTable, HandlerTableBuilder, TableError};
pub use listener::NotificationListener;
