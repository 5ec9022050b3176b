use event_consumer::{EventDispatcher, NotificationListener};
use event_notify::{handler_table, spawn_policy_monitor, Config, NotificationStore};
use msgbus::retry::RetryConfig;
use msgbus::{EventNotificationService, MsgBusClient};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,msgbus=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let cfg = Config::from_env()?;
    let store = NotificationStore::with_retention(cfg.retain_published);

    let table = handler_table(&cfg.bus.org_name, &store)?;
    let routes = table.routes();
    tracing::info!(routes = routes.len(), org = %cfg.bus.org_name, "Handler table built");

    // NATS (fail-fast), shared by gateway calls and the inbound listener
    let nats = async_nats::connect(&cfg.bus.gateway_uri).await?;
    let client = Arc::new(MsgBusClient::with_nats(
        cfg.bus.to_descriptor(routes),
        nats.clone(),
        &cfg.bus.gateway_subject,
    ));
    let handle = client.register().await?;
    tracing::info!(service_uuid = %handle.as_str(), "Registered with message bus gateway");

    // Inbound pushes arrive on our own callback subject
    let dispatcher: Arc<dyn EventNotificationService> =
        Arc::new(EventDispatcher::new(&cfg.bus.service_name, table));
    let listener = NotificationListener::spawn(
        nats,
        cfg.bus.service_uri.clone(),
        Some(cfg.bus.listen_queue.clone()),
        dispatcher,
        RetryConfig {
            max_attempts: cfg.listener_max_attempts,
            ..RetryConfig::default()
        }
        .with_jitter(),
    );

    client.start().await?;
    let monitor = spawn_policy_monitor(client.clone(), store.clone(), cfg.monitor_period);

    tracing::info!(
        service = %cfg.bus.service_name,
        subject = %cfg.bus.service_uri,
        "Event notify service running"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    monitor.stop().await;
    if let Err(e) = client.stop().await {
        tracing::warn!(error = %e, "Failed to stop message bus client");
    }
    listener.stop().await;
    if let Err(e) = client.unregister().await {
        tracing::warn!(error = %e, "Failed to unregister from message bus gateway");
    }

    tracing::info!(notifications = store.len().await, "Event notify service stopped");
    Ok(())
}
