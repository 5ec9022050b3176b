//! Platform event → notification handlers
//!
//! Every handled event ends in the same place: one [`Notification`] in the
//! store. The per-event work is only picking the title and the subject ids.

use crate::store::{Notification, NotificationScope, NotificationStore, NotificationType, Subject};
use chrono::Utc;
use event_consumer::{HandlerTable, HandlerTableBuilder, TableError};
use msgbus::events::{self, *};
use msgbus::{DomainMessage, HandlerError, RoutingKey};
use uuid::Uuid;

/// How an event is presented as a notification
#[derive(Debug, Clone, Copy)]
pub struct EventConfig {
    pub name: &'static str,
    pub title: &'static str,
    pub description: &'static str,
    pub notification_type: NotificationType,
    pub scope: NotificationScope,
}

const fn info(
    name: &'static str,
    title: &'static str,
    description: &'static str,
    scope: NotificationScope,
) -> EventConfig {
    EventConfig {
        name,
        title,
        description,
        notification_type: NotificationType::Info,
        scope,
    }
}

pub const ORG_ADD: EventConfig = info("EventOrgAdd", "Organization Added", "Organization Added", NotificationScope::Org);
pub const USER_ADD: EventConfig = info("EventUserAdd", "User Added", "User Added", NotificationScope::Org);
pub const USER_DELETE: EventConfig = info("EventUserDelete", "User Deleted", "User Deleted", NotificationScope::Org);
pub const MEMBER_CREATE: EventConfig = info("EventMemberCreate", "Member Created", "Member Created", NotificationScope::Org);
pub const NETWORK_ADD: EventConfig = info("EventNetworkAdd", "Network Added", "Network Added", NotificationScope::Network);
pub const NODE_CREATE: EventConfig = info("EventNodeCreate", "Node Created", "Node Created", NotificationScope::Node);
pub const NODE_ASSIGN: EventConfig = info("EventNodeAssign", "Node Assigned", "Node assigned to site", NotificationScope::Node);
pub const NODE_RELEASE: EventConfig = info("EventNodeRelease", "Node Released", "Node released from site", NotificationScope::Node);
pub const NODE_ONLINE: EventConfig = info("EventNodeOnline", "Node Online", "Node is online", NotificationScope::Node);
pub const NODE_OFFLINE: EventConfig = EventConfig {
    name: "EventNodeOffline",
    title: "Node Offline",
    description: "Node is offline",
    notification_type: NotificationType::Warning,
    scope: NotificationScope::Node,
};
pub const SIM_ALLOCATE: EventConfig = info("EventSimAllocate", "Sim Allocated", "Sim allocated to subscriber", NotificationScope::User);
pub const INVOICE_GENERATE: EventConfig = info("EventInvoiceGenerate", "Invoice Generated", "Invoice Generated", NotificationScope::Network);

/// Store one notification for an event
pub async fn record<M: DomainMessage>(
    store: &NotificationStore,
    config: &EventConfig,
    routing_key: &RoutingKey,
    subject: Subject,
    msg: &M,
) -> Result<Notification, HandlerError> {
    let details = serde_json::to_value(msg)?;
    let notification = Notification {
        id: Uuid::new_v4(),
        event_key: routing_key.to_string(),
        title: config.title.to_string(),
        description: config.description.to_string(),
        notification_type: config.notification_type,
        scope: config.scope,
        org_id: subject.org_id,
        network_id: subject.network_id,
        node_id: subject.node_id,
        user_id: subject.user_id,
        resource_id: subject.resource_id,
        details,
        created_at: Utc::now(),
        published: false,
    };

    tracing::info!(
        event = config.name,
        routing_key = %routing_key,
        notification_id = %notification.id,
        "Notification recorded"
    );
    store.insert(notification.clone()).await;
    Ok(notification)
}

fn on_event<M, S>(
    builder: HandlerTableBuilder,
    route: &str,
    config: &'static EventConfig,
    store: &NotificationStore,
    subject: S,
) -> HandlerTableBuilder
where
    M: DomainMessage,
    S: Fn(&M) -> Subject + Send + Sync + 'static,
{
    let store = store.clone();
    builder.on(route, move |key: RoutingKey, msg: M| {
        let store = store.clone();
        let who = subject(&msg);
        async move {
            record(&store, config, &key, who, &msg).await?;
            Ok::<_, HandlerError>(())
        }
    })
}

/// Handler table for the notification service of `org`
pub fn handler_table(org: &str, store: &NotificationStore) -> Result<HandlerTable, TableError> {
    let org_id = org.to_string();
    let mut b = HandlerTable::builder().org(org);

    b = on_event(b, events::EVENT_ORG_ADD, &ORG_ADD, store, |m: &OrgCreated| Subject {
        org_id: m.id.clone(),
        user_id: m.owner.clone(),
        resource_id: m.id.clone(),
        ..Default::default()
    });

    let org = org_id.clone();
    b = on_event(b, events::EVENT_USER_ADD, &USER_ADD, store, move |m: &UserCreated| Subject {
        org_id: org.clone(),
        user_id: m.user_id.clone(),
        resource_id: m.user_id.clone(),
        ..Default::default()
    });

    let org = org_id.clone();
    b = on_event(b, events::EVENT_USER_DELETE, &USER_DELETE, store, move |m: &UserDeleted| Subject {
        org_id: org.clone(),
        user_id: m.user_id.clone(),
        resource_id: m.user_id.clone(),
        ..Default::default()
    });

    b = on_event(b, events::EVENT_MEMBER_CREATE, &MEMBER_CREATE, store, |m: &MemberCreated| Subject {
        org_id: m.org_id.clone(),
        user_id: m.user_id.clone(),
        resource_id: m.member_id.clone(),
        ..Default::default()
    });

    b = on_event(b, events::EVENT_NETWORK_ADD, &NETWORK_ADD, store, |m: &NetworkCreated| Subject {
        org_id: m.org_id.clone(),
        network_id: m.id.clone(),
        resource_id: m.id.clone(),
        ..Default::default()
    });

    // Node lifecycle: several keys, one concept
    let org = org_id.clone();
    b = on_event(b, events::EVENT_NODE_CREATE, &NODE_CREATE, store, move |m: &NodeCreated| Subject {
        org_id: if m.org_id.is_empty() { org.clone() } else { m.org_id.clone() },
        node_id: m.node_id.clone(),
        resource_id: m.node_id.clone(),
        ..Default::default()
    });

    let org = org_id.clone();
    b = on_event(b, events::EVENT_MESH_NODE_ONLINE, &NODE_ONLINE, store, move |m: &NodeOnline| Subject {
        org_id: org.clone(),
        node_id: m.node_id.clone(),
        resource_id: m.node_id.clone(),
        ..Default::default()
    });

    let org = org_id.clone();
    b = on_event(b, events::EVENT_MESH_NODE_OFFLINE, &NODE_OFFLINE, store, move |m: &NodeOffline| Subject {
        org_id: org.clone(),
        node_id: m.node_id.clone(),
        resource_id: m.node_id.clone(),
        ..Default::default()
    });

    let org = org_id.clone();
    b = on_event(b, events::EVENT_NODE_ASSIGN, &NODE_ASSIGN, store, move |m: &NodeAssigned| Subject {
        org_id: org.clone(),
        network_id: m.network.clone(),
        node_id: m.node_id.clone(),
        resource_id: m.site.clone(),
        ..Default::default()
    });

    let org = org_id.clone();
    b = on_event(b, events::EVENT_NODE_RELEASE, &NODE_RELEASE, store, move |m: &NodeReleased| Subject {
        org_id: org.clone(),
        network_id: m.network.clone(),
        node_id: m.node_id.clone(),
        resource_id: m.site.clone(),
        ..Default::default()
    });

    let org = org_id.clone();
    b = on_event(b, events::EVENT_SIM_ALLOCATE, &SIM_ALLOCATE, store, move |m: &SimAllocated| Subject {
        org_id: org.clone(),
        network_id: m.network_id.clone(),
        user_id: m.subscriber_id.clone(),
        resource_id: m.id.clone(),
        ..Default::default()
    });

    let org = org_id;
    b = on_event(b, events::EVENT_INVOICE_GENERATE, &INVOICE_GENERATE, store, move |m: &InvoiceGenerated| Subject {
        org_id: org.clone(),
        network_id: m.network_id.clone(),
        user_id: m.subscriber_id.clone(),
        resource_id: m.id.clone(),
        ..Default::default()
    });

    b.build()
}
