//! # Domain Event Catalogue
//!
//! Known platform events, their listener route templates, and
//! [`EventPayload`], a tagged union over every known message type with an
//! `Unknown` fallback that keeps the raw bytes for forwarding and logging.
//!
//! All structs use `#[serde(default)]`: a field added by a newer publisher is
//! ignored by older subscribers, and a field missing from an older publisher
//! decodes to its default.

use crate::envelope::{CodecError, DomainMessage, DynamicMessage};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// Listener route templates. `{org}` is substituted by `prepare_route`.
pub const EVENT_ORG_ADD: &str = "event.cloud.local.{org}.nucleus.org.org.add";
pub const EVENT_USER_ADD: &str = "event.cloud.local.{org}.nucleus.user.user.add";
pub const EVENT_USER_DELETE: &str = "event.cloud.local.{org}.nucleus.user.user.delete";
pub const EVENT_MEMBER_CREATE: &str = "event.cloud.local.{org}.registry.member.member.create";
pub const EVENT_NETWORK_ADD: &str = "event.cloud.local.{org}.registry.network.network.add";
pub const EVENT_NODE_CREATE: &str = "event.cloud.local.{org}.registry.node.node.create";
pub const EVENT_NODE_ASSIGN: &str = "event.cloud.local.{org}.registry.node.node.assign";
pub const EVENT_NODE_RELEASE: &str = "event.cloud.local.{org}.registry.node.node.release";
pub const EVENT_MESH_NODE_ONLINE: &str = "event.cloud.local.{org}.messaging.mesh.node.online";
pub const EVENT_MESH_NODE_OFFLINE: &str = "event.cloud.local.{org}.messaging.mesh.node.offline";
pub const EVENT_SIM_ALLOCATE: &str = "event.cloud.local.{org}.subscriber.simmanager.sim.allocate";
pub const EVENT_INVOICE_GENERATE: &str = "event.cloud.local.{org}.billing.invoice.invoice.generate";
pub const EVENT_NOTIFICATION_STORE: &str =
    "event.cloud.local.{org}.notification.notify.notification.store";

/// Every node lifecycle event published by the registry
pub const EVENT_REGISTRY_NODE_ANY: &str = "event.cloud.local.{org}.registry.node.node.*";

/// Service liveness events from every system in the organization
pub const EVENT_SERVICE_STATUS_ANY: &str = "event.cloud.local.{org}.*.*.service.#";

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OrgCreated {
    pub id: String,
    pub name: String,
    pub owner: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UserCreated {
    pub user_id: String,
    pub name: String,
    pub email: String,
    pub phone: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UserDeleted {
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MemberCreated {
    pub org_id: String,
    pub user_id: String,
    pub member_id: String,
    pub role: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkCreated {
    pub id: String,
    pub name: String,
    pub org_id: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeCreated {
    pub node_id: String,
    pub name: String,
    pub node_type: String,
    pub org_id: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeAssigned {
    pub node_id: String,
    pub network: String,
    pub site: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeReleased {
    pub node_id: String,
    pub network: String,
    pub site: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeOnline {
    pub node_id: String,
    pub node_ip: String,
    pub node_port: u32,
    pub mesh_ip: String,
    pub mesh_port: u32,
    pub mesh_host_name: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeOffline {
    pub node_id: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SimAllocated {
    pub id: String,
    pub subscriber_id: String,
    pub iccid: String,
    pub imsi: String,
    pub network_id: String,
    pub package_id: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InvoiceGenerated {
    pub id: String,
    pub subscriber_id: String,
    pub network_id: String,
    pub period: String,
    pub amount_cents: i64,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationStored {
    pub id: String,
    pub node_id: String,
    pub title: String,
    pub description: String,
    pub severity: String,
    pub notification_type: String,
    pub details: serde_json::Value,
}

/// Liveness transition published by every client on `start`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceStatus {
    pub org_name: String,
    pub system_name: String,
    pub service_name: String,
    pub instance_id: String,
    pub status: String,
    pub timestamp: Option<DateTime<Utc>>,
}

macro_rules! event_catalogue {
    ($($variant:ident => $name:literal),+ $(,)?) => {
        $(
            impl DomainMessage for $variant {
                const TYPE_NAME: &'static str = $name;
            }
        )+

        /// Any known platform event, or the raw message when the type is unknown
        #[derive(Debug, Clone, PartialEq)]
        pub enum EventPayload {
            $($variant($variant),)+
            Unknown(DynamicMessage),
        }

        impl EventPayload {
            /// Decode into the matching variant. Unrecognised type URLs are kept
            /// as [`EventPayload::Unknown`] rather than rejected.
            pub fn decode(msg: &DynamicMessage) -> Result<Self, CodecError> {
                let name = msg.type_name();
                $(
                    if name == <$variant as DomainMessage>::TYPE_NAME {
                        return Ok(Self::$variant(msg.unwrap_into()?));
                    }
                )+
                Ok(Self::Unknown(msg.clone()))
            }

            pub fn encode(&self) -> Result<DynamicMessage, CodecError> {
                match self {
                    $(Self::$variant(m) => DynamicMessage::wrap(m),)+
                    Self::Unknown(raw) => Ok(raw.clone()),
                }
            }

            pub fn type_name(&self) -> &str {
                match self {
                    $(Self::$variant(_) => <$variant as DomainMessage>::TYPE_NAME,)+
                    Self::Unknown(raw) => raw.type_name(),
                }
            }

            pub fn is_known(&self) -> bool {
                !matches!(self, Self::Unknown(_))
            }
        }
    };
}

event_catalogue! {
    OrgCreated => "events.v1.OrgCreated",
    UserCreated => "events.v1.UserCreated",
    UserDeleted => "events.v1.UserDeleted",
    MemberCreated => "events.v1.MemberCreated",
    NetworkCreated => "events.v1.NetworkCreated",
    NodeCreated => "events.v1.NodeCreated",
    NodeAssigned => "events.v1.NodeAssigned",
    NodeReleased => "events.v1.NodeReleased",
    NodeOnline => "events.v1.NodeOnline",
    NodeOffline => "events.v1.NodeOffline",
    SimAllocated => "events.v1.SimAllocated",
    InvoiceGenerated => "events.v1.InvoiceGenerated",
    NotificationStored => "events.v1.NotificationStored",
    ServiceStatus => "events.v1.ServiceStatus",
}
