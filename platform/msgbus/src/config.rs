//! Environment configuration for fabric clients
//!
//! Loaded once at startup and passed down explicitly; nothing here is read
//! again after construction.

use crate::client::{RegistrationDescriptor, ServiceIdentity};
use crate::routing_key::RoutingKeyPattern;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value {value:?} for {var}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

struct Vars<F> {
    lookup: F,
}

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, var: &'static str) -> Option<String> {
        (self.lookup)(var).filter(|v| !v.trim().is_empty())
    }

    fn required(&self, var: &'static str) -> Result<String, ConfigError> {
        self.optional(var).ok_or(ConfigError::Missing(var))
    }

    fn or(&self, var: &'static str, default: &str) -> String {
        self.optional(var).unwrap_or_else(|| default.to_string())
    }

    fn parsed<T>(&self, var: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let Some(value) = self.optional(var) else {
            return Ok(default);
        };
        match value.trim().parse::<T>() {
            Ok(parsed) => Ok(parsed),
            Err(e) => Err(ConfigError::Invalid {
                var,
                reason: e.to_string(),
                value,
            }),
        }
    }

    /// Millisecond duration that must be non-zero
    fn millis(&self, var: &'static str, default: u64) -> Result<Duration, ConfigError> {
        match self.parsed(var, default)? {
            0 => Err(ConfigError::Invalid {
                var,
                value: "0".to_string(),
                reason: "must be greater than zero".to_string(),
            }),
            ms => Ok(Duration::from_millis(ms)),
        }
    }

    fn flag(&self, var: &'static str) -> Result<bool, ConfigError> {
        match self.optional(var).as_deref().map(str::trim) {
            None => Ok(false),
            Some("1") | Some("true") | Some("TRUE") | Some("yes") => Ok(true),
            Some("0") | Some("false") | Some("FALSE") | Some("no") => Ok(false),
            Some(other) => Err(ConfigError::Invalid {
                var,
                value: other.to_string(),
                reason: "expected true/false".to_string(),
            }),
        }
    }
}

/// Messaging settings for one service instance
#[derive(Debug, Clone)]
pub struct MsgBusConfig {
    pub org_name: String,
    pub system_name: String,
    pub service_name: String,
    /// `POD_NAME`, or a uuid generated at load time
    pub instance_id: String,
    /// NATS URL of the gateway
    pub gateway_uri: String,
    /// Subject prefix the gateway serves requests on
    pub gateway_subject: String,
    /// Subject the gateway pushes this service's envelopes to
    pub service_uri: String,
    pub listen_queue: String,
    pub publish_queue: String,
    pub exchange: String,
    pub retry_count: u32,
    pub timeout: Duration,
    pub debug_mode: bool,
}

impl MsgBusConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Load from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars { lookup };

        let org_name = vars.required("ORG_NAME")?;
        let system_name = vars.required("SYSTEM_NAME")?;
        let service_name = vars.required("SERVICE_NAME")?;
        let instance_id = vars
            .optional("POD_NAME")
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let service_uri = vars.or(
            "SERVICE_URI",
            &format!("{system_name}.{service_name}.notify"),
        );
        let listen_queue = vars.or(
            "LISTEN_QUEUE",
            &format!("{system_name}.{service_name}.listen"),
        );
        let publish_queue = vars.or(
            "PUBLISH_QUEUE",
            &format!("{system_name}.{service_name}.publish"),
        );

        Ok(Self {
            gateway_uri: vars.or("MSG_CLIENT_HOST", "nats://localhost:4222"),
            gateway_subject: vars.or("MSG_CLIENT_SUBJECT", "msgclient"),
            service_uri,
            listen_queue,
            publish_queue,
            exchange: vars.or("EXCHANGE", "amq.topic"),
            retry_count: vars.parsed("MSG_CLIENT_RETRY_COUNT", 3)?,
            timeout: vars.millis("MSG_CLIENT_TIMEOUT_MS", 3000)?,
            debug_mode: vars.flag("DEBUG_MODE")?,
            org_name,
            system_name,
            service_name,
            instance_id,
        })
    }

    pub fn identity(&self) -> ServiceIdentity {
        ServiceIdentity::new(
            &self.org_name,
            &self.system_name,
            &self.service_name,
            &self.instance_id,
        )
    }

    pub fn to_descriptor(&self, routes: Vec<RoutingKeyPattern>) -> RegistrationDescriptor {
        RegistrationDescriptor {
            identity: self.identity(),
            gateway_uri: self.gateway_uri.clone(),
            service_uri: self.service_uri.clone(),
            routes,
            listen_queue: self.listen_queue.clone(),
            publish_queue: self.publish_queue.clone(),
            exchange: self.exchange.clone(),
            retry_count: self.retry_count,
            timeout: self.timeout,
            debug_mode: self.debug_mode,
        }
    }
}

/// Credentials for the broker's HTTP management API
#[derive(Debug, Clone)]
pub struct BrokerAdminConfig {
    pub admin_url: String,
    pub user: String,
    pub password: String,
    pub timeout: Duration,
}

impl BrokerAdminConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|var| env::var(var).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars { lookup };
        Ok(Self {
            admin_url: vars.or("BROKER_ADMIN_URL", "http://localhost:15672"),
            user: vars.or("BROKER_USER", "guest"),
            password: vars.or("BROKER_PASSWORD", "guest"),
            timeout: vars.millis("BROKER_TIMEOUT_MS", 5000)?,
        })
    }
}
