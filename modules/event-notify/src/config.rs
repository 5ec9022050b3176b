use anyhow::{ensure, Context};
use msgbus::MsgBusConfig;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub bus: MsgBusConfig,
    /// How often the policy monitor republishes new notifications
    pub monitor_period: Duration,
    /// Resubscription attempts before the inbound listener gives up
    pub listener_max_attempts: u32,
    /// Published notifications kept for inspection; older ones are evicted
    pub retain_published: usize,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|var| env::var(var).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bus = MsgBusConfig::from_lookup(&lookup).context("message bus configuration")?;

        let monitor_secs: u64 = lookup("POLICY_MONITOR_PERIOD_SECS")
            .unwrap_or_else(|| "30".to_string())
            .trim()
            .parse()
            .context("POLICY_MONITOR_PERIOD_SECS")?;
        ensure!(monitor_secs > 0, "POLICY_MONITOR_PERIOD_SECS must be greater than zero");

        let listener_max_attempts: u32 = lookup("LISTENER_MAX_ATTEMPTS")
            .unwrap_or_else(|| "8".to_string())
            .trim()
            .parse()
            .context("LISTENER_MAX_ATTEMPTS")?;
        ensure!(listener_max_attempts > 0, "LISTENER_MAX_ATTEMPTS must be greater than zero");

        Ok(Self {
            bus,
            monitor_period: Duration::from_secs(monitor_secs),
            listener_max_attempts,
            retain_published: lookup("NOTIFICATION_RETAIN_PUBLISHED")
                .unwrap_or_else(|| "1000".to_string())
                .trim()
                .parse()
                .context("NOTIFICATION_RETAIN_PUBLISHED")?,
        })
    }
}
