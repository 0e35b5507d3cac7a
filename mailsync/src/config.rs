//! # Configuration
//!
//! Module dedicated to the orchestrator configuration. Every field is
//! optional so that a configuration file only needs to mention what
//! differs from the defaults; getters resolve the final values.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::service::{ACCOUNT_MANAGER_TYPE, PROTOCOL, SERVICE_ACTION};

pub const DEFAULT_BACKOFF_BASE_SECS: u64 = 15;
pub const DEFAULT_BACKOFF_MAX_SECS: u64 = 4 * 60;
pub const DEFAULT_RESCAN_INTERVAL_SECS: u64 = 5 * 60;
pub const DEFAULT_OBSERVER_QUEUE_SIZE: usize = 64;

/// The orchestrator configuration.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct OrchestratorConfig {
    /// The protocol family handled by the orchestrator.
    ///
    /// Only accounts whose receive host uses this protocol are
    /// governed. Defaults to [`PROTOCOL`].
    pub protocol: Option<String>,

    /// The account type used to talk to the account-management
    /// authority. Defaults to [`ACCOUNT_MANAGER_TYPE`].
    pub account_manager_type: Option<String>,

    /// The discovery action used by the surrounding process to route
    /// commands to this orchestrator. Defaults to [`SERVICE_ACTION`].
    pub service_action: Option<String>,

    /// The retry backoff applied to transient sync failures.
    pub backoff: Option<BackoffConfig>,

    /// The number of seconds between two automatic rescans of the
    /// mailboxes that need a worker.
    pub rescan_interval: Option<u64>,

    /// The number of events an observer may have pending before new
    /// events are skipped for it.
    pub observer_queue_size: Option<usize>,
}

impl OrchestratorConfig {
    pub fn get_protocol(&self) -> &str {
        self.protocol.as_deref().unwrap_or(PROTOCOL)
    }

    pub fn get_account_manager_type(&self) -> &str {
        self.account_manager_type
            .as_deref()
            .unwrap_or(ACCOUNT_MANAGER_TYPE)
    }

    pub fn get_service_action(&self) -> &str {
        self.service_action.as_deref().unwrap_or(SERVICE_ACTION)
    }

    pub fn get_backoff_policy(&self) -> BackoffPolicy {
        self.backoff
            .as_ref()
            .map(BackoffPolicy::from)
            .unwrap_or_default()
    }

    pub fn get_rescan_interval(&self) -> Duration {
        Duration::from_secs(
            self.rescan_interval
                .unwrap_or(DEFAULT_RESCAN_INTERVAL_SECS)
                .max(1),
        )
    }

    pub fn get_observer_queue_size(&self) -> usize {
        self.observer_queue_size
            .unwrap_or(DEFAULT_OBSERVER_QUEUE_SIZE)
            .max(1)
    }
}

/// The backoff section of the configuration, in seconds.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct BackoffConfig {
    /// The hold applied after the first failure.
    pub base: Option<u64>,

    /// The longest hold, whatever the number of consecutive failures.
    pub max: Option<u64>,
}

/// The backoff policy.
///
/// The hold doubles for every consecutive failure of a mailbox,
/// starting from `base` and never exceeding `max`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
}

impl BackoffPolicy {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
        }
    }

    /// Compute the hold for the given consecutive failure, starting
    /// at 1.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        self.base
            .checked_mul(1 << exp)
            .unwrap_or(self.max)
            .min(self.max)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(
            Duration::from_secs(DEFAULT_BACKOFF_BASE_SECS),
            Duration::from_secs(DEFAULT_BACKOFF_MAX_SECS),
        )
    }
}

impl From<&BackoffConfig> for BackoffPolicy {
    fn from(config: &BackoffConfig) -> Self {
        Self::new(
            Duration::from_secs(config.base.unwrap_or(DEFAULT_BACKOFF_BASE_SECS)),
            Duration::from_secs(config.max.unwrap_or(DEFAULT_BACKOFF_MAX_SECS)),
        )
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn backoff_doubles_until_max() {
        let policy = BackoffPolicy::default();

        assert_eq!(policy.delay(1), Duration::from_secs(15));
        assert_eq!(policy.delay(2), Duration::from_secs(30));
        assert_eq!(policy.delay(3), Duration::from_secs(60));
        assert_eq!(policy.delay(4), Duration::from_secs(120));
        assert_eq!(policy.delay(5), Duration::from_secs(240));
        assert_eq!(policy.delay(6), Duration::from_secs(240));
        assert_eq!(policy.delay(u32::MAX), Duration::from_secs(240));
    }

    #[test]
    fn backoff_max_never_below_base() {
        let policy = BackoffPolicy::new(Duration::from_secs(10), Duration::from_secs(1));
        assert_eq!(policy.delay(1), Duration::from_secs(10));
        assert_eq!(policy.delay(3), Duration::from_secs(10));
    }

    #[test]
    fn config_defaults() {
        let config = OrchestratorConfig::default();

        assert_eq!(config.get_protocol(), PROTOCOL);
        assert_eq!(config.get_account_manager_type(), ACCOUNT_MANAGER_TYPE);
        assert_eq!(config.get_service_action(), SERVICE_ACTION);
        assert_eq!(config.get_backoff_policy(), BackoffPolicy::default());
        assert_eq!(config.get_rescan_interval(), Duration::from_secs(300));
        assert_eq!(config.get_observer_queue_size(), 64);
    }

    #[test]
    fn config_from_kebab_case() {
        let config: OrchestratorConfig = serde_json::from_str(
            r#"{"protocol":"imap","backoff":{"base":5},"rescan-interval":0}"#,
        )
        .unwrap();

        assert_eq!(config.get_protocol(), "imap");
        assert_eq!(
            config.get_backoff_policy(),
            BackoffPolicy::new(Duration::from_secs(5), Duration::from_secs(240))
        );
        assert_eq!(config.get_rescan_interval(), Duration::from_secs(1));
    }
}
