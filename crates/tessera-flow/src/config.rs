//! Configuration for workers, dispatch policy, and drain mode.
//!
//! All durations are expressed in whole seconds in serialized form; CLI
//! flags and `TESSERA_*` environment variables map onto these structs
//! one-to-one.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Serde helper: durations as whole seconds.
mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

/// Execution-engine configuration for one worker instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkerConfig {
    /// How long a received message stays invisible to other workers.
    #[serde(with = "duration_secs")]
    pub visibility_timeout: Duration,

    /// How far ahead of lease expiry the heartbeat renews.
    ///
    /// The renewal interval is `visibility_timeout - renew_safety_margin`;
    /// as long as renewals land, a message is never owned by two workers
    /// at once.
    #[serde(with = "duration_secs")]
    pub renew_safety_margin: Duration,

    /// Hard ceiling on one task's processing time. Exceeding it aborts
    /// the task cooperatively and lets the lease expire naturally.
    #[serde(with = "duration_secs")]
    pub max_processing_time: Duration,

    /// Thread budget passed through to the reduction plugin.
    pub threads: Option<usize>,

    /// Memory budget in bytes passed through to the reduction plugin.
    pub memory_limit_bytes: Option<u64>,

    /// Opaque plugin configuration map.
    pub plugin_config: HashMap<String, String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            visibility_timeout: Duration::from_secs(300),
            renew_safety_margin: Duration::from_secs(60),
            max_processing_time: Duration::from_secs(3600),
            threads: None,
            memory_limit_bytes: None,
            plugin_config: HashMap::new(),
        }
    }
}

impl WorkerConfig {
    /// Sets the visibility timeout.
    #[must_use]
    pub const fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }

    /// Sets the renewal safety margin.
    #[must_use]
    pub const fn with_renew_safety_margin(mut self, margin: Duration) -> Self {
        self.renew_safety_margin = margin;
        self
    }

    /// Sets the processing-time ceiling.
    #[must_use]
    pub const fn with_max_processing_time(mut self, limit: Duration) -> Self {
        self.max_processing_time = limit;
        self
    }

    /// Sets the plugin thread budget.
    #[must_use]
    pub const fn with_threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads);
        self
    }

    /// Sets the plugin memory budget.
    #[must_use]
    pub const fn with_memory_limit_bytes(mut self, bytes: u64) -> Self {
        self.memory_limit_bytes = Some(bytes);
        self
    }

    /// Returns the heartbeat renewal interval.
    ///
    /// Floored at one second so a misconfigured margin cannot produce a
    /// busy-loop.
    #[must_use]
    pub fn renew_interval(&self) -> Duration {
        self.visibility_timeout
            .saturating_sub(self.renew_safety_margin)
            .max(Duration::from_secs(1))
    }
}

/// Retry-budget policy applied by the dispatcher.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DispatchPolicy {
    /// Delivery attempts before a message is dead-lettered.
    pub max_attempts: u32,

    /// Whether redrive resets the attempt counter to zero.
    pub reset_attempts_on_redrive: bool,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            reset_attempts_on_redrive: true,
        }
    }
}

impl DispatchPolicy {
    /// Sets the attempt budget.
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Sets whether redrive resets attempt counters.
    #[must_use]
    pub const fn with_reset_attempts_on_redrive(mut self, reset: bool) -> Self {
        self.reset_attempts_on_redrive = reset;
        self
    }
}

/// Queue-drain mode configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DrainConfig {
    /// How long the queue must stay empty before drain mode exits.
    #[serde(with = "duration_secs")]
    pub quiescence: Duration,

    /// Delay between polls when the queue comes up empty.
    #[serde(with = "duration_secs")]
    pub poll_interval: Duration,
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self {
            quiescence: Duration::from_secs(60),
            poll_interval: Duration::from_secs(5),
        }
    }
}

impl DrainConfig {
    /// Sets the quiescence window.
    #[must_use]
    pub const fn with_quiescence(mut self, quiescence: Duration) -> Self {
        self.quiescence = quiescence;
        self
    }

    /// Sets the empty-queue poll interval.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renew_interval_stays_ahead_of_expiry() {
        let config = WorkerConfig::default()
            .with_visibility_timeout(Duration::from_secs(120))
            .with_renew_safety_margin(Duration::from_secs(30));
        assert_eq!(config.renew_interval(), Duration::from_secs(90));
    }

    #[test]
    fn renew_interval_is_floored() {
        let config = WorkerConfig::default()
            .with_visibility_timeout(Duration::from_secs(10))
            .with_renew_safety_margin(Duration::from_secs(60));
        assert_eq!(config.renew_interval(), Duration::from_secs(1));
    }

    #[test]
    fn worker_config_round_trips_through_json() {
        let config = WorkerConfig::default()
            .with_visibility_timeout(Duration::from_secs(42))
            .with_threads(8);
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"visibilityTimeout\":42"));
        let parsed: WorkerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.visibility_timeout, Duration::from_secs(42));
        assert_eq!(parsed.threads, Some(8));
    }

    #[test]
    fn policy_defaults() {
        let policy = DispatchPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert!(policy.reset_attempts_on_redrive);
    }
}
