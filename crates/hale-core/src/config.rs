//! Configuration for trackers, retry, and session timeout.
//!
//! All values are supplied at construction and immutable afterwards; there
//! is no global mutable configuration. Duration fields deserialize from
//! integer seconds so the structs map directly onto the TOML config file.

use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::ids::ServiceLabel;

fn duration_secs<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let secs = u64::deserialize(deserializer)?;
    Ok(Duration::from_secs(secs))
}

// ============================================================================
// TrackerConfig
// ============================================================================

/// Configuration for one activity tracker.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Inactivity threshold. After this long without recorded activity the
    /// tracker fires its timeout exactly once.
    #[serde(deserialize_with = "duration_secs", rename = "timeout_secs")]
    pub timeout: Duration,

    /// How often the inactivity check runs.
    #[serde(deserialize_with = "duration_secs", rename = "check_interval_secs")]
    pub check_interval: Duration,

    /// Endpoint probed for reachability.
    pub probe_endpoint: String,

    /// Per-probe deadline.
    #[serde(deserialize_with = "duration_secs", rename = "probe_timeout_secs")]
    pub probe_timeout: Duration,

    /// Interval between periodic connection checks.
    #[serde(deserialize_with = "duration_secs", rename = "poll_interval_secs")]
    pub poll_interval: Duration,

    /// Label under which this tracker reports to the connection registry.
    pub service_label: ServiceLabel,

    /// Whether the broadcaster should pause this tracker while the page is
    /// hidden or unfocused. Trackers that decline keep their inactivity
    /// clock running in the background.
    pub pause_on_hidden: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10 * 60),
            check_interval: Duration::from_secs(20),
            probe_endpoint: "http://localhost:5678/healthz".to_string(),
            probe_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_secs(30),
            service_label: ServiceLabel::new("analytics"),
            pause_on_hidden: true,
        }
    }
}

// ============================================================================
// RetryPolicy
// ============================================================================

/// Backoff ladder for retrying failed backend requests.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries scheduled before giving up.
    pub max_attempts: u32,

    /// Delay before the first retry (a quick recheck).
    #[serde(deserialize_with = "duration_secs", rename = "quick_check_delay_secs")]
    pub quick_check_delay: Duration,

    /// Cap for the exponential ladder.
    #[serde(deserialize_with = "duration_secs", rename = "max_delay_secs")]
    pub max_delay: Duration,

    /// Minimum delay applied to rate-limited failures regardless of where
    /// the ladder sits.
    #[serde(deserialize_with = "duration_secs", rename = "rate_limit_floor_secs")]
    pub rate_limit_floor: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            quick_check_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(10),
            rate_limit_floor: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based).
    ///
    /// Attempt 1 is a quick recheck; attempts 2 and up follow
    /// `min(2^(attempt-1) * 1000ms, max_delay)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return self.quick_check_delay;
        }
        let exp_ms = 1000u64.saturating_mul(1u64 << (attempt - 1).min(20));
        Duration::from_millis(exp_ms).min(self.max_delay)
    }

    /// Delay for a rate-limited failure: the ladder delay, floored.
    pub fn rate_limited_delay_for(&self, attempt: u32) -> Duration {
        self.delay_for(attempt).max(self.rate_limit_floor)
    }
}

// ============================================================================
// SessionTimeoutConfig
// ============================================================================

/// Configuration for the admin session-timeout manager.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionTimeoutConfig {
    /// Hard expiry: wall-clock time without activity before logout.
    #[serde(deserialize_with = "duration_secs", rename = "timeout_secs")]
    pub timeout: Duration,

    /// The warning fires once inside `timeout - warning_window`.
    #[serde(deserialize_with = "duration_secs", rename = "warning_window_secs")]
    pub warning_window: Duration,

    /// How often the expiry check runs.
    #[serde(deserialize_with = "duration_secs", rename = "check_interval_secs")]
    pub check_interval: Duration,
}

impl Default for SessionTimeoutConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30 * 60),
            warning_window: Duration::from_secs(5 * 60),
            check_interval: Duration::from_secs(60),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_config_defaults() {
        let config = TrackerConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(600));
        assert_eq!(config.check_interval, Duration::from_secs(20));
        assert!(config.pause_on_hidden);
        assert_eq!(config.service_label.as_str(), "analytics");
    }

    #[test]
    fn test_retry_delay_ladder() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for(4), Duration::from_secs(8));
        // Capped at max_delay from attempt 5 on.
        assert_eq!(policy.delay_for(5), Duration::from_secs(10));
        assert_eq!(policy.delay_for(12), Duration::from_secs(10));
    }

    #[test]
    fn test_retry_delay_monotonic_until_cap() {
        let policy = RetryPolicy::default();
        let mut prev = Duration::ZERO;
        for attempt in 1..=8 {
            let d = policy.delay_for(attempt);
            assert!(d >= prev, "delay regressed at attempt {attempt}");
            assert!(d <= policy.max_delay);
            prev = d;
        }
    }

    #[test]
    fn test_rate_limited_delay_floor() {
        let policy = RetryPolicy::default();
        // Ladder says 2s, floor raises it to 5s.
        assert_eq!(policy.rate_limited_delay_for(1), Duration::from_secs(5));
        assert_eq!(policy.rate_limited_delay_for(2), Duration::from_secs(5));
        // Ladder above the floor is unchanged.
        assert_eq!(policy.rate_limited_delay_for(4), Duration::from_secs(8));
    }

    #[test]
    fn test_config_from_toml() {
        let raw = r#"
            timeout_secs = 60
            check_interval_secs = 15
            probe_endpoint = "http://backend.local/healthz"
            service_label = "health-tracker"
            pause_on_hidden = false
        "#;
        let config: TrackerConfig = toml::from_str(raw).expect("deserialize config");
        assert_eq!(config.timeout, Duration::from_secs(60));
        assert_eq!(config.check_interval, Duration::from_secs(15));
        assert_eq!(config.probe_endpoint, "http://backend.local/healthz");
        assert_eq!(config.service_label.as_str(), "health-tracker");
        assert!(!config.pause_on_hidden);
        // Unspecified fields fall back to defaults.
        assert_eq!(config.poll_interval, Duration::from_secs(30));
    }

    #[test]
    fn test_session_timeout_defaults() {
        let config = SessionTimeoutConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(1800));
        assert_eq!(config.warning_window, Duration::from_secs(300));
        assert_eq!(config.check_interval, Duration::from_secs(60));
    }
}
