use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_HOST: &str = "http://localhost:8080";

pub const DEFAULT_USER_AGENT: &str = concat!("stars-link/", env!("CARGO_PKG_VERSION"));

/// Reconnect policy for push connections.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Delay before the first reconnect attempt.
    pub initial_delay_ms: u64,
    /// Upper bound for the doubled delay.
    pub max_delay_ms: u64,
    /// Consecutive failed attempts before the topic is marked failed.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1000,
            max_delay_ms: 30000,
            max_attempts: 10,
        }
    }
}

impl ReconnectConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    /// Delay that follows `current` in the backoff sequence.
    pub fn next_delay(&self, current: Duration) -> Duration {
        (current * 2).min(Duration::from_millis(self.max_delay_ms))
    }
}

/// Client configuration shared by the pipeline, the push manager and the REST helpers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Base URL of the API server, without a trailing slash.
    pub host: String,

    /// Overall timeout for regular requests. Zero disables it.
    ///
    /// Push connections are long-lived and never use this timeout.
    pub request_timeout_secs: u64,

    /// Connection timeout for every request, push connections included.
    pub connect_timeout_secs: u64,

    /// Bound on a single renewal round-trip.
    pub renewal_timeout_secs: u64,

    pub user_agent: String,

    pub reconnect: ReconnectConfig,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            request_timeout_secs: 30,
            connect_timeout_secs: 10,
            renewal_timeout_secs: 10,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl LinkConfig {
    pub fn with_host(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }

    /// Host with any trailing slash removed.
    pub fn base_url(&self) -> &str {
        self.host.trim_end_matches('/')
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_secs > 0).then(|| Duration::from_secs(self.request_timeout_secs))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn renewal_timeout(&self) -> Duration {
        Duration::from_secs(self.renewal_timeout_secs)
    }
}
