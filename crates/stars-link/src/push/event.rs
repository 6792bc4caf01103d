//! Push topics, event kinds and the events delivered to subscribers.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{LinkError, Result};

/// Kind assigned to frames that carry no `event:` field.
pub const DEFAULT_EVENT_KIND: &str = "message";

/// Event kinds published by the controller service.
pub mod kinds {
    pub const CONGESTION_UPDATE: &str = "congestion-update";
    pub const CONGESTION_ALERT: &str = "congestion-alert";
    pub const WEATHER_UPDATE: &str = "weather-update";
    pub const TRAFFIC_UPDATE: &str = "traffic-update";
    pub const PARK_UPDATE: &str = "park-update";
}

/// A named push endpoint. Several event kinds share one connection per topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Topic {
    name: String,
    path: String,
}

impl Topic {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }

    /// Live congestion levels and congestion alerts.
    pub fn congestion() -> Self {
        Self::new("congestion", "/control/congestion/main/congestion")
    }

    /// Weather, traffic and parking updates.
    pub fn external() -> Self {
        Self::new("external", "/control/external/main/stream")
    }

    /// Look up a built-in topic by name.
    pub fn builtin(name: &str) -> Option<Self> {
        match name {
            "congestion" => Some(Self::congestion()),
            "external" => Some(Self::external()),
            _ => None,
        }
    }

    /// Built-in topic that carries `kind`.
    pub fn for_kind(kind: &str) -> Option<Self> {
        match kind {
            kinds::CONGESTION_UPDATE | kinds::CONGESTION_ALERT => Some(Self::congestion()),
            kinds::WEATHER_UPDATE | kinds::TRAFFIC_UPDATE | kinds::PARK_UPDATE => {
                Some(Self::external())
            }
            _ => None,
        }
    }

    /// Event kinds known to be published on this topic.
    pub fn known_kinds(&self) -> &'static [&'static str] {
        match self.name.as_str() {
            "congestion" => &[kinds::CONGESTION_UPDATE, kinds::CONGESTION_ALERT],
            "external" => &[
                kinds::WEATHER_UPDATE,
                kinds::TRAFFIC_UPDATE,
                kinds::PARK_UPDATE,
            ],
            _ => &[],
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Label distinguishing message types on one topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventKind(String);

impl EventKind {
    pub fn new(kind: impl Into<String>) -> Self {
        Self(kind.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for EventKind {
    fn from(kind: &str) -> Self {
        Self::new(kind)
    }
}

impl From<String> for EventKind {
    fn from(kind: String) -> Self {
        Self(kind)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A parsed push message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushEvent {
    pub topic: String,
    pub kind: EventKind,
    pub data: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl PushEvent {
    /// Decode the payload into a typed value.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        T::deserialize(&self.data).map_err(|e| LinkError::MalformedPayload(e.to_string()))
    }
}

/// Terminal failure of a topic connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionFailure {
    pub topic: String,
    /// Reconnect attempts made before giving up.
    pub attempts: u32,
    /// Last connection error.
    pub reason: String,
}

impl From<&SubscriptionFailure> for LinkError {
    fn from(failure: &SubscriptionFailure) -> Self {
        LinkError::SubscriptionFailed {
            topic: failure.topic.clone(),
            attempts: failure.attempts,
        }
    }
}

/// What a subscription receives.
#[derive(Debug, Clone)]
pub enum SubscriptionEvent {
    Event(PushEvent),
    /// Delivered once when the topic connection gives up.
    Failed(SubscriptionFailure),
}

/// Lifecycle of one topic connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Disconnected,
    Closing,
    Closed,
    Failed,
}

impl ConnectionState {
    /// Whether the connection task has stopped for good.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Disconnected => "disconnected",
            Self::Closing => "closing",
            Self::Closed => "closed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq)]
    struct CongestionLevel {
        area: String,
        level: u8,
    }

    #[test]
    fn test_topic_lookup() {
        assert_eq!(Topic::builtin("congestion"), Some(Topic::congestion()));
        assert_eq!(Topic::for_kind(kinds::PARK_UPDATE), Some(Topic::external()));
        assert!(Topic::builtin("nope").is_none());
        assert!(Topic::external().known_kinds().contains(&kinds::WEATHER_UPDATE));
    }

    #[test]
    fn test_decode_typed_payload() {
        let event = PushEvent {
            topic: "congestion".into(),
            kind: kinds::CONGESTION_UPDATE.into(),
            data: json!({"area": "Gangnam", "level": 3}),
            id: None,
        };
        let level: CongestionLevel = event.decode().unwrap();
        assert_eq!(
            level,
            CongestionLevel {
                area: "Gangnam".into(),
                level: 3
            }
        );

        let wrong: Result<Vec<u8>> = event.decode();
        assert!(matches!(wrong, Err(LinkError::MalformedPayload(_))));
    }
}
