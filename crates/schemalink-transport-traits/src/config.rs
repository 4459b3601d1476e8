//! Shared configuration types.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::time::Duration;

/// Serde helpers for durations expressed as integer milliseconds.
pub mod duration_ms {
    use super::{Deserialize, Deserializer, Duration, Serializer};

    /// Serialize a duration as milliseconds.
    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    /// Deserialize a duration from milliseconds.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

/// Serde helpers for optional durations expressed as integer milliseconds.
pub mod option_duration_ms {
    use super::{Deserialize, Deserializer, Duration, Serializer};

    /// Serialize an optional duration as milliseconds.
    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    /// Deserialize an optional duration from milliseconds.
    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}

/// Connect and request timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Bound on opening a connection.
    #[serde(with = "duration_ms")]
    pub connect: Duration,

    /// Default per-call timeout, used when a call sets none.
    #[serde(with = "duration_ms")]
    pub request: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(10),
            request: Duration::from_secs(30),
        }
    }
}

impl TimeoutConfig {
    /// Short timeouts for latency-sensitive agents.
    pub const fn fast() -> Self {
        Self {
            connect: Duration::from_secs(3),
            request: Duration::from_secs(5),
        }
    }

    /// Long request timeouts for slow tools such as text generation.
    pub const fn patient() -> Self {
        Self {
            connect: Duration::from_secs(10),
            request: Duration::from_secs(300),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_presets() {
        let default = TimeoutConfig::default();
        assert_eq!(default.connect, Duration::from_secs(10));
        assert_eq!(default.request, Duration::from_secs(30));
        assert!(TimeoutConfig::fast().request < default.request);
        assert!(TimeoutConfig::patient().request > default.request);
    }

    #[test]
    fn test_timeout_serde_in_millis() {
        let config = TimeoutConfig::fast();
        let value = serde_json::to_value(config).unwrap();
        assert_eq!(value["connect"], 3000);
        assert_eq!(value["request"], 5000);

        let parsed: TimeoutConfig = serde_json::from_str(r#"{"request": 1500}"#).unwrap();
        assert_eq!(parsed.request, Duration::from_millis(1500));
        assert_eq!(parsed.connect, TimeoutConfig::default().connect);
    }
}
