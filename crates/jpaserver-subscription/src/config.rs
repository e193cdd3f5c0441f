use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::dao::DEFAULT_QUEUE_LIMIT;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionConfig {
    /// Delay between polls of a bound session's delivery queue
    pub poll_interval_ms: u64,
    /// Outbound frames buffered per WebSocket connection
    pub outbound_buffer: usize,
    /// Undelivered resources kept per subscription
    pub max_queued_resources: usize,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            outbound_buffer: 32,
            max_queued_resources: DEFAULT_QUEUE_LIMIT,
        }
    }
}

impl SubscriptionConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = SubscriptionConfig::default();
        assert_eq!(cfg.poll_interval(), Duration::from_secs(1));
        assert_eq!(cfg.outbound_buffer, 32);
        assert_eq!(cfg.max_queued_resources, 1000);
    }

    #[test]
    fn test_partial_deserialize() {
        let cfg: SubscriptionConfig = serde_json::from_str(r#"{"poll_interval_ms": 250}"#).unwrap();
        assert_eq!(cfg.poll_interval(), Duration::from_millis(250));
        assert_eq!(cfg.outbound_buffer, 32);
        assert_eq!(cfg.max_queued_resources, 1000);
    }
}
