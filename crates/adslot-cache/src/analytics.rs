//! Fire-and-forget ad telemetry.
//!
//! The cache never depends on these events for correctness; a sink may drop
//! them freely.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

/// Advertiser recorded when the caller does not name one.
pub const UNKNOWN_ADVERTISER: &str = "unknown";

/// Platform recorded with every event.
pub const PLATFORM: &str = std::env::consts::OS;

/// Telemetry emitted by slot consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event_name")]
pub enum AdEvent {
    /// The asset was shown.
    #[serde(rename = "ad_impression")]
    Impression {
        ad_id: String,
        ad_unit_name: String,
        advertiser: String,
        timestamp: DateTime<Utc>,
        platform: String,
    },
    /// The asset was tapped.
    #[serde(rename = "ad_click")]
    Click {
        ad_id: String,
        ad_unit_name: String,
        advertiser: String,
        destination_url: String,
        timestamp: DateTime<Utc>,
        platform: String,
    },
}

impl AdEvent {
    #[must_use]
    pub fn impression(ad_id: &str, ad_unit_name: &str, advertiser: Option<&str>) -> Self {
        Self::Impression {
            ad_id: ad_id.to_string(),
            ad_unit_name: ad_unit_name.to_string(),
            advertiser: advertiser.unwrap_or(UNKNOWN_ADVERTISER).to_string(),
            timestamp: Utc::now(),
            platform: PLATFORM.to_string(),
        }
    }

    #[must_use]
    pub fn click(
        ad_id: &str,
        ad_unit_name: &str,
        destination_url: &str,
        advertiser: Option<&str>,
    ) -> Self {
        Self::Click {
            ad_id: ad_id.to_string(),
            ad_unit_name: ad_unit_name.to_string(),
            advertiser: advertiser.unwrap_or(UNKNOWN_ADVERTISER).to_string(),
            destination_url: destination_url.to_string(),
            timestamp: Utc::now(),
            platform: PLATFORM.to_string(),
        }
    }

    /// Wire name of the event.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Impression { .. } => "ad_impression",
            Self::Click { .. } => "ad_click",
        }
    }

    /// When the event was created.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Impression { timestamp, .. } | Self::Click { timestamp, .. } => *timestamp,
        }
    }
}

/// Destination for [`AdEvent`]s. Recording must not block or fail.
pub trait AnalyticsSink: Send + Sync {
    fn record(&self, event: AdEvent);
}

/// Writes events to the `tracing` log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl AnalyticsSink for TracingSink {
    fn record(&self, event: AdEvent) {
        match serde_json::to_string(&event) {
            Ok(payload) => {
                tracing::info!(target: "adslot::analytics", event = event.name(), %payload);
            }
            Err(e) => {
                tracing::warn!(target: "adslot::analytics", error = %e, "unserializable event");
            }
        }
    }
}

/// Fans events out to any number of in-process subscribers.
///
/// Events published with no subscriber are dropped. Slow subscribers see
/// `RecvError::Lagged` rather than holding up the publisher.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<AdEvent>,
}

impl BroadcastSink {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<AdEvent> {
        self.tx.subscribe()
    }
}

impl AnalyticsSink for BroadcastSink {
    fn record(&self, event: AdEvent) {
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_advertiser() {
        let event = AdEvent::impression("home_banner", "home_banner", None);
        assert!(matches!(
            event,
            AdEvent::Impression { ref advertiser, .. } if advertiser == UNKNOWN_ADVERTISER
        ));
    }

    #[test]
    fn test_wire_format() {
        let event = AdEvent::click("a1", "home_banner", "https://example.com", Some("Acme"));
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event_name"], "ad_click");
        assert_eq!(value["destination_url"], "https://example.com");
        assert_eq!(value["advertiser"], "Acme");
        assert_eq!(value["platform"], PLATFORM);
        assert!(value["timestamp"].is_string());
        assert_eq!(event.name(), "ad_click");
    }

    #[test]
    fn test_events_are_timestamped() {
        let before = Utc::now();
        let event = AdEvent::impression("a1", "home_banner", None);
        assert!(event.timestamp() >= before);
        assert!(event.timestamp() <= Utc::now());
    }

    #[test]
    fn publish_without_subscribers_does_not_panic() {
        let sink = BroadcastSink::new(4);
        sink.record(AdEvent::impression("a", "home_banner", None));
        TracingSink.record(AdEvent::impression("a", "home_banner", None));
    }

    #[tokio::test]
    async fn broadcast_subscriber_receives() {
        let sink = BroadcastSink::new(4);
        let mut rx = sink.subscribe();
        let event = AdEvent::impression("a", "home_banner", Some("Acme"));
        sink.record(event.clone());
        assert_eq!(rx.recv().await.unwrap(), event);
    }
}
