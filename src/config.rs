//! Hub configuration

use std::time::Duration;
use wakehub_shared::{timing, NodeId, WAKE_UP_VERSION_MAX};

/// Timing knobs for the wake/sleep lifecycle.
#[derive(Debug, Clone)]
pub struct WakeUpTiming {
    /// How long to hold the no-more-information send after the queue
    /// drains, leaving a window for late producers.
    pub no_more_info_delay: Duration,
    /// How long an idle node stays marked awake after no-more-information
    /// before it is assumed asleep.
    pub grace_window: Duration,
}

impl Default for WakeUpTiming {
    fn default() -> Self {
        Self {
            no_more_info_delay: Duration::from_millis(timing::NO_MORE_INFO_DELAY_MS),
            grace_window: Duration::from_millis(timing::GRACE_WINDOW_MS),
        }
    }
}

/// Configuration for the hub daemon.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Address the radio bridge connects to.
    pub listen_addr: String,
    /// The hub's own node id; version-2 peers are told to notify it.
    pub hub_node: NodeId,
    /// Wake-up class version assumed for nodes the discovery layer has not
    /// versioned yet.
    pub default_version: u8,
    /// Lifecycle timing.
    pub wake: WakeUpTiming,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:6004".into(),
            hub_node: 1,
            default_version: WAKE_UP_VERSION_MAX,
            wake: WakeUpTiming::default(),
        }
    }
}
