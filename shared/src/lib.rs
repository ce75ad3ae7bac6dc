//! wake-hub Shared Protocol Types
//!
//! This crate provides the protocol constants, the frame codec and the pure
//! wake-cycle state machine shared by the hub driver and its tooling.

pub mod codec;
pub mod state_machine;

/// Mesh node address. Node 0 is reserved and never assigned to a device.
pub type NodeId = u8;

/// Command class id for the wake-up lifecycle commands.
pub const COMMAND_CLASS_WAKE_UP: u8 = 0x84;

/// Highest wake-up command class version this driver implements.
pub const WAKE_UP_VERSION_MAX: u8 = 2;

/// Per-command ids within the wake-up command class.
pub mod wake_up_cmd {
    pub const INTERVAL_SET: u8 = 0x04;
    pub const INTERVAL_GET: u8 = 0x05;
    pub const INTERVAL_REPORT: u8 = 0x06;
    pub const NOTIFICATION: u8 = 0x07;
    pub const NO_MORE_INFORMATION: u8 = 0x08;
    pub const INTERVAL_CAPABILITY_GET: u8 = 0x09;
    pub const INTERVAL_CAPABILITY_REPORT: u8 = 0x0A;
}

/// Timing parameters for the wake/sleep lifecycle
pub mod timing {
    /// Delay between a drained queue and the no-more-information send,
    /// leaving a window for late producers.
    pub const NO_MORE_INFO_DELAY_MS: u64 = 1000;

    /// How long an idle node stays marked awake after no-more-information
    /// before it is assumed asleep.
    pub const GRACE_WINDOW_MS: u64 = 10_000;

    /// Largest wake interval expressible in the 3-byte wire field.
    pub const MAX_WAKE_INTERVAL_SECS: u32 = 0x00FF_FFFF;
}

/// Wake interval range a version-2 node declares in its capability report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntervalCapabilities {
    pub min_secs: u32,
    pub max_secs: u32,
    pub default_secs: u32,
    pub step_secs: u32,
}

impl IntervalCapabilities {
    /// Whether an interval lies inside the declared range.
    pub fn contains(&self, secs: u32) -> bool {
        secs >= self.min_secs && secs <= self.max_secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_range() {
        let caps = IntervalCapabilities {
            min_secs: 60,
            max_secs: 86_400,
            default_secs: 3_600,
            step_secs: 60,
        };
        assert!(caps.contains(60));
        assert!(caps.contains(86_400));
        assert!(!caps.contains(59));
        assert!(!caps.contains(86_401));
    }

    #[test]
    fn test_max_interval_fits_wire_field() {
        assert_eq!(timing::MAX_WAKE_INTERVAL_SECS, (1 << 24) - 1);
    }
}
