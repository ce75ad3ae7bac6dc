//! Wake-Cycle State Machine
//!
//! Pure transition logic for a node's wake/sleep lifecycle. The driver
//! feeds decoded events in; no I/O or timing lives here.

/// Lifecycle states for one sleeping node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeCycleState {
    /// The node cannot receive commands; outbound traffic accumulates
    Asleep,
    /// The node announced itself and parked commands are being flushed
    Draining,
    /// The queue drained and no-more-information went out; the node may
    /// still be listening
    Idle,
}

/// Events that can move the wake cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeEvent {
    /// The node announced it is awake
    NotificationReceived,
    /// The pending queue emptied and the wake window is being closed
    QueueDrained,
    /// No activity since no-more-information; assume the node slept
    GraceElapsed,
    /// The surrounding driver declared the node asleep
    SleepOrdered,
}

/// Result of feeding one event in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionResult {
    /// The event was valid and the state changed
    Changed {
        from: WakeCycleState,
        to: WakeCycleState,
    },
    /// The event does not apply to the current state (late timers,
    /// notifications coalesced into an active drain)
    Unchanged,
}

/// Tracks the lifecycle state plus the wake-cycle identity used to tag
/// no-more-information sends.
#[derive(Debug)]
pub struct WakeCycle {
    state: WakeCycleState,
    cycle: u32,
}

impl Default for WakeCycle {
    fn default() -> Self {
        Self::new()
    }
}

impl WakeCycle {
    /// Create a new cycle tracker in the Asleep state
    pub fn new() -> Self {
        Self {
            state: WakeCycleState::Asleep,
            cycle: 0,
        }
    }

    /// Get current state
    pub fn state(&self) -> WakeCycleState {
        self.state
    }

    /// Identity of the current (or most recent) wake window
    pub fn cycle(&self) -> u32 {
        self.cycle
    }

    /// Whether the node is believed able to receive commands
    pub fn is_awake(&self) -> bool {
        self.state != WakeCycleState::Asleep
    }

    /// Process an event and return the transition result
    pub fn process_event(&mut self, event: WakeEvent) -> TransitionResult {
        use WakeCycleState::*;
        use WakeEvent::*;

        let next = match (self.state, event) {
            // A notification in Idle means the node re-announced itself:
            // a new wake window with a new identity
            (Asleep | Idle, NotificationReceived) => {
                self.cycle = self.cycle.wrapping_add(1);
                Some(Draining)
            }

            // Coalesces into the drain already in flight
            (Draining, NotificationReceived) => None,

            (Draining, QueueDrained) => Some(Idle),

            (Idle, GraceElapsed) => Some(Asleep),

            (Asleep, SleepOrdered) => None,
            (_, SleepOrdered) => Some(Asleep),

            // Late timers and out-of-order events
            _ => None,
        };

        match next {
            Some(to) => {
                let from = self.state;
                self.state = to;
                TransitionResult::Changed { from, to }
            }
            None => TransitionResult::Unchanged,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let cycle = WakeCycle::new();
        assert_eq!(cycle.state(), WakeCycleState::Asleep);
        assert_eq!(cycle.cycle(), 0);
        assert!(!cycle.is_awake());
    }

    #[test]
    fn test_full_wake_window() {
        let mut cycle = WakeCycle::new();

        let result = cycle.process_event(WakeEvent::NotificationReceived);
        assert!(matches!(
            result,
            TransitionResult::Changed {
                to: WakeCycleState::Draining,
                ..
            }
        ));
        assert_eq!(cycle.cycle(), 1);
        assert!(cycle.is_awake());

        let result = cycle.process_event(WakeEvent::QueueDrained);
        assert!(matches!(
            result,
            TransitionResult::Changed {
                to: WakeCycleState::Idle,
                ..
            }
        ));

        let result = cycle.process_event(WakeEvent::GraceElapsed);
        assert!(matches!(
            result,
            TransitionResult::Changed {
                to: WakeCycleState::Asleep,
                ..
            }
        ));
        assert!(!cycle.is_awake());
        assert_eq!(cycle.cycle(), 1);
    }

    #[test]
    fn test_notification_during_drain_coalesces() {
        let mut cycle = WakeCycle::new();
        cycle.process_event(WakeEvent::NotificationReceived);
        assert_eq!(cycle.cycle(), 1);

        let result = cycle.process_event(WakeEvent::NotificationReceived);
        assert_eq!(result, TransitionResult::Unchanged);
        assert_eq!(cycle.state(), WakeCycleState::Draining);
        assert_eq!(cycle.cycle(), 1, "coalesced notification must not open a new window");
    }

    #[test]
    fn test_renotification_while_idle_opens_new_window() {
        let mut cycle = WakeCycle::new();
        cycle.process_event(WakeEvent::NotificationReceived);
        cycle.process_event(WakeEvent::QueueDrained);
        assert_eq!(cycle.state(), WakeCycleState::Idle);

        let result = cycle.process_event(WakeEvent::NotificationReceived);
        assert!(matches!(
            result,
            TransitionResult::Changed {
                to: WakeCycleState::Draining,
                ..
            }
        ));
        assert_eq!(cycle.cycle(), 2);
    }

    #[test]
    fn test_late_grace_timer_ignored() {
        let mut cycle = WakeCycle::new();

        // Fires while asleep
        assert_eq!(
            cycle.process_event(WakeEvent::GraceElapsed),
            TransitionResult::Unchanged
        );

        // Fires while a new drain is running
        cycle.process_event(WakeEvent::NotificationReceived);
        assert_eq!(
            cycle.process_event(WakeEvent::GraceElapsed),
            TransitionResult::Unchanged
        );
        assert_eq!(cycle.state(), WakeCycleState::Draining);
    }

    #[test]
    fn test_sleep_ordered_from_any_awake_state() {
        let mut cycle = WakeCycle::new();
        cycle.process_event(WakeEvent::NotificationReceived);
        assert!(matches!(
            cycle.process_event(WakeEvent::SleepOrdered),
            TransitionResult::Changed {
                to: WakeCycleState::Asleep,
                ..
            }
        ));

        cycle.process_event(WakeEvent::NotificationReceived);
        cycle.process_event(WakeEvent::QueueDrained);
        assert!(matches!(
            cycle.process_event(WakeEvent::SleepOrdered),
            TransitionResult::Changed {
                to: WakeCycleState::Asleep,
                ..
            }
        ));
    }

    #[test]
    fn test_sleep_ordered_while_asleep_is_noop() {
        let mut cycle = WakeCycle::new();
        assert_eq!(
            cycle.process_event(WakeEvent::SleepOrdered),
            TransitionResult::Unchanged
        );
    }

    #[test]
    fn test_queue_drained_only_applies_while_draining() {
        let mut cycle = WakeCycle::new();
        assert_eq!(
            cycle.process_event(WakeEvent::QueueDrained),
            TransitionResult::Unchanged
        );

        cycle.process_event(WakeEvent::NotificationReceived);
        cycle.process_event(WakeEvent::QueueDrained);
        assert_eq!(
            cycle.process_event(WakeEvent::QueueDrained),
            TransitionResult::Unchanged
        );
        assert_eq!(cycle.state(), WakeCycleState::Idle);
    }
}
