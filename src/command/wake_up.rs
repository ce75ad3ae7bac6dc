//! Wake/sleep lifecycle handling for battery-powered nodes
//!
//! Sleeping nodes cannot receive commands. Outbound traffic is parked in a
//! per-node FIFO until the node announces itself awake, flushed in order,
//! and the node is released back to sleep with a no-more-information
//! command once the queue stays empty.
//!
//! Three contexts converge here: the network layer delivering inbound
//! payloads, application code producing commands, and timer callbacks. One
//! lock per node guards the queue and the wake flags as a single unit; it
//! is never held across a transport forward.

use super::adapter::{CommandAdapter, StateQuery};
use super::CommandError;
use crate::config::WakeUpTiming;
use crate::timer::{TimerHandle, TimerService};
use crate::transport::{DeliveryClass, OutboundCommand, Transport};
use crate::values::{ConfigValue, ValueIndex, ValueKey, ValueStore, WAKE_INTERVAL_INDEX};
use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, trace, warn};
use wakehub_shared::codec::{self, CodecError, WakeUpCommand};
use wakehub_shared::state_machine::{TransitionResult, WakeCycle, WakeEvent};
use wakehub_shared::{
    timing, IntervalCapabilities, NodeId, COMMAND_CLASS_WAKE_UP, WAKE_UP_VERSION_MAX,
};

/// Commands waiting for the node's next wake window. Items leave exactly
/// once, at flush time, in insertion order.
#[derive(Default)]
struct PendingQueue {
    items: VecDeque<OutboundCommand>,
}

impl PendingQueue {
    fn push(&mut self, item: OutboundCommand) {
        self.items.push_back(item);
    }

    /// Driver-internal items may jump the line; application traffic keeps
    /// its relative order.
    fn push_front(&mut self, item: OutboundCommand) {
        self.items.push_front(item);
    }

    fn pop(&mut self) -> Option<OutboundCommand> {
        self.items.pop_front()
    }

    fn len(&self) -> usize {
        self.items.len()
    }

    fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn clear(&mut self) {
        self.items.clear();
    }
}

/// Everything the per-node lock guards. The queue and the wake flags are
/// only read or written together, under the lock.
struct WakeUpState {
    cycle: WakeCycle,
    queue: PendingQueue,
    poll_required: bool,
    /// Seconds between scheduled self-wakes. Meaningful only when
    /// `interval_known`; an unnegotiated interval is not "wakes every
    /// zero seconds".
    interval: u32,
    interval_known: bool,
    capabilities: Option<IntervalCapabilities>,
    /// An interval query is already queued or in flight.
    interval_request_outstanding: bool,
    version: u8,
    /// A drain currently owns the forward path.
    draining: bool,
    /// Cycle id the last no-more-information was sent for.
    no_more_info_sent: Option<u32>,
    no_more_info_timer: Option<TimerHandle>,
    grace_timer: Option<TimerHandle>,
    poll_timer: Option<TimerHandle>,
    detached: bool,
}

impl WakeUpState {
    fn new(version: u8) -> Self {
        Self {
            cycle: WakeCycle::new(),
            queue: PendingQueue::default(),
            poll_required: false,
            interval: 0,
            interval_known: false,
            capabilities: None,
            interval_request_outstanding: false,
            version: version.clamp(1, WAKE_UP_VERSION_MAX),
            draining: false,
            no_more_info_sent: None,
            no_more_info_timer: None,
            grace_timer: None,
            poll_timer: None,
            detached: false,
        }
    }
}

struct Inner {
    node: NodeId,
    /// Node id version-2 peers are told to notify on wake.
    hub_node: NodeId,
    timing: WakeUpTiming,
    transport: Arc<dyn Transport>,
    timer: Arc<dyn TimerService>,
    values: Arc<ValueStore>,
    state: Mutex<WakeUpState>,
}

/// Wake/sleep lifecycle handle for one node. Clones share state.
#[derive(Clone)]
pub struct WakeUp {
    inner: Arc<Inner>,
}

impl WakeUp {
    pub fn new(
        node: NodeId,
        version: u8,
        hub_node: NodeId,
        timing: WakeUpTiming,
        transport: Arc<dyn Transport>,
        timer: Arc<dyn TimerService>,
        values: Arc<ValueStore>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                node,
                hub_node,
                timing,
                transport,
                timer,
                values,
                state: Mutex::new(WakeUpState::new(version)),
            }),
        }
    }

    /// Begin the capability bootstrap for a freshly provisioned node:
    /// queue a query for its wake interval (and, for version-2 nodes, its
    /// supported range). Idempotent while a query is outstanding.
    pub async fn init(&self) -> Result<(), CommandError> {
        {
            let mut state = self.inner.state.lock().await;
            if state.detached || state.interval_known || state.interval_request_outstanding {
                return Ok(());
            }
            state.interval_request_outstanding = true;
        }
        self.request_state(StateQuery::Static).await?;
        Ok(())
    }

    /// Park one command for the node's next wake window. If the node is
    /// awake the queue is drained right away; a single queue-then-drain
    /// path keeps ordering uniform.
    pub async fn queue_msg(&self, item: OutboundCommand) {
        let drain = {
            let mut state = self.inner.state.lock().await;
            if state.detached {
                debug!(node = self.inner.node, "dropping command for removed node");
                return;
            }
            state.queue.push(item);
            trace!(
                node = self.inner.node,
                depth = state.queue.len(),
                "command parked for next wake window"
            );
            state.cycle.is_awake() && !state.draining
        };
        if drain {
            if let Err(e) = self.send_pending().await {
                warn!(node = self.inner.node, error = %e, "drain after enqueue failed");
            }
        }
    }

    /// Whether the node is currently believed awake.
    pub async fn is_awake(&self) -> bool {
        self.inner.state.lock().await.cycle.is_awake()
    }

    /// Number of commands parked for the next wake window.
    pub async fn pending_count(&self) -> usize {
        self.inner.state.lock().await.queue.len()
    }

    /// Mark the node's values stale; they are re-queried on the next wake
    /// window.
    pub async fn set_poll_required(&self) {
        self.inner.state.lock().await.poll_required = true;
    }

    /// Last wake interval the node reported, if any.
    pub async fn wake_interval(&self) -> Option<u32> {
        let state = self.inner.state.lock().await;
        state.interval_known.then_some(state.interval)
    }

    /// Adopt the version the discovery layer negotiated, capped at what
    /// this driver implements.
    pub async fn set_version(&self, version: u8) {
        self.inner.state.lock().await.version = version.clamp(1, WAKE_UP_VERSION_MAX);
    }

    /// Transition the awake flag. Asleep-to-awake triggers a drain;
    /// repeating the current state is a no-op. Awake-to-asleep leaves the
    /// queue accumulating.
    pub async fn set_awake(&self, awake: bool) {
        if awake {
            let drain = {
                let mut state = self.inner.state.lock().await;
                if state.detached || state.cycle.is_awake() {
                    false
                } else {
                    self.enter_wake_window(&mut state)
                }
            };
            if drain {
                if let Err(e) = self.send_pending().await {
                    warn!(node = self.inner.node, error = %e, "drain after wake failed");
                }
            }
        } else {
            let mut state = self.inner.state.lock().await;
            if let TransitionResult::Changed { .. } =
                state.cycle.process_event(WakeEvent::SleepOrdered)
            {
                info!(node = self.inner.node, "node ordered asleep");
                for handle in [state.no_more_info_timer.take(), state.grace_timer.take()]
                    .into_iter()
                    .flatten()
                {
                    self.inner.timer.cancel(handle);
                }
            }
        }
    }

    /// Flush every parked command to the transport in order, then arm the
    /// deferred no-more-information send. At most one drain runs per node;
    /// concurrent triggers coalesce into the drain already in flight, which
    /// re-checks the queue before closing the window.
    pub async fn send_pending(&self) -> Result<usize, CommandError> {
        let cycle = {
            let mut state = self.inner.state.lock().await;
            if state.detached || !state.cycle.is_awake() {
                trace!(node = self.inner.node, "nothing to drain: node not awake");
                return Ok(0);
            }
            if state.draining {
                debug!(node = self.inner.node, "drain already in flight");
                return Ok(0);
            }
            if state.no_more_info_sent == Some(state.cycle.cycle()) {
                trace!(node = self.inner.node, "wake window already closed");
                return Ok(0);
            }
            state.draining = true;
            state.cycle.cycle()
        };

        let mut sent = 0usize;
        loop {
            let item = {
                let mut state = self.inner.state.lock().await;
                if state.detached || !state.cycle.is_awake() {
                    state.draining = false;
                    debug!(node = self.inner.node, sent, "drain stopped: node went asleep");
                    return Ok(sent);
                }
                match state.queue.pop() {
                    Some(item) => item,
                    None => {
                        state.draining = false;
                        self.arm_no_more_info(&mut state, cycle);
                        return Ok(sent);
                    }
                }
            };

            // Lock released: the forward must not stall other queue
            // operations.
            if let Err(e) = self.inner.transport.forward(item).await {
                let mut state = self.inner.state.lock().await;
                state.draining = false;
                // The failed item is not re-queued; later items stay parked.
                warn!(node = self.inner.node, error = %e, "transport refused queued command");
                return Err(CommandError::Transport(e));
            }
            sent += 1;
        }
    }

    /// Tell the node it may return to sleep. Tagged with the wake cycle it
    /// closes; a late or duplicate invocation for a closed cycle is
    /// dropped.
    pub async fn send_no_more_info(&self, cycle: u32) {
        let payload = {
            let mut state = self.inner.state.lock().await;
            if state.detached || state.cycle.cycle() != cycle {
                debug!(
                    node = self.inner.node,
                    cycle, "dropping no-more-information for a closed cycle"
                );
                return;
            }
            state.no_more_info_timer = None;
            if !state.cycle.is_awake() || state.no_more_info_sent == Some(cycle) {
                debug!(node = self.inner.node, cycle, "duplicate no-more-information dropped");
                return;
            }
            if state.draining || !state.queue.is_empty() {
                // Late arrivals own the window again; the next drain re-arms
                // the close-out.
                drop(state);
                if let Err(e) = self.send_pending().await {
                    warn!(node = self.inner.node, error = %e, "re-drain before close-out failed");
                }
                return;
            }
            state.no_more_info_sent = Some(cycle);
            state.cycle.process_event(WakeEvent::QueueDrained);
            match class_payload(&WakeUpCommand::NoMoreInformation, state.version) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(node = self.inner.node, error = %e, "failed to encode no-more-information");
                    return;
                }
            }
        };

        let item = OutboundCommand {
            node: self.inner.node,
            payload,
            delivery: DeliveryClass::Command,
        };
        if let Err(e) = self.inner.transport.forward(item).await {
            warn!(node = self.inner.node, error = %e, "failed to send no-more-information");
        } else {
            info!(node = self.inner.node, cycle, "wake window closed");
        }

        // Give the node a grace window to re-announce before it is assumed
        // asleep.
        let mut state = self.inner.state.lock().await;
        if state.detached || state.cycle.cycle() != cycle {
            return;
        }
        let this = self.clone();
        let handle = self.inner.timer.schedule_once(
            self.inner.timing.grace_window,
            Box::new(move || Box::pin(async move { this.on_grace_elapsed(cycle).await })),
        );
        if let Some(old) = state.grace_timer.replace(handle) {
            self.inner.timer.cancel(old);
        }
    }

    /// Tear the node down: cancel outstanding timers and discard parked
    /// commands. Invoked when the node is removed from the network.
    pub async fn detach(&self) {
        let mut state = self.inner.state.lock().await;
        state.detached = true;
        for handle in [
            state.no_more_info_timer.take(),
            state.grace_timer.take(),
            state.poll_timer.take(),
        ]
        .into_iter()
        .flatten()
        {
            self.inner.timer.cancel(handle);
        }
        let dropped = state.queue.len();
        state.queue.clear();
        state.cycle.process_event(WakeEvent::SleepOrdered);
        if dropped > 0 {
            debug!(node = self.inner.node, dropped, "discarded queued commands on removal");
        }
        info!(node = self.inner.node, "wake-up handler detached");
    }

    /// Under the lock: open a new wake window if the notification is not
    /// coalesced into an active drain. Returns whether a drain should run.
    fn enter_wake_window(&self, state: &mut WakeUpState) -> bool {
        match state.cycle.process_event(WakeEvent::NotificationReceived) {
            TransitionResult::Changed { .. } => {
                info!(
                    node = self.inner.node,
                    cycle = state.cycle.cycle(),
                    queued = state.queue.len(),
                    "node is awake"
                );
                // Timers armed for the previous window carry a stale cycle id.
                for handle in [state.no_more_info_timer.take(), state.grace_timer.take()]
                    .into_iter()
                    .flatten()
                {
                    self.inner.timer.cancel(handle);
                }
                if state.poll_required {
                    match class_payload(&WakeUpCommand::IntervalGet, state.version) {
                        Ok(payload) => {
                            state.poll_required = false;
                            // Stale values refresh ahead of application
                            // traffic.
                            state.queue.push_front(OutboundCommand {
                                node: self.inner.node,
                                payload,
                                delivery: DeliveryClass::Poll,
                            });
                            debug!(node = self.inner.node, "queued stale-value re-poll");
                        }
                        Err(e) => {
                            warn!(node = self.inner.node, error = %e, "failed to encode re-poll")
                        }
                    }
                }
                true
            }
            TransitionResult::Unchanged => {
                debug!(
                    node = self.inner.node,
                    "wake notification coalesced into active drain"
                );
                false
            }
        }
    }

    async fn on_wake_notification(&self) {
        {
            let mut state = self.inner.state.lock().await;
            if state.detached {
                return;
            }
            self.enter_wake_window(&mut state);
        }
        // A coalesced notification still re-checks the queue: if an earlier
        // drain aborted on a transport failure, the node announcing itself
        // again is the retry trigger. The draining flag keeps an in-flight
        // drain the only sender.
        if let Err(e) = self.send_pending().await {
            warn!(node = self.inner.node, error = %e, "drain after wake notification failed");
        }
    }

    /// Under the lock: schedule the deferred no-more-information for
    /// `cycle` unless one is armed or already out.
    fn arm_no_more_info(&self, state: &mut WakeUpState, cycle: u32) {
        if state.no_more_info_sent == Some(cycle) || state.no_more_info_timer.is_some() {
            return;
        }
        let this = self.clone();
        let handle = self.inner.timer.schedule_once(
            self.inner.timing.no_more_info_delay,
            Box::new(move || Box::pin(async move { this.send_no_more_info(cycle).await })),
        );
        state.no_more_info_timer = Some(handle);
        trace!(node = self.inner.node, cycle, "no-more-information armed");
    }

    async fn on_grace_elapsed(&self, cycle: u32) {
        let mut state = self.inner.state.lock().await;
        if state.detached || state.cycle.cycle() != cycle {
            return;
        }
        state.grace_timer = None;
        if let TransitionResult::Changed { .. } = state.cycle.process_event(WakeEvent::GraceElapsed)
        {
            info!(
                node = self.inner.node,
                cycle, "no activity in grace window; assuming node asleep"
            );
        }
    }

    /// Under the lock: (re-)arm the poll trigger for the reported interval.
    fn arm_poll_timer(&self, state: &mut WakeUpState) {
        if let Some(handle) = state.poll_timer.take() {
            self.inner.timer.cancel(handle);
        }
        // Interval zero means the node never self-wakes on a schedule.
        if !state.interval_known || state.interval == 0 {
            return;
        }
        let this = self.clone();
        let handle = self.inner.timer.schedule_once(
            Duration::from_secs(u64::from(state.interval)),
            Box::new(move || Box::pin(async move { this.on_poll_due().await })),
        );
        state.poll_timer = Some(handle);
    }

    async fn on_poll_due(&self) {
        let mut state = self.inner.state.lock().await;
        if state.detached {
            return;
        }
        state.poll_timer = None;
        state.poll_required = true;
        debug!(node = self.inner.node, "wake interval elapsed; values marked stale");
        self.arm_poll_timer(&mut state);
    }

    async fn on_interval_report(&self, seconds: u32) {
        {
            let mut state = self.inner.state.lock().await;
            if state.detached {
                return;
            }
            state.interval = seconds;
            state.interval_known = true;
            state.interval_request_outstanding = false;
            info!(node = self.inner.node, seconds, "wake interval reported");
            self.arm_poll_timer(&mut state);
        }
        self.inner
            .values
            .update(
                ValueKey {
                    node: self.inner.node,
                    index: WAKE_INTERVAL_INDEX,
                },
                seconds,
            )
            .await;
    }

    async fn on_capability_report(&self, caps: IntervalCapabilities) {
        let mut state = self.inner.state.lock().await;
        if state.detached {
            return;
        }
        info!(
            node = self.inner.node,
            min = caps.min_secs,
            max = caps.max_secs,
            "wake interval capabilities reported"
        );
        state.capabilities = Some(caps);
    }
}

#[async_trait]
impl CommandAdapter for WakeUp {
    fn class_id(&self) -> u8 {
        COMMAND_CLASS_WAKE_UP
    }

    fn class_name(&self) -> &'static str {
        "COMMAND_CLASS_WAKE_UP"
    }

    fn max_version(&self) -> u8 {
        WAKE_UP_VERSION_MAX
    }

    async fn handle_msg(&self, data: &[u8], instance: u8) -> Result<bool, CommandError> {
        if instance != 1 {
            return Err(CommandError::MultiInstance(instance));
        }

        let version = self.inner.state.lock().await.version;
        let cmd = match codec::parse_wake_up(data, version) {
            Ok(cmd) => cmd,
            Err(e) => {
                debug!(node = self.inner.node, error = %e, "unrecognized wake-up payload");
                return Ok(false);
            }
        };

        match cmd {
            WakeUpCommand::IntervalReport { seconds } => {
                self.on_interval_report(seconds).await;
                Ok(true)
            }
            WakeUpCommand::Notification { notify_node } => {
                if let Some(other) = notify_node.filter(|n| *n != self.inner.hub_node) {
                    debug!(
                        node = self.inner.node,
                        notifies = other,
                        "node reports to a different controller"
                    );
                }
                self.on_wake_notification().await;
                Ok(true)
            }
            WakeUpCommand::IntervalCapabilityReport(caps) => {
                self.on_capability_report(caps).await;
                Ok(true)
            }
            other => {
                // Hub-to-node commands echoed back are not ours to handle.
                debug!(node = self.inner.node, cmd = ?other, "unexpected wake-up command");
                Ok(false)
            }
        }
    }

    async fn set_value(&self, index: ValueIndex, value: u32) -> Result<(), CommandError> {
        if index != WAKE_INTERVAL_INDEX {
            return Err(CommandError::UnknownValueIndex(index));
        }

        let (version, notify_node) = {
            let state = self.inner.state.lock().await;
            if let Some(caps) = &state.capabilities {
                if !caps.contains(value) {
                    return Err(CommandError::IntervalOutOfRange {
                        value,
                        min: caps.min_secs,
                        max: caps.max_secs,
                    });
                }
            } else if value > timing::MAX_WAKE_INTERVAL_SECS {
                return Err(CommandError::IntervalOutOfRange {
                    value,
                    min: 0,
                    max: timing::MAX_WAKE_INTERVAL_SECS,
                });
            }
            (
                state.version,
                (state.version >= 2).then_some(self.inner.hub_node),
            )
        };

        let set = class_payload(
            &WakeUpCommand::IntervalSet {
                seconds: value,
                notify_node,
            },
            version,
        )?;
        let get = class_payload(&WakeUpCommand::IntervalGet, version)?;

        self.queue_msg(OutboundCommand {
            node: self.inner.node,
            payload: set,
            delivery: DeliveryClass::Command,
        })
        .await;
        // The cached interval only moves on the read-back report.
        self.queue_msg(OutboundCommand {
            node: self.inner.node,
            payload: get,
            delivery: DeliveryClass::Query,
        })
        .await;
        Ok(())
    }

    async fn request_state(&self, query: StateQuery) -> Result<bool, CommandError> {
        match query {
            StateQuery::Static => {
                let (version, want_capabilities) = {
                    let state = self.inner.state.lock().await;
                    (
                        state.version,
                        state.version >= 2 && state.capabilities.is_none(),
                    )
                };
                let get = class_payload(&WakeUpCommand::IntervalGet, version)?;
                self.queue_msg(OutboundCommand {
                    node: self.inner.node,
                    payload: get,
                    delivery: DeliveryClass::Query,
                })
                .await;
                if want_capabilities {
                    let caps = class_payload(&WakeUpCommand::IntervalCapabilityGet, version)?;
                    self.queue_msg(OutboundCommand {
                        node: self.inner.node,
                        payload: caps,
                        delivery: DeliveryClass::Query,
                    })
                    .await;
                }
                Ok(true)
            }
            // The wake interval is static configuration; nothing here goes
            // stale dynamically.
            StateQuery::Dynamic => Ok(false),
        }
    }

    async fn request_value(&self, index: ValueIndex) -> Result<bool, CommandError> {
        if index != WAKE_INTERVAL_INDEX {
            return Err(CommandError::UnknownValueIndex(index));
        }
        let version = self.inner.state.lock().await.version;
        let get = class_payload(&WakeUpCommand::IntervalGet, version)?;
        self.queue_msg(OutboundCommand {
            node: self.inner.node,
            payload: get,
            delivery: DeliveryClass::Query,
        })
        .await;
        Ok(true)
    }

    async fn create_vars(&self) {
        self.inner
            .values
            .register(
                ValueKey {
                    node: self.inner.node,
                    index: WAKE_INTERVAL_INDEX,
                },
                ConfigValue {
                    label: "Wake-up Interval",
                    units: "seconds",
                    value: 0,
                    writable: true,
                },
            )
            .await;
    }
}

/// Build a full command-class payload, class id byte first.
fn class_payload(cmd: &WakeUpCommand, version: u8) -> Result<Bytes, CodecError> {
    let body = codec::encode_wake_up(cmd, version)?;
    let mut buf = BytesMut::with_capacity(1 + body.len());
    buf.put_u8(COMMAND_CLASS_WAKE_UP);
    buf.extend_from_slice(&body);
    Ok(buf.freeze())
}
