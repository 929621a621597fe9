//! tokio-backed runtime wiring around the state machine.
//!
//! The state machine itself is transport- and scheduler-agnostic; this
//! module supplies the production glue: a [`MessageBus`] seam for whatever
//! pub/sub client the process uses, a [`WorkRouter`] seam for the engine
//! that actually processes owned buckets, and [`HostRuntime`], which
//! implements the [`Manager`] contract on top of tokio timers and feeds
//! inbound frames back into the machine.
//!
//! ```text
//!   transport listener ──frames──► HostRuntime::deliver ──► StateMachine
//!   membership detector ─────────► HostRuntime::membership_changed
//!   tokio timer tasks ───────────► StateMachine::handle_timer
//!   StateMachine ──publish──────► MessageBus       (encoded envelopes)
//!   StateMachine ──distribute───► WorkRouter       (bucket map handoff)
//! ```

use crate::assignment::BucketAssignments;
use crate::config::{CoordinatorConfig, TimerConfig};
use crate::coordination::StateMachine;
use crate::error::{Error, Result};
use crate::manager::{Manager, TimerEvent, TimerHandle};
use crate::metrics::CoordinationMetrics;
use crate::protocol::Envelope;
use crate::types::{ChannelId, HostId};
use bytes::Bytes;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::warn;

/// Outbound seam to the process's pub/sub transport.
///
/// Publishes are fire-and-forget; an implementation that detects a
/// sustained channel failure should report it through
/// [`HostRuntime::topic_failed`] rather than through the return value of
/// individual sends.
pub trait MessageBus: Send + Sync + 'static {
    /// Publish an encoded envelope on the given channel.
    fn publish(&self, channel: &ChannelId, frame: Bytes) -> Result<()>;
}

/// Seam to the collaborator that routes work for owned buckets.
pub trait WorkRouter: Send + Sync + 'static {
    /// Adopt a new authoritative bucket map, or drop the current one.
    fn start_distributing(&self, assignments: Option<BucketAssignments>);
}

/// Per-host runtime: owns the channel identities, the timer scheduler and
/// the hand-off to the work router, and drives one [`StateMachine`].
///
/// Must be started (and its timers driven) inside a tokio runtime.
pub struct HostRuntime {
    config: CoordinatorConfig,
    bus: Arc<dyn MessageBus>,
    router: Arc<dyn WorkRouter>,
    assignments: RwLock<Option<BucketAssignments>>,
    machine: RwLock<Weak<StateMachine>>,
    metrics: RwLock<Option<Arc<CoordinationMetrics>>>,
}

impl HostRuntime {
    /// Create a runtime over the given collaborators.
    pub fn new(
        config: CoordinatorConfig,
        bus: Arc<dyn MessageBus>,
        router: Arc<dyn WorkRouter>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            bus,
            router,
            assignments: RwLock::new(None),
            machine: RwLock::new(Weak::new()),
            metrics: RwLock::new(None),
        })
    }

    /// Build the state machine, wire timer routing back to it and enter
    /// the Start state.
    pub fn start(self: &Arc<Self>) -> Arc<StateMachine> {
        let machine = StateMachine::new(self.clone() as Arc<dyn Manager>);
        *self.machine.write() = Arc::downgrade(&machine);
        *self.metrics.write() = Some(machine.metrics());
        machine.start();
        machine
    }

    /// Hand an inbound wire frame to the machine.
    pub fn deliver(&self, frame: &[u8]) -> Result<()> {
        let envelope = Envelope::from_bytes(frame)?;
        self.with_machine(|machine| machine.handle_message(&envelope))
    }

    /// The transport reports the coordination channel unusable.
    pub fn topic_failed(&self) {
        let machine = self.machine.read().upgrade();
        if let Some(machine) = machine {
            machine.internal_topic_failed();
        }
    }

    /// The liveness collaborator reports this host's heartbeats are not
    /// getting through.
    pub fn heartbeat_missed(&self) {
        let machine = self.machine.read().upgrade();
        if let Some(machine) = machine {
            machine.missed_heartbeat();
        }
    }

    /// The membership detector reports a changed live set. Sorted
    /// ascending, local host first; accepted only while this host leads.
    pub fn membership_changed(&self, live_hosts: &[HostId]) -> Result<()> {
        self.with_machine(|machine| machine.become_leader(live_hosts))
    }

    fn with_machine<T>(&self, f: impl FnOnce(&StateMachine) -> Result<T>) -> Result<T> {
        // Take the reference and release the lock before dispatching; the
        // dispatch path acquires it again when a state schedules timers.
        let machine = self.machine.read().upgrade();
        match machine {
            Some(machine) => f(&machine),
            None => Err(Error::contract("runtime has not been started")),
        }
    }

    fn dispatch(machine: &Weak<StateMachine>, generation: u64, event: TimerEvent) {
        if let Some(machine) = machine.upgrade() {
            machine.handle_timer(generation, event);
        }
    }
}

impl Manager for HostRuntime {
    fn host(&self) -> &HostId {
        &self.config.host
    }

    fn topic(&self) -> &ChannelId {
        &self.config.data_channel
    }

    fn admin_channel(&self) -> &ChannelId {
        &self.config.admin_channel
    }

    fn timer_config(&self) -> &TimerConfig {
        &self.config.timers
    }

    fn assignments(&self) -> Option<BucketAssignments> {
        self.assignments.read().clone()
    }

    fn publish(&self, channel: &ChannelId, message: Envelope) {
        let frame = match message.to_bytes() {
            Ok(frame) => Bytes::from(frame),
            Err(e) => {
                warn!(error = %e, "dropping unencodable message");
                return;
            }
        };
        if let Err(e) = self.bus.publish(channel, frame) {
            warn!(error = %e, %channel, "publish failed");
        }
    }

    fn publish_admin(&self, message: Envelope) {
        let channel = self.config.admin_channel.clone();
        self.publish(&channel, message);
    }

    fn start_distributing(&self, assignments: Option<BucketAssignments>) {
        *self.assignments.write() = assignments.clone();

        if let Some(metrics) = self.metrics.read().as_ref() {
            let owned = assignments
                .as_ref()
                .map(|a| a.count_for(&self.config.host))
                .unwrap_or(0);
            let leads = assignments
                .as_ref()
                .and_then(|a| a.leader().cloned())
                .map(|l| l == self.config.host)
                .unwrap_or(false);
            metrics.owned_buckets.set(owned as i64);
            metrics.is_leader.set(i64::from(leads));
        }

        self.router.start_distributing(assignments);
    }

    fn schedule(&self, generation: u64, delay: Duration, event: TimerEvent) -> TimerHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = cancelled.clone();
        let machine = self.machine.read().clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if !flag.load(Ordering::SeqCst) {
                Self::dispatch(&machine, generation, event);
            }
        });
        TimerHandle::new(cancelled, task)
    }

    fn schedule_repeating(
        &self,
        generation: u64,
        initial: Duration,
        every: Duration,
        event: TimerEvent,
    ) -> TimerHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = cancelled.clone();
        let machine = self.machine.read().clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(initial).await;
            loop {
                if flag.load(Ordering::SeqCst) {
                    break;
                }
                Self::dispatch(&machine, generation, event);
                tokio::time::sleep(every).await;
            }
        });
        TimerHandle::new(cancelled, task)
    }
}

impl std::fmt::Debug for HostRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostRuntime")
            .field("host", &self.config.host)
            .field("data_channel", &self.config.data_channel)
            .field("admin_channel", &self.config.admin_channel)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination::StateKind;
    use crate::protocol::Payload;
    use crate::testing::harness::{InMemoryBus, RecordingRouter};
    use crate::testing::wait_for;

    fn runtime_with(config: CoordinatorConfig) -> (Arc<HostRuntime>, Arc<InMemoryBus>, Arc<RecordingRouter>) {
        let bus = InMemoryBus::new();
        let router = Arc::new(RecordingRouter::new());
        let runtime = HostRuntime::new(config, bus.clone(), router.clone());
        (runtime, bus, router)
    }

    #[tokio::test]
    async fn test_start_publishes_decodable_heartbeat() {
        let config = CoordinatorConfig::new("host-a").with_timers(TimerConfig::fast());
        let (runtime, bus, _router) = runtime_with(config.clone());
        let _machine = runtime.start();

        let frames = bus.frames_on(&config.data_channel);
        assert_eq!(frames.len(), 1);
        let envelope = Envelope::from_bytes(&frames[0]).unwrap();
        assert_eq!(envelope.source, "host-a");
        assert!(matches!(envelope.payload, Payload::Heartbeat { .. }));
    }

    #[tokio::test]
    async fn test_delivering_echo_advances_to_query() {
        let config = CoordinatorConfig::new("host-a").with_timers(TimerConfig::fast());
        let (runtime, bus, _router) = runtime_with(config.clone());
        let machine = runtime.start();

        let echo = bus.frames_on(&config.data_channel).remove(0);
        runtime.deliver(&echo).unwrap();
        assert_eq!(machine.current_kind(), StateKind::Query);

        // The Query broadcast went out on the admin channel.
        let admin = bus.frames_on(&config.admin_channel);
        let envelope = Envelope::from_bytes(&admin[0]).unwrap();
        assert!(matches!(envelope.payload, Payload::Query));
    }

    #[tokio::test]
    async fn test_silent_channel_parks_inactive() {
        let config = CoordinatorConfig::new("host-a").with_timers(TimerConfig::fast());
        let (runtime, _bus, router) = runtime_with(config);
        let machine = runtime.start();

        // Never deliver the echo; the heartbeat wait must fire.
        let parked = wait_for(Duration::from_secs(2), || {
            machine.current_kind() == StateKind::Inactive
        })
        .await;
        assert!(parked);
        assert_eq!(router.distribution_count(), 1);
        assert!(router.current().is_none());
    }

    #[tokio::test]
    async fn test_garbage_frame_is_rejected() {
        let config = CoordinatorConfig::new("host-a").with_timers(TimerConfig::fast());
        let (runtime, _bus, _router) = runtime_with(config);
        let _machine = runtime.start();

        assert!(runtime.deliver(b"not an envelope").is_err());
    }

    #[tokio::test]
    async fn test_unstarted_runtime_rejects_delivery() {
        let config = CoordinatorConfig::new("host-a");
        let (runtime, _bus, _router) = runtime_with(config);

        let frame = Envelope::query("host-b".into(), "corral.admin".into())
            .to_bytes()
            .unwrap();
        assert!(runtime.deliver(&frame).is_err());
    }
}
