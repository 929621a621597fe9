//! The contract between the state machine and its per-host runtime.
//!
//! The state machine is manager-agnostic: every side effect it wants
//! (publishing a message, scheduling a timer, handing the bucket map to
//! the work router) goes through the [`Manager`] trait. Exactly one manager
//! exists per host process and is injected into the machine at
//! construction; there is no process-wide singleton.

use crate::assignment::BucketAssignments;
use crate::config::TimerConfig;
use crate::protocol::Envelope;
use crate::types::{ChannelId, HostId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Timer firings the state machine understands.
///
/// A timer is scheduled by a state, carries the machine generation it was
/// scheduled under, and is discarded on delivery if the machine has since
/// transitioned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
    /// Repeating self-heartbeat generator (Start and Active).
    HeartbeatTick,

    /// Start gave up waiting for its own heartbeat echo.
    HeartbeatWait,

    /// Query gave up waiting for Identification/Leader replies.
    QueryWait,

    /// An Active follower has heard nothing from the leader for too long.
    LeaderWait,

    /// Inactive is due to retry from Start.
    ReactivationWait,
}

/// Per-host runtime consumed by the state machine.
pub trait Manager: Send + Sync + 'static {
    /// This host's id.
    fn host(&self) -> &HostId;

    /// This host's own data channel (heartbeats are published here).
    fn topic(&self) -> &ChannelId;

    /// The cluster-wide administrative channel.
    fn admin_channel(&self) -> &ChannelId;

    /// Timer intervals for the state machine.
    fn timer_config(&self) -> &TimerConfig;

    /// The latest assignment snapshot handed to [`Manager::start_distributing`],
    /// if any.
    fn assignments(&self) -> Option<BucketAssignments>;

    /// Publish a message on the given channel. Fire-and-forget: transport
    /// failures are the collaborator's concern and surface, if sustained,
    /// as an `internal_topic_failed` call on the machine.
    fn publish(&self, channel: &ChannelId, message: Envelope);

    /// Broadcast a message on the administrative channel.
    fn publish_admin(&self, message: Envelope);

    /// Hand the authoritative bucket map to the collaborator that routes
    /// work. `None` clears any existing distribution.
    fn start_distributing(&self, assignments: Option<BucketAssignments>);

    /// Schedule a one-shot timer.
    fn schedule(&self, generation: u64, delay: Duration, event: TimerEvent) -> TimerHandle;

    /// Schedule a repeating timer with an initial delay.
    fn schedule_repeating(
        &self,
        generation: u64,
        initial: Duration,
        every: Duration,
        event: TimerEvent,
    ) -> TimerHandle;
}

/// Cancellable handle to a scheduled timer.
///
/// Cancelling is idempotent. A handle backed by a tokio task aborts the
/// task; the shared flag additionally stops a firing that is already in
/// flight from dispatching.
#[derive(Debug)]
pub struct TimerHandle {
    cancelled: Arc<AtomicBool>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl TimerHandle {
    /// Handle backed by a spawned timer task.
    pub fn new(cancelled: Arc<AtomicBool>, task: tokio::task::JoinHandle<()>) -> Self {
        Self {
            cancelled,
            task: Some(task),
        }
    }

    /// Handle backed only by a flag, for schedulers (and test doubles)
    /// that poll the flag themselves.
    pub fn from_flag(cancelled: Arc<AtomicBool>) -> Self {
        Self {
            cancelled,
            task: None,
        }
    }

    /// Cancel the timer. Safe to call more than once.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Some(task) = &self.task {
            task.abort();
        }
    }

    /// Whether the timer has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// The cancellation bag a state carries for the timers it created.
///
/// Drained exactly once when the state is replaced, so a late firing that
/// belonged to a previous state can never act on the next one.
#[derive(Debug, Default)]
pub struct TimerBag {
    handles: Vec<TimerHandle>,
}

impl TimerBag {
    /// Create an empty bag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a handle for cancellation on state exit.
    pub fn track(&mut self, handle: TimerHandle) {
        self.handles.push(handle);
    }

    /// Number of tracked handles.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// True when no handles are tracked.
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Cancel and drop every tracked handle.
    pub fn cancel_all(&mut self) {
        for handle in self.handles.drain(..) {
            handle.cancel();
        }
    }
}

impl Drop for TimerBag {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
