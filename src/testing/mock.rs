//! A recording manager for driving states in isolation.

use crate::assignment::BucketAssignments;
use crate::config::TimerConfig;
use crate::manager::{Manager, TimerEvent, TimerHandle};
use crate::protocol::Envelope;
use crate::types::{data_channel_for, ChannelId, HostId, DEFAULT_ADMIN_CHANNEL};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A timer registration recorded by [`MockManager`].
#[derive(Debug, Clone)]
pub struct ScheduledTimer {
    /// Machine generation the timer was scheduled under.
    pub generation: u64,
    /// Initial delay.
    pub delay: Duration,
    /// Repeat interval, for repeating timers.
    pub every: Option<Duration>,
    /// The event the timer would dispatch.
    pub event: TimerEvent,
    flag: Arc<AtomicBool>,
}

impl ScheduledTimer {
    /// Whether the handle returned for this registration was cancelled.
    pub fn handle_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Manager test double: records every publish, distribution hand-off and
/// timer registration instead of performing it.
///
/// Timers never fire on their own (tests deliver [`TimerEvent`]s
/// directly), so the mock works without a tokio runtime.
pub struct MockManager {
    host: HostId,
    topic: ChannelId,
    admin: ChannelId,
    timers: TimerConfig,
    assignments: Mutex<Option<BucketAssignments>>,
    published: Mutex<Vec<(ChannelId, Envelope)>>,
    distributions: Mutex<Vec<Option<BucketAssignments>>>,
    scheduled: Mutex<Vec<ScheduledTimer>>,
}

impl MockManager {
    /// Create a mock for the given host id.
    pub fn new(host: impl Into<HostId>) -> Self {
        let host = host.into();
        let topic = data_channel_for(&host);
        Self {
            host,
            topic,
            admin: DEFAULT_ADMIN_CHANNEL.to_string(),
            timers: TimerConfig::fast(),
            assignments: Mutex::new(None),
            published: Mutex::new(Vec::new()),
            distributions: Mutex::new(Vec::new()),
            scheduled: Mutex::new(Vec::new()),
        }
    }

    /// This mock's host id.
    pub fn host(&self) -> &HostId {
        &self.host
    }

    /// This mock's data channel.
    pub fn topic(&self) -> &ChannelId {
        &self.topic
    }

    /// Messages published on the host's data channel.
    pub fn data_messages(&self) -> Vec<Envelope> {
        self.messages_on(&self.topic)
    }

    /// Messages published on the admin channel.
    pub fn admin_messages(&self) -> Vec<Envelope> {
        self.messages_on(&self.admin)
    }

    /// Messages published on an arbitrary channel.
    pub fn messages_on(&self, channel: &ChannelId) -> Vec<Envelope> {
        self.published
            .lock()
            .iter()
            .filter(|(c, _)| c == channel)
            .map(|(_, m)| m.clone())
            .collect()
    }

    /// Every distribution hand-off, in order.
    pub fn distributions(&self) -> Vec<Option<BucketAssignments>> {
        self.distributions.lock().clone()
    }

    /// Every timer registration, in order.
    pub fn scheduled(&self) -> Vec<ScheduledTimer> {
        self.scheduled.lock().clone()
    }

    /// Forget recorded publishes and distributions (timer registrations
    /// are kept, their handles may still be owned by a state).
    pub fn clear_recorded(&self) {
        self.published.lock().clear();
        self.distributions.lock().clear();
    }

    fn record_timer(
        &self,
        generation: u64,
        delay: Duration,
        every: Option<Duration>,
        event: TimerEvent,
    ) -> TimerHandle {
        let flag = Arc::new(AtomicBool::new(false));
        self.scheduled.lock().push(ScheduledTimer {
            generation,
            delay,
            every,
            event,
            flag: flag.clone(),
        });
        TimerHandle::from_flag(flag)
    }
}

impl Manager for MockManager {
    fn host(&self) -> &HostId {
        &self.host
    }

    fn topic(&self) -> &ChannelId {
        &self.topic
    }

    fn admin_channel(&self) -> &ChannelId {
        &self.admin
    }

    fn timer_config(&self) -> &TimerConfig {
        &self.timers
    }

    fn assignments(&self) -> Option<BucketAssignments> {
        self.assignments.lock().clone()
    }

    fn publish(&self, channel: &ChannelId, message: Envelope) {
        self.published.lock().push((channel.clone(), message));
    }

    fn publish_admin(&self, message: Envelope) {
        self.published.lock().push((self.admin.clone(), message));
    }

    fn start_distributing(&self, assignments: Option<BucketAssignments>) {
        *self.assignments.lock() = assignments.clone();
        self.distributions.lock().push(assignments);
    }

    fn schedule(&self, generation: u64, delay: Duration, event: TimerEvent) -> TimerHandle {
        self.record_timer(generation, delay, None, event)
    }

    fn schedule_repeating(
        &self,
        generation: u64,
        initial: Duration,
        every: Duration,
        event: TimerEvent,
    ) -> TimerHandle {
        self.record_timer(generation, initial, Some(every), event)
    }
}
