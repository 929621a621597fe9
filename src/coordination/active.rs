//! Steady state: own buckets, answer queries, follow (or be) the leader.

use super::{announce_offline, handle_leader_broadcast, State, StateContext, StateKind, Transition};
use crate::assignment::{rebalance, BucketAssignments};
use crate::error::{Error, Result};
use crate::manager::{TimerBag, TimerEvent, TimerHandle};
use crate::protocol::{now_millis, Envelope, Payload};
use crate::types::HostId;
use tracing::{debug, info, warn};

/// Processing state: the host owns buckets under a known leader.
///
/// The leader instance additionally recomputes the bucket map when the
/// external membership detector reports a change ([`State::become_leader`])
/// and broadcasts the result. Follower instances watch the leader's
/// heartbeats and fall back to Start when the leader goes silent.
pub struct ActiveState {
    local: HostId,
    leader: HostId,
    assignments: BucketAssignments,
    /// Heartbeat stamp chosen at state entry.
    timestamp_ms: u64,
    timers: TimerBag,
    /// Follower-only leader-liveness watchdog, reset on every heartbeat
    /// from the leader. Kept outside the bag so resets do not accumulate
    /// dead handles.
    watchdog: Option<TimerHandle>,
}

impl ActiveState {
    /// Create a processing state for the given assignments.
    ///
    /// The assignments must be non-empty (so a leader exists) and must
    /// include the local host; anything else is a bug in the caller.
    pub fn new(local: HostId, assignments: BucketAssignments) -> Result<Self> {
        let leader = assignments
            .leader()
            .cloned()
            .ok_or_else(|| Error::contract("active state requires non-empty assignments"))?;
        if !assignments.has_host(&local) {
            return Err(Error::contract(
                "active state requires the local host to own at least one bucket",
            ));
        }

        Ok(Self {
            local,
            leader,
            assignments,
            timestamp_ms: now_millis(),
            timers: TimerBag::new(),
            watchdog: None,
        })
    }

    /// The leader this instance is following (possibly itself).
    pub fn leader(&self) -> &HostId {
        &self.leader
    }

    /// The assignments this instance is operating under.
    pub fn assignments(&self) -> &BucketAssignments {
        &self.assignments
    }

    fn publish_heartbeat(&self, ctx: &StateContext<'_>) {
        let manager = ctx.manager();
        let beat = Envelope::heartbeat(
            manager.host().clone(),
            manager.topic().clone(),
            self.timestamp_ms,
        );
        let topic = manager.topic().clone();
        manager.publish(&topic, beat);
    }

    fn arm_watchdog(&mut self, ctx: &StateContext<'_>) {
        if let Some(old) = self.watchdog.take() {
            old.cancel();
        }
        let wait = ctx.manager().timer_config().leader_wait;
        self.watchdog = Some(ctx.schedule(wait, TimerEvent::LeaderWait));
    }

    /// Leader-silence recovery: announce departure, keep whatever is
    /// being distributed, and restart the election from the top.
    fn leader_lost(&self, ctx: &StateContext<'_>) -> Transition {
        warn!(leader = %self.leader, "leader went silent, restarting");
        announce_offline(ctx.manager());
        Transition::ToStart
    }
}

impl State for ActiveState {
    fn kind(&self) -> StateKind {
        StateKind::Active
    }

    fn on_enter(&mut self, ctx: &StateContext<'_>) {
        info!(
            host = %self.local,
            leader = %self.leader,
            owned = self.assignments.count_for(&self.local),
            "entering active state"
        );

        let interval = ctx.manager().timer_config().heartbeat_interval;
        self.timers
            .track(ctx.schedule_repeating(interval, interval, TimerEvent::HeartbeatTick));

        if !self.is_leader() {
            self.arm_watchdog(ctx);
        }
    }

    fn on_message(&mut self, ctx: &StateContext<'_>, envelope: &Envelope) -> Transition {
        if let Some(transition) = handle_leader_broadcast(ctx, envelope) {
            return transition;
        }

        match &envelope.payload {
            Payload::Query => {
                let manager = ctx.manager();
                let reply = Envelope::identification(
                    manager.host().clone(),
                    manager.admin_channel().clone(),
                    Some(self.assignments.clone()),
                );
                manager.publish_admin(reply);
                Transition::Stay
            }
            Payload::Heartbeat { .. } if envelope.source == self.leader && !self.is_leader() => {
                debug!(leader = %self.leader, "leader heartbeat, watchdog reset");
                self.arm_watchdog(ctx);
                Transition::Stay
            }
            Payload::Offline if envelope.source == self.leader && !self.is_leader() => {
                self.leader_lost(ctx)
            }
            _ => Transition::Stay,
        }
    }

    fn on_timer(&mut self, ctx: &StateContext<'_>, event: TimerEvent) -> Transition {
        match event {
            TimerEvent::HeartbeatTick => {
                self.publish_heartbeat(ctx);
                Transition::Stay
            }
            TimerEvent::LeaderWait if !self.is_leader() => self.leader_lost(ctx),
            _ => Transition::Stay,
        }
    }

    fn on_exit(&mut self) {
        self.timers.cancel_all();
        if let Some(watchdog) = self.watchdog.take() {
            watchdog.cancel();
        }
    }

    fn become_leader(
        &mut self,
        ctx: &StateContext<'_>,
        live_hosts: &[HostId],
    ) -> Result<Transition> {
        if live_hosts.is_empty() {
            return Err(Error::contract("live host list is empty"));
        }
        if live_hosts.first() != Some(&self.local) {
            return Err(Error::contract(
                "only the smallest live host may recompute assignments",
            ));
        }

        let manager = ctx.manager();
        let next = rebalance(Some(&self.assignments), live_hosts)?;
        info!(
            hosts = live_hosts.len(),
            "membership changed, broadcasting new assignment"
        );

        manager.start_distributing(Some(next.clone()));
        let broadcast = Envelope::leader(
            self.local.clone(),
            manager.admin_channel().clone(),
            next.clone(),
        );
        manager.publish_admin(broadcast);
        Ok(Transition::ToActive(next))
    }

    fn is_leader(&self) -> bool {
        self.leader == self.local
    }
}
