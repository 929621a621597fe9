//! The per-host coordination state machine.
//!
//! Every host runs one instance of the same message-driven machine, which
//! cycles among four states for the lifetime of the process:
//!
//! ```text
//!              own heartbeat echo            valid Leader (member)
//!   ┌───────┐ ───────────────────► ┌───────┐ ───────────────────► ┌────────┐
//!   │ Start │                      │ Query │                      │ Active │
//!   └───────┘ ◄─── reactivation ── └───────┘ ◄── leader silence ── └────────┘
//!       ▲            ┌──────────┐      │                               │
//!       │            │ Inactive │ ◄────┴── not a member / no echo ◄────┘
//!       └─────────── └──────────┘
//! ```
//!
//! Inbound messages and timer firings are both funneled through the
//! machine's single dispatch point; a handler either returns the next
//! state or stays. The Active instance on the leader host additionally
//! recomputes the bucket map when membership changes and broadcasts it as
//! a Leader message.

mod active;
mod inactive;
mod machine;
mod query;
mod start;

pub use active::ActiveState;
pub use inactive::InactiveState;
pub use machine::StateMachine;
pub use query::QueryState;
pub use start::StartState;

use crate::assignment::BucketAssignments;
use crate::error::Result;
use crate::manager::{Manager, TimerEvent, TimerHandle};
use crate::protocol::{leader_claim_is_valid, Envelope, Payload};
use crate::types::HostId;
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// Which of the four states a machine is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateKind {
    /// Verifying channel connectivity after (re)boot.
    Start,
    /// Discovering current membership and assignments.
    Query,
    /// Owning buckets and processing work.
    Active,
    /// Owning nothing, waiting to retry.
    Inactive,
}

impl fmt::Display for StateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(kind_name(*self))
    }
}

/// Outcome of a message or timer dispatch.
#[derive(Debug)]
pub enum Transition {
    /// Remain in the current state.
    Stay,
    /// Re-enter the boot sequence.
    ToStart,
    /// Move to membership discovery.
    ToQuery,
    /// Move to Active with the given assignments.
    ToActive(BucketAssignments),
    /// Park without bucket ownership.
    ToInactive,
}

/// Dispatch context handed to a state for the duration of one call.
///
/// Couples the injected manager with the machine generation the state is
/// running under, so timers the state schedules are fenced against firing
/// into a successor state.
pub struct StateContext<'a> {
    manager: &'a dyn Manager,
    generation: u64,
}

impl<'a> StateContext<'a> {
    pub(crate) fn new(manager: &'a dyn Manager, generation: u64) -> Self {
        Self {
            manager,
            generation,
        }
    }

    /// The injected manager.
    pub fn manager(&self) -> &dyn Manager {
        self.manager
    }

    /// The machine generation this dispatch runs under.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Schedule a one-shot timer fenced to the current generation.
    pub fn schedule(&self, delay: Duration, event: TimerEvent) -> TimerHandle {
        self.manager.schedule(self.generation, delay, event)
    }

    /// Schedule a repeating timer fenced to the current generation.
    pub fn schedule_repeating(
        &self,
        initial: Duration,
        every: Duration,
        event: TimerEvent,
    ) -> TimerHandle {
        self.manager
            .schedule_repeating(self.generation, initial, every, event)
    }
}

/// One coordination state.
///
/// A state is created on transition, entered once, handed every message
/// and timer firing while current, and exited exactly once. Exit cancels
/// every timer it created.
pub trait State: Send {
    /// Which state this is.
    fn kind(&self) -> StateKind;

    /// Called once when the state becomes current.
    fn on_enter(&mut self, ctx: &StateContext<'_>);

    /// Handle an inbound, structurally valid message.
    fn on_message(&mut self, ctx: &StateContext<'_>, envelope: &Envelope) -> Transition;

    /// Handle a timer firing scheduled by this state.
    fn on_timer(&mut self, ctx: &StateContext<'_>, event: TimerEvent) -> Transition;

    /// Called once when the state is replaced. Must cancel all timers.
    fn on_exit(&mut self);

    /// Membership changed; recompute and broadcast the bucket map.
    ///
    /// Only meaningful in Active on the leader host; everywhere else this
    /// is a contract violation by the calling collaborator.
    fn become_leader(
        &mut self,
        _ctx: &StateContext<'_>,
        _live_hosts: &[HostId],
    ) -> Result<Transition> {
        Err(crate::error::Error::InvalidState {
            state: kind_name(self.kind()),
            operation: "become_leader",
        })
    }

    /// Whether this state currently holds leadership.
    fn is_leader(&self) -> bool {
        false
    }
}

pub(crate) fn kind_name(kind: StateKind) -> &'static str {
    match kind {
        StateKind::Start => "start",
        StateKind::Query => "query",
        StateKind::Active => "active",
        StateKind::Inactive => "inactive",
    }
}

/// Shared handling of Leader broadcasts.
///
/// Returns `None` when the envelope is not a Leader message. A valid
/// claim always hands the assignments to the distributor, then moves to
/// Active when the local host is a member and Inactive otherwise. An
/// invalid claim (wrong sender, empty map) is ignored without side
/// effects.
pub(crate) fn handle_leader_broadcast(
    ctx: &StateContext<'_>,
    envelope: &Envelope,
) -> Option<Transition> {
    let assignments = match &envelope.payload {
        Payload::Leader { assignments } => assignments,
        _ => return None,
    };

    if !leader_claim_is_valid(&envelope.source, assignments) {
        debug!(
            source = %envelope.source,
            "ignoring leader broadcast from a host that is not the rightful leader"
        );
        return Some(Transition::Stay);
    }

    ctx.manager().start_distributing(Some(assignments.clone()));
    if assignments.has_host(ctx.manager().host()) {
        Some(Transition::ToActive(assignments.clone()))
    } else {
        Some(Transition::ToInactive)
    }
}

/// Broadcast this host's departure on the admin channel.
pub(crate) fn announce_offline(manager: &dyn Manager) {
    let message = Envelope::offline(manager.host().clone(), manager.admin_channel().clone());
    manager.publish_admin(message);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::mock::MockManager;
    use crate::types::MAX_BUCKETS;

    fn assignments_for(hosts: &[&str]) -> BucketAssignments {
        let mut slots = vec![None; MAX_BUCKETS];
        for (i, host) in hosts.iter().enumerate() {
            slots[i] = Some(host.to_string());
        }
        BucketAssignments::from_slots(slots)
    }

    #[test]
    fn test_leader_broadcast_ignores_non_leader_claims() {
        let manager = MockManager::new("host-b");
        let ctx = StateContext::new(&manager, 0);

        // host-b claims leadership of a map led by host-a.
        let envelope = Envelope::leader(
            "host-b".into(),
            "admin".into(),
            assignments_for(&["host-a", "host-b"]),
        );
        let transition = handle_leader_broadcast(&ctx, &envelope);

        assert!(matches!(transition, Some(Transition::Stay)));
        assert!(manager.distributions().is_empty());
    }

    #[test]
    fn test_leader_broadcast_distributes_and_routes_membership() {
        let manager = MockManager::new("host-b");
        let ctx = StateContext::new(&manager, 0);

        let member_map = assignments_for(&["host-a", "host-b"]);
        let envelope = Envelope::leader("host-a".into(), "admin".into(), member_map.clone());
        match handle_leader_broadcast(&ctx, &envelope) {
            Some(Transition::ToActive(assignments)) => assert_eq!(assignments, member_map),
            other => panic!("expected ToActive, got {:?}", other),
        }
        assert_eq!(manager.distributions().len(), 1);

        // Same broadcast seen by a host outside the map parks it.
        let outsider = MockManager::new("host-z");
        let ctx = StateContext::new(&outsider, 0);
        assert!(matches!(
            handle_leader_broadcast(&ctx, &envelope),
            Some(Transition::ToInactive)
        ));
        assert_eq!(outsider.distributions().len(), 1);
    }

    #[test]
    fn test_non_leader_messages_pass_through() {
        let manager = MockManager::new("host-a");
        let ctx = StateContext::new(&manager, 0);
        let envelope = Envelope::query("host-b".into(), "admin".into());
        assert!(handle_leader_broadcast(&ctx, &envelope).is_none());
    }

    #[test]
    fn test_announce_offline_targets_admin_channel() {
        let manager = MockManager::new("host-a");
        announce_offline(&manager);

        let published = manager.admin_messages();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].source, "host-a");
        assert!(matches!(published[0].payload, Payload::Offline));
    }
}
