//! Parked state: no buckets owned, periodically retry joining.

use super::{handle_leader_broadcast, State, StateContext, StateKind, Transition};
use crate::manager::{TimerBag, TimerEvent};
use crate::protocol::{Envelope, Payload};
use tracing::info;

/// The host owns no buckets.
///
/// Reached when the channel does not echo, when the leader's map excludes
/// this host, or after a transport failure. A valid Leader broadcast can
/// pull the host straight back in; otherwise the reactivation timer sends
/// it through the boot sequence again.
pub struct InactiveState {
    timers: TimerBag,
}

impl InactiveState {
    /// Create a parked state.
    pub fn new() -> Self {
        Self {
            timers: TimerBag::new(),
        }
    }
}

impl Default for InactiveState {
    fn default() -> Self {
        Self::new()
    }
}

impl State for InactiveState {
    fn kind(&self) -> StateKind {
        StateKind::Inactive
    }

    fn on_enter(&mut self, ctx: &StateContext<'_>) {
        info!(host = %ctx.manager().host(), "entering inactive state");
        let wait = ctx.manager().timer_config().reactivation_wait;
        self.timers
            .track(ctx.schedule(wait, TimerEvent::ReactivationWait));
    }

    fn on_message(&mut self, ctx: &StateContext<'_>, envelope: &Envelope) -> Transition {
        if let Some(transition) = handle_leader_broadcast(ctx, envelope) {
            return transition;
        }

        match &envelope.payload {
            Payload::Query => {
                let manager = ctx.manager();
                // Identify with whatever is currently held, which for a
                // parked host is usually nothing.
                let assignments = manager.assignments().filter(|a| !a.is_empty());
                let reply = Envelope::identification(
                    manager.host().clone(),
                    manager.admin_channel().clone(),
                    assignments,
                );
                manager.publish_admin(reply);
                Transition::ToQuery
            }
            _ => Transition::Stay,
        }
    }

    fn on_timer(&mut self, ctx: &StateContext<'_>, event: TimerEvent) -> Transition {
        match event {
            TimerEvent::ReactivationWait => {
                info!(host = %ctx.manager().host(), "reactivation timer fired, retrying");
                Transition::ToStart
            }
            _ => Transition::Stay,
        }
    }

    fn on_exit(&mut self) {
        self.timers.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assignment::BucketAssignments;
    use crate::testing::mock::MockManager;
    use crate::types::MAX_BUCKETS;

    fn assignments_for(hosts: &[&str]) -> BucketAssignments {
        let mut slots = vec![None; MAX_BUCKETS];
        for (i, host) in hosts.iter().enumerate() {
            slots[i] = Some(host.to_string());
        }
        BucketAssignments::from_slots(slots)
    }

    fn entered(manager: &MockManager) -> InactiveState {
        let mut state = InactiveState::new();
        let ctx = StateContext::new(manager, 0);
        state.on_enter(&ctx);
        state
    }

    #[test]
    fn test_entry_arms_reactivation_timer() {
        let manager = MockManager::new("host-a");
        let state = entered(&manager);
        assert_eq!(manager.scheduled().len(), 1);
        assert_eq!(state.timers.len(), 1);
    }

    #[test]
    fn test_valid_leader_including_local_activates() {
        let manager = MockManager::new("host-b");
        let mut state = entered(&manager);
        let ctx = StateContext::new(&manager, 0);

        let map = assignments_for(&["host-a", "host-b"]);
        let broadcast = Envelope::leader("host-a".into(), "admin".into(), map.clone());
        match state.on_message(&ctx, &broadcast) {
            Transition::ToActive(assignments) => assert_eq!(assignments, map),
            other => panic!("expected ToActive, got {:?}", other),
        }
        assert_eq!(manager.distributions(), vec![Some(map)]);
    }

    #[test]
    fn test_invalid_leader_claim_is_ignored() {
        let manager = MockManager::new("host-b");
        let mut state = entered(&manager);
        let ctx = StateContext::new(&manager, 0);

        let bogus = Envelope::leader(
            "host-b".into(),
            "admin".into(),
            assignments_for(&["host-a", "host-b"]),
        );
        assert!(matches!(state.on_message(&ctx, &bogus), Transition::Stay));
        assert!(manager.distributions().is_empty());
    }

    #[test]
    fn test_query_replies_empty_identification_and_requeries() {
        let manager = MockManager::new("host-a");
        let mut state = entered(&manager);
        let ctx = StateContext::new(&manager, 0);

        let query = Envelope::query("host-b".into(), "admin".into());
        assert!(matches!(state.on_message(&ctx, &query), Transition::ToQuery));

        let replies = manager.admin_messages();
        assert_eq!(replies.len(), 1);
        match &replies[0].payload {
            Payload::Identification { assignments } => assert!(assignments.is_none()),
            other => panic!("expected identification, got {:?}", other),
        }
    }

    #[test]
    fn test_reactivation_timer_restarts() {
        let manager = MockManager::new("host-a");
        let mut state = entered(&manager);
        let ctx = StateContext::new(&manager, 0);

        assert!(matches!(
            state.on_timer(&ctx, TimerEvent::ReactivationWait),
            Transition::ToStart
        ));
    }

    #[test]
    fn test_unrelated_messages_stay() {
        let manager = MockManager::new("host-a");
        let mut state = entered(&manager);
        let ctx = StateContext::new(&manager, 0);

        let beat = Envelope::heartbeat("host-b".into(), "corral.data.host-b".into(), 1);
        assert!(matches!(state.on_message(&ctx, &beat), Transition::Stay));

        let gone = Envelope::offline("host-b".into(), "admin".into());
        assert!(matches!(state.on_message(&ctx, &gone), Transition::Stay));
    }
}
