//! Discovery state: learn who is out there and who leads.

use super::{handle_leader_broadcast, State, StateContext, StateKind, Transition};
use crate::assignment::rebalance;
use crate::manager::{TimerBag, TimerEvent};
use crate::protocol::{Envelope, Payload};
use crate::types::HostId;
use std::collections::BTreeSet;
use tracing::{debug, error, info};

/// Membership-discovery state.
///
/// Broadcasts a Query on the admin channel and waits for the replies to
/// reveal the current membership and assignment. A valid Leader broadcast
/// resolves the wait immediately. If the wait expires without one, the
/// host decides on its own: the smallest host id observed during the wait
/// (itself included) is entitled to bootstrap leadership, everyone else
/// parks and retries through the reactivation cycle.
pub struct QueryState {
    /// Hosts heard from while waiting, the local host included.
    observed: BTreeSet<HostId>,
    timers: TimerBag,
}

impl QueryState {
    /// Create a discovery state.
    pub fn new() -> Self {
        Self {
            observed: BTreeSet::new(),
            timers: TimerBag::new(),
        }
    }
}

impl Default for QueryState {
    fn default() -> Self {
        Self::new()
    }
}

impl State for QueryState {
    fn kind(&self) -> StateKind {
        StateKind::Query
    }

    fn on_enter(&mut self, ctx: &StateContext<'_>) {
        let manager = ctx.manager();
        info!(host = %manager.host(), "entering query state");
        self.observed.insert(manager.host().clone());

        let query = Envelope::query(manager.host().clone(), manager.admin_channel().clone());
        manager.publish_admin(query);

        let wait = manager.timer_config().query_wait;
        self.timers.track(ctx.schedule(wait, TimerEvent::QueryWait));
    }

    fn on_message(&mut self, ctx: &StateContext<'_>, envelope: &Envelope) -> Transition {
        if let Some(transition) = handle_leader_broadcast(ctx, envelope) {
            return transition;
        }

        match &envelope.payload {
            Payload::Identification { .. } | Payload::Heartbeat { .. } | Payload::Query => {
                // Any traffic proves its sender is alive right now.
                self.observed.insert(envelope.source.clone());
                Transition::Stay
            }
            Payload::Offline => {
                self.observed.remove(&envelope.source);
                Transition::Stay
            }
            Payload::Leader { .. } => Transition::Stay,
        }
    }

    fn on_timer(&mut self, ctx: &StateContext<'_>, event: TimerEvent) -> Transition {
        if event != TimerEvent::QueryWait {
            return Transition::Stay;
        }

        let manager = ctx.manager();
        let local = manager.host();
        let smallest = self.observed.iter().next();
        if smallest != Some(local) {
            debug!(
                host = %local,
                observed = self.observed.len(),
                "not the smallest observed host, parking inactive"
            );
            return Transition::ToInactive;
        }

        // Nobody with a smaller id answered: this host is entitled to
        // lead whatever it has seen.
        let live: Vec<HostId> = self.observed.iter().cloned().collect();
        let previous = manager.assignments();
        match rebalance(previous.as_ref(), &live) {
            Ok(assignments) => {
                info!(hosts = live.len(), "no leader answered, bootstrapping leadership");
                manager.start_distributing(Some(assignments.clone()));
                let broadcast = Envelope::leader(
                    local.clone(),
                    manager.admin_channel().clone(),
                    assignments.clone(),
                );
                manager.publish_admin(broadcast);
                Transition::ToActive(assignments)
            }
            Err(e) => {
                error!(error = %e, "bootstrap rebalance failed");
                Transition::ToInactive
            }
        }
    }

    fn on_exit(&mut self) {
        self.timers.cancel_all();
    }
}
