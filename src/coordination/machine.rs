//! Serialized dispatch around the single current state.

use super::{
    announce_offline, ActiveState, InactiveState, QueryState, StartState, State, StateContext,
    StateKind, Transition,
};
use crate::error::Result;
use crate::manager::{Manager, TimerEvent};
use crate::metrics::CoordinationMetrics;
use crate::protocol::Envelope;
use crate::types::HostId;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The per-host coordination machine.
///
/// Exactly one state is current at any instant, but it is reached from at
/// least two execution contexts: the transport's message listener and the
/// timer scheduler. A single mutex serializes both, so a dispatch that
/// observed state S runs to completion against S, and the generation
/// counter fences out timer firings that belong to an already-replaced
/// state.
pub struct StateMachine {
    manager: Arc<dyn Manager>,
    current: Mutex<Current>,
    metrics: Arc<CoordinationMetrics>,
}

struct Current {
    state: Box<dyn State>,
    generation: u64,
    started: bool,
}

impl StateMachine {
    /// Create a machine for the given manager, parked before Start.
    ///
    /// The machine is inert until [`StateMachine::start`] is called, which
    /// gives the embedding runtime time to finish wiring (timer routing
    /// needs a reference back to the machine).
    pub fn new(manager: Arc<dyn Manager>) -> Arc<Self> {
        Arc::new(Self {
            manager,
            current: Mutex::new(Current {
                state: Box::new(StartState::new()),
                generation: 0,
                started: false,
            }),
            metrics: Arc::new(CoordinationMetrics::new()),
        })
    }

    /// Enter the initial Start state. Idempotent.
    pub fn start(&self) {
        let mut current = self.current.lock();
        if current.started {
            return;
        }
        current.started = true;
        info!(host = %self.manager.host(), "coordination machine starting");
        let ctx = StateContext::new(self.manager.as_ref(), current.generation);
        current.state.on_enter(&ctx);
    }

    /// This machine's metrics.
    pub fn metrics(&self) -> Arc<CoordinationMetrics> {
        self.metrics.clone()
    }

    /// Which state the machine is in.
    pub fn current_kind(&self) -> StateKind {
        self.current.lock().state.kind()
    }

    /// Whether this host currently holds leadership.
    pub fn is_leader(&self) -> bool {
        self.current.lock().state.is_leader()
    }

    /// Dispatch an inbound message to the current state.
    ///
    /// Structurally invalid messages are rejected here and never reach a
    /// state. Semantically ignorable messages come back as `Ok` with no
    /// visible effect.
    pub fn handle_message(&self, envelope: &Envelope) -> Result<()> {
        if let Err(e) = envelope.validate() {
            self.metrics.messages_rejected.inc();
            return Err(e.into());
        }

        let mut current = self.current.lock();
        self.metrics.messages_dispatched.inc();
        let ctx = StateContext::new(self.manager.as_ref(), current.generation);
        let transition = current.state.on_message(&ctx, envelope);
        self.apply(&mut current, transition)
    }

    /// Dispatch a timer firing scheduled under `generation`.
    ///
    /// A firing from a generation the machine has left is stale, its
    /// state is gone, and it is discarded.
    pub fn handle_timer(&self, generation: u64, event: TimerEvent) {
        let mut current = self.current.lock();
        if current.generation != generation {
            self.metrics.timers_stale.inc();
            debug!(
                ?event,
                scheduled = generation,
                current = current.generation,
                "discarding stale timer"
            );
            return;
        }

        self.metrics.timers_fired.inc();
        let ctx = StateContext::new(self.manager.as_ref(), current.generation);
        let transition = current.state.on_timer(&ctx, event);
        if let Err(e) = self.apply(&mut current, transition) {
            warn!(error = %e, ?event, "timer dispatch failed to transition");
        }
    }

    /// The external membership detector reports a change in the live set.
    ///
    /// `live_hosts` must be sorted ascending with the local host first;
    /// only the Active state of the rightful leader accepts this.
    pub fn become_leader(&self, live_hosts: &[HostId]) -> Result<()> {
        let mut current = self.current.lock();
        let ctx = StateContext::new(self.manager.as_ref(), current.generation);
        let transition = current.state.become_leader(&ctx, live_hosts)?;
        self.metrics.rebalances.inc();
        self.apply(&mut current, transition)
    }

    /// Liveness recovery: announce departure and restart the election,
    /// leaving the current distribution untouched.
    pub fn missed_heartbeat(&self) {
        let mut current = self.current.lock();
        warn!(host = %self.manager.host(), "missed heartbeat, restarting");
        announce_offline(self.manager.as_ref());
        if let Err(e) = self.apply(&mut current, Transition::ToStart) {
            warn!(error = %e, "missed-heartbeat restart failed");
        }
    }

    /// Transport failure: announce departure, clear the distribution and
    /// park until the reactivation cycle retries.
    pub fn internal_topic_failed(&self) {
        let mut current = self.current.lock();
        warn!(host = %self.manager.host(), "coordination channel failed, going inactive");
        announce_offline(self.manager.as_ref());
        self.manager.start_distributing(None);
        if let Err(e) = self.apply(&mut current, Transition::ToInactive) {
            warn!(error = %e, "topic-failure parking failed");
        }
    }

    /// Apply a transition while holding the dispatch lock.
    ///
    /// The next state is built before the old one is torn down, so a
    /// construction failure leaves the machine unchanged.
    fn apply(&self, current: &mut Current, transition: Transition) -> Result<()> {
        let next: Box<dyn State> = match transition {
            Transition::Stay => return Ok(()),
            Transition::ToStart => Box::new(StartState::new()),
            Transition::ToQuery => Box::new(QueryState::new()),
            Transition::ToActive(assignments) => Box::new(ActiveState::new(
                self.manager.host().clone(),
                assignments,
            )?),
            Transition::ToInactive => Box::new(InactiveState::new()),
        };

        let from = current.state.kind();
        current.state.on_exit();
        current.state = next;
        current.generation += 1;
        self.metrics.transitions.inc();

        info!(
            host = %self.manager.host(),
            from = %from,
            to = %current.state.kind(),
            generation = current.generation,
            "state transition"
        );

        let ctx = StateContext::new(self.manager.as_ref(), current.generation);
        current.state.on_enter(&ctx);
        Ok(())
    }
}

impl std::fmt::Debug for StateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateMachine")
            .field("host", self.manager.host())
            .field("state", &self.current_kind())
            .finish()
    }
}
