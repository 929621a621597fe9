//! Boot state: prove the data channel delivers before joining.

use super::{State, StateContext, StateKind, Transition};
use crate::manager::{TimerBag, TimerEvent};
use crate::protocol::{now_millis, Envelope, Payload};
use tracing::{debug, info};

/// Initial state on every (re)boot.
///
/// Publishes a self-heartbeat on the host's own data channel and waits for
/// the echo. Hearing its own heartbeat back proves the pub/sub loop is
/// intact, at which point the host moves on to membership discovery. If
/// the wait expires first, the channel is not delivering and the host
/// parks in Inactive with any previous distribution cleared.
pub struct StartState {
    /// Stamp chosen at state entry; the echo must match it exactly.
    timestamp_ms: u64,
    timers: TimerBag,
}

impl StartState {
    /// Create a fresh boot state.
    pub fn new() -> Self {
        Self {
            timestamp_ms: now_millis(),
            timers: TimerBag::new(),
        }
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
}

impl Default for StartState {
    fn default() -> Self {
        Self::new()
    }
}

impl State for StartState {
    fn kind(&self) -> StateKind {
        StateKind::Start
    }

    fn on_enter(&mut self, ctx: &StateContext<'_>) {
        info!(host = %ctx.manager().host(), "entering start state");
        self.publish_heartbeat(ctx);

        let timers = ctx.manager().timer_config();
        let interval = timers.heartbeat_interval;
        let wait = timers.heartbeat_wait;
        self.timers
            .track(ctx.schedule_repeating(interval, interval, TimerEvent::HeartbeatTick));
        self.timers.track(ctx.schedule(wait, TimerEvent::HeartbeatWait));
    }

    fn on_message(&mut self, ctx: &StateContext<'_>, envelope: &Envelope) -> Transition {
        match &envelope.payload {
            Payload::Heartbeat { timestamp_ms }
                if envelope.source == *ctx.manager().host()
                    && *timestamp_ms == self.timestamp_ms =>
            {
                debug!("own heartbeat echoed, channel confirmed");
                Transition::ToQuery
            }
            // Until connectivity is confirmed nothing else is acted on,
            // leader broadcasts included.
            _ => Transition::Stay,
        }
    }

    fn on_timer(&mut self, ctx: &StateContext<'_>, event: TimerEvent) -> Transition {
        match event {
            TimerEvent::HeartbeatTick => {
                self.publish_heartbeat(ctx);
                Transition::Stay
            }
            TimerEvent::HeartbeatWait => {
                info!("no heartbeat echo, parking inactive");
                ctx.manager().start_distributing(None);
                Transition::ToInactive
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

    fn entered(manager: &MockManager) -> StartState {
        let mut state = StartState::new();
        let ctx = StateContext::new(manager, 0);
        state.on_enter(&ctx);
        state
    }

    #[test]
    fn test_entry_publishes_heartbeat_and_arms_timers() {
        let manager = MockManager::new("host-a");
        let state = entered(&manager);

        let beats = manager.data_messages();
        assert_eq!(beats.len(), 1);
        assert_eq!(beats[0].source, "host-a");
        match beats[0].payload {
            Payload::Heartbeat { timestamp_ms } => assert_eq!(timestamp_ms, state.timestamp_ms),
            ref other => panic!("expected heartbeat, got {:?}", other),
        }

        // One repeating generator plus one one-shot wait.
        assert_eq!(manager.scheduled().len(), 2);
        assert_eq!(state.timers.len(), 2);
    }

    #[test]
    fn test_matching_echo_moves_to_query() {
        let manager = MockManager::new("host-a");
        let mut state = entered(&manager);
        let ctx = StateContext::new(&manager, 0);

        let echo = Envelope::heartbeat("host-a".into(), manager.topic().clone(), state.timestamp_ms);
        assert!(matches!(
            state.on_message(&ctx, &echo),
            Transition::ToQuery
        ));
    }

    #[test]
    fn test_foreign_or_stale_heartbeat_is_ignored() {
        let manager = MockManager::new("host-a");
        let mut state = entered(&manager);
        let ctx = StateContext::new(&manager, 0);

        let foreign =
            Envelope::heartbeat("host-b".into(), "corral.data.host-b".into(), state.timestamp_ms);
        assert!(matches!(state.on_message(&ctx, &foreign), Transition::Stay));

        let stale = Envelope::heartbeat(
            "host-a".into(),
            manager.topic().clone(),
            state.timestamp_ms.wrapping_add(1),
        );
        assert!(matches!(state.on_message(&ctx, &stale), Transition::Stay));
    }

    #[test]
    fn test_leader_broadcast_is_ignored_before_connectivity() {
        let manager = MockManager::new("host-a");
        let mut state = entered(&manager);
        let ctx = StateContext::new(&manager, 0);

        let mut slots = vec![None; 8];
        slots[0] = Some("host-a".to_string());
        let broadcast = Envelope::leader(
            "host-a".into(),
            "admin".into(),
            BucketAssignments::from_slots(slots),
        );
        assert!(matches!(state.on_message(&ctx, &broadcast), Transition::Stay));
        assert!(manager.distributions().is_empty());
    }

    #[test]
    fn test_wait_expiry_clears_distribution_and_parks() {
        let manager = MockManager::new("host-a");
        let mut state = entered(&manager);
        let ctx = StateContext::new(&manager, 0);

        let transition = state.on_timer(&ctx, TimerEvent::HeartbeatWait);
        assert!(matches!(transition, Transition::ToInactive));
        assert_eq!(manager.distributions(), vec![None]);
    }

    #[test]
    fn test_tick_republishes_same_timestamp() {
        let manager = MockManager::new("host-a");
        let mut state = entered(&manager);
        let ctx = StateContext::new(&manager, 0);

        state.on_timer(&ctx, TimerEvent::HeartbeatTick);
        let beats = manager.data_messages();
        assert_eq!(beats.len(), 2);
        assert_eq!(beats[0].payload, beats[1].payload);
    }

    #[test]
    fn test_exit_cancels_timers() {
        let manager = MockManager::new("host-a");
        let mut state = entered(&manager);

        state.on_exit();
        assert!(state.timers.is_empty());
        assert!(manager.scheduled().iter().all(|t| t.handle_cancelled()));
    }
}
