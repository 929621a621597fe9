//! Configuration types for the coordination runtime.

use crate::types::{data_channel_for, ChannelId, HostId, DEFAULT_ADMIN_CHANNEL};
use std::time::Duration;

/// Main configuration for a coordinated host.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// This host's identifier. Must be unique and stable for the process
    /// lifetime; ordering against other hosts' ids decides leadership.
    pub host: HostId,

    /// The host's own data channel (heartbeats are published here).
    pub data_channel: ChannelId,

    /// The cluster-wide administrative broadcast channel.
    pub admin_channel: ChannelId,

    /// Timer intervals for the state machine.
    pub timers: TimerConfig,
}

impl CoordinatorConfig {
    /// Create a configuration for the given host id with default channels
    /// and timers.
    pub fn new(host: impl Into<HostId>) -> Self {
        let host = host.into();
        let data_channel = data_channel_for(&host);
        Self {
            host,
            data_channel,
            admin_channel: DEFAULT_ADMIN_CHANNEL.to_string(),
            timers: TimerConfig::default(),
        }
    }

    /// Set the administrative channel id.
    pub fn with_admin_channel(mut self, channel: impl Into<ChannelId>) -> Self {
        self.admin_channel = channel.into();
        self
    }

    /// Set the host's data channel id.
    pub fn with_data_channel(mut self, channel: impl Into<ChannelId>) -> Self {
        self.data_channel = channel.into();
        self
    }

    /// Set the timer configuration.
    pub fn with_timers(mut self, timers: TimerConfig) -> Self {
        self.timers = timers;
        self
    }
}

/// Timer intervals driving the state machine.
///
/// Structurally fixed for the lifetime of a running cluster; every member
/// should run with the same values.
#[derive(Debug, Clone)]
pub struct TimerConfig {
    /// Interval between self-heartbeats (Start and Active states).
    pub heartbeat_interval: Duration,

    /// How long Start waits for its own heartbeat echo before concluding
    /// the data channel is not delivering.
    pub heartbeat_wait: Duration,

    /// How long Query waits for Identification/Leader replies before
    /// deciding how to proceed on its own.
    pub query_wait: Duration,

    /// How long an Active follower tolerates silence from the leader.
    pub leader_wait: Duration,

    /// How long Inactive parks before retrying from Start.
    pub reactivation_wait: Duration,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(5),
            heartbeat_wait: Duration::from_secs(10),
            query_wait: Duration::from_secs(5),
            leader_wait: Duration::from_secs(20),
            reactivation_wait: Duration::from_secs(30),
        }
    }
}

impl TimerConfig {
    /// Set the heartbeat interval.
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Set the heartbeat-echo wait.
    pub fn with_heartbeat_wait(mut self, wait: Duration) -> Self {
        self.heartbeat_wait = wait;
        self
    }

    /// Set the query-reply wait.
    pub fn with_query_wait(mut self, wait: Duration) -> Self {
        self.query_wait = wait;
        self
    }

    /// Set the leader-silence tolerance.
    pub fn with_leader_wait(mut self, wait: Duration) -> Self {
        self.leader_wait = wait;
        self
    }

    /// Set the reactivation wait.
    pub fn with_reactivation_wait(mut self, wait: Duration) -> Self {
        self.reactivation_wait = wait;
        self
    }

    /// Compressed intervals for tests: everything in the tens of
    /// milliseconds so scenarios converge quickly.
    pub fn fast() -> Self {
        Self {
            heartbeat_interval: Duration::from_millis(20),
            heartbeat_wait: Duration::from_millis(80),
            query_wait: Duration::from_millis(60),
            leader_wait: Duration::from_millis(120),
            reactivation_wait: Duration::from_millis(100),
        }
    }
}
