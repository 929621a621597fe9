//! Core types used throughout the coordination crate.

use uuid::Uuid;

/// Host identifier in the fleet.
///
/// Opaque and totally ordered; lexicographic order doubles as the
/// leader-selection rule (the smallest id present in an assignment is the
/// leader). In practice a UUID rendered as text.
pub type HostId = String;

/// Logical channel (topic) identifier.
pub type ChannelId = String;

/// Number of buckets the workload is sharded into.
///
/// Fixed power of two, identical on every member of a running cluster.
/// Changing it requires a coordinated restart of the whole fleet.
pub const MAX_BUCKETS: usize = 1024;

/// Default identifier of the cluster-wide administrative channel.
///
/// Query/Identification/Leader/Offline traffic is broadcast here;
/// heartbeats travel on each host's own data channel.
pub const DEFAULT_ADMIN_CHANNEL: &str = "corral.admin";

/// Generate a fresh host id.
pub fn generate_host_id() -> HostId {
    Uuid::new_v4().to_string()
}

/// Derive the conventional data-channel id for a host.
pub fn data_channel_for(host: &str) -> ChannelId {
    format!("corral.data.{}", host)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_unique() {
        let a = generate_host_id();
        let b = generate_host_id();
        assert_ne!(a, b);
    }

    #[test]
    fn test_data_channel_embeds_host() {
        let channel = data_channel_for("host-1");
        assert!(channel.contains("host-1"));
        assert_ne!(channel, DEFAULT_ADMIN_CHANNEL);
    }

    #[test]
    fn test_max_buckets_power_of_two() {
        assert!(MAX_BUCKETS.is_power_of_two());
    }
}
