//! Bucket-to-host assignment snapshots and rebalancing.
//!
//! A [`BucketAssignments`] is the authoritative, immutable mapping from
//! every bucket to its owning host (or none). The leader produces a new
//! snapshot on every membership change via [`rebalance`]; every other host
//! only ever reads the latest snapshot it received, so the structure needs
//! no internal locking; replacement of the current snapshot is the
//! manager's concern.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                   BucketAssignments                      │
//! │   slot:  0      1      2      3      4     ...  N-1      │
//! │        ┌──────┬──────┬──────┬──────┬──────┬────┬──────┐  │
//! │        │host-a│host-b│host-a│ none │host-c│ .. │host-b│  │
//! │        └──────┴──────┴──────┴──────┴──────┴────┴──────┘  │
//! │                                                          │
//! │   leader() = smallest host id present among the slots    │
//! └──────────────────────────────────────────────────────────┘
//! ```

mod host_load;
mod rebalance;

pub use host_load::HostLoad;
pub use rebalance::rebalance;

use crate::types::{HostId, MAX_BUCKETS};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::hash::Hasher;
use twox_hash::XxHash64;

/// Immutable snapshot mapping each bucket to an owning host.
///
/// The default instance has zero slots and represents "no distribution".
/// Instances produced by [`rebalance`] have [`MAX_BUCKETS`] slots (or the
/// previous snapshot's length, which is the same thing on a correctly
/// configured cluster).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BucketAssignments {
    slots: Vec<Option<HostId>>,
}

impl BucketAssignments {
    /// Build a snapshot from explicit slots.
    pub fn from_slots(slots: Vec<Option<HostId>>) -> Self {
        Self { slots }
    }

    /// Build a full-size snapshot with every bucket owned by one host.
    pub fn seeded(host: &HostId) -> Self {
        Self {
            slots: vec![Some(host.clone()); MAX_BUCKETS],
        }
    }

    /// Number of slots (0 for the default instance).
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// True when the snapshot has no slots.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Owner of the given bucket index, if any.
    pub fn assigned_host(&self, bucket: usize) -> Option<&HostId> {
        self.slots.get(bucket).and_then(|s| s.as_ref())
    }

    /// True when any slot is owned by the given host.
    pub fn has_host(&self, host: &HostId) -> bool {
        self.slots.iter().any(|s| s.as_deref() == Some(host.as_str()))
    }

    /// The lexicographically smallest host id present, or none when no
    /// slot is owned. This host is the cluster leader by definition.
    pub fn leader(&self) -> Option<&HostId> {
        self.slots.iter().flatten().min()
    }

    /// Distinct owners, in ascending order.
    pub fn hosts(&self) -> Vec<HostId> {
        let set: BTreeSet<&HostId> = self.slots.iter().flatten().collect();
        set.into_iter().cloned().collect()
    }

    /// Number of buckets owned by the given host.
    pub fn count_for(&self, host: &HostId) -> usize {
        self.slots
            .iter()
            .filter(|s| s.as_deref() == Some(host.as_str()))
            .count()
    }

    /// Map an arbitrary key to a bucket index with a stable hash.
    ///
    /// Every host computes the same index for the same key, which is what
    /// makes bucket ownership equivalent to key ownership.
    pub fn bucket_for_key(&self, key: &[u8]) -> Option<usize> {
        if self.slots.is_empty() {
            return None;
        }
        let mut hasher = XxHash64::with_seed(0);
        hasher.write(key);
        Some((hasher.finish() % self.slots.len() as u64) as usize)
    }

    /// Owner of an arbitrary key, if any.
    pub fn host_for_key(&self, key: &[u8]) -> Option<&HostId> {
        self.bucket_for_key(key)
            .and_then(|bucket| self.assigned_host(bucket))
    }

    /// Raw slot view, used by the rebalancer.
    pub(crate) fn slots(&self) -> &[Option<HostId>] {
        &self.slots
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(owners: &[Option<&str>]) -> BucketAssignments {
        BucketAssignments::from_slots(
            owners.iter().map(|o| o.map(|h| h.to_string())).collect(),
        )
    }

    #[test]
    fn test_default_is_empty() {
        let empty = BucketAssignments::default();
        assert_eq!(empty.len(), 0);
        assert!(empty.is_empty());
        assert!(empty.leader().is_none());
        assert!(empty.bucket_for_key(b"key").is_none());
    }

    #[test]
    fn test_seeded_owns_everything() {
        let host = "host-a".to_string();
        let seeded = BucketAssignments::seeded(&host);
        assert_eq!(seeded.len(), MAX_BUCKETS);
        assert_eq!(seeded.count_for(&host), MAX_BUCKETS);
        assert_eq!(seeded.leader(), Some(&host));
    }

    #[test]
    fn test_leader_is_smallest_present_host() {
        let s = snapshot(&[Some("host-c"), Some("host-a"), None, Some("host-b")]);
        assert_eq!(s.leader().map(String::as_str), Some("host-a"));
    }

    #[test]
    fn test_hosts_sorted_and_distinct() {
        let s = snapshot(&[Some("b"), Some("a"), Some("b"), None, Some("c")]);
        assert_eq!(s.hosts(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_membership_queries() {
        let s = snapshot(&[Some("host-a"), None, Some("host-b")]);
        assert!(s.has_host(&"host-a".to_string()));
        assert!(!s.has_host(&"host-z".to_string()));
        assert_eq!(s.assigned_host(0).map(String::as_str), Some("host-a"));
        assert_eq!(s.assigned_host(1), None);
        assert_eq!(s.assigned_host(99), None);
        assert_eq!(s.count_for(&"host-b".to_string()), 1);
    }

    #[test]
    fn test_key_mapping_is_stable() {
        let host = "host-a".to_string();
        let s = BucketAssignments::seeded(&host);
        let first = s.bucket_for_key(b"user:123").unwrap();
        let second = s.bucket_for_key(b"user:123").unwrap();
        assert_eq!(first, second);
        assert!(first < MAX_BUCKETS);
        assert_eq!(s.host_for_key(b"user:123"), Some(&host));
    }
}
