//! Deterministic bucket rebalancing.
//!
//! Given the previous assignment snapshot and the current live membership,
//! produce a new snapshot where every live host owns a near-equal share
//! (⌊N/H⌋ or ⌈N/H⌉ buckets) while touching as few buckets as possible.
//! The computation is fully deterministic (same inputs, same output), so
//! any host that observes the same membership recomputes the same map.

use super::host_load::HostLoad;
use super::BucketAssignments;
use crate::error::{Error, Result};
use crate::types::HostId;
use std::collections::HashSet;
use tracing::debug;

/// Compute a new assignment for the given live membership.
///
/// `live_hosts` must be non-empty, sorted ascending and duplicate-free;
/// violations are contract errors (a bug in the calling collaborator).
/// With no usable previous snapshot, every bucket is seeded to the first
/// live host (the caller is the leader, and by protocol the leader is the
/// smallest id) before leveling spreads the load.
pub fn rebalance(
    previous: Option<&BucketAssignments>,
    live_hosts: &[HostId],
) -> Result<BucketAssignments> {
    if live_hosts.is_empty() {
        return Err(Error::contract("live host list is empty"));
    }
    if live_hosts.windows(2).any(|w| w[0] >= w[1]) {
        return Err(Error::contract(
            "live host list must be sorted ascending without duplicates",
        ));
    }

    // 1. Seed: copy the previous slots, or start from an all-local map.
    let mut slots: Vec<Option<HostId>> = match previous {
        Some(prev) if !prev.is_empty() => prev.slots().to_vec(),
        _ => return Ok(level(BucketAssignments::seeded(&live_hosts[0]), live_hosts)),
    };

    // 2. Evict owners that are no longer live.
    let live: HashSet<&HostId> = live_hosts.iter().collect();
    for slot in slots.iter_mut() {
        if let Some(owner) = slot.as_ref() {
            if !live.contains(owner) {
                *slot = None;
            }
        }
    }

    Ok(level(BucketAssignments::from_slots(slots), live_hosts))
}

/// Fill orphan slots and level the spread to at most one bucket.
fn level(seed: BucketAssignments, live_hosts: &[HostId]) -> BucketAssignments {
    let mut slots = seed.slots().to_vec();

    // 3. One load tracker per live host, populated with the slots it
    // already owns, scanned in index order.
    let mut loads: Vec<HostLoad> = live_hosts
        .iter()
        .map(|h| HostLoad::new(h.clone()))
        .collect();
    for (index, slot) in slots.iter().enumerate() {
        if let Some(owner) = slot.as_ref() {
            if let Some(load) = loads.iter_mut().find(|l| l.host() == owner) {
                load.push(index);
            }
        }
    }

    // 4. Hand every orphan slot to the currently least-loaded host.
    for index in 0..slots.len() {
        if slots[index].is_none() {
            if let Some(lightest) = loads.iter_mut().min_by(|a, b| HostLoad::cmp_load(a, b)) {
                lightest.push(index);
                slots[index] = Some(lightest.host().clone());
            }
        }
    }

    // 5. Move the longest-held bucket from the heaviest host to the
    // lightest until the spread is at most one. min_by keeps the first
    // minimum and max_by the last maximum, which matches the (count, host)
    // total order on ties.
    let mut moved = 0usize;
    loop {
        let light_idx = match index_of_min(&loads) {
            Some(i) => i,
            None => break,
        };
        let heavy_idx = match index_of_max(&loads) {
            Some(i) => i,
            None => break,
        };
        if loads[heavy_idx].len() < loads[light_idx].len() + 2 {
            break;
        }

        let bucket = match loads[heavy_idx].take_oldest() {
            Some(bucket) => bucket,
            None => break,
        };
        loads[light_idx].push(bucket);
        slots[bucket] = Some(loads[light_idx].host().clone());
        moved += 1;
    }

    debug!(
        hosts = live_hosts.len(),
        buckets = slots.len(),
        moved,
        "leveled bucket assignment"
    );

    BucketAssignments::from_slots(slots)
}

fn index_of_min(loads: &[HostLoad]) -> Option<usize> {
    (0..loads.len()).min_by(|&a, &b| HostLoad::cmp_load(&loads[a], &loads[b]))
}

fn index_of_max(loads: &[HostLoad]) -> Option<usize> {
    (0..loads.len()).max_by(|&a, &b| HostLoad::cmp_load(&loads[a], &loads[b]))
}
