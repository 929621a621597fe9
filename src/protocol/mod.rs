//! Message types exchanged between coordinating hosts.
//!
//! Every message is an [`Envelope`] carrying the source host id, the
//! logical channel it was sent on, and a typed [`Payload`]. Envelopes are
//! transport-agnostic: the wire form is a bincode-encoded byte frame, and
//! whatever bus carries the frame is free to add its own addressing.
//!
//! Structural validity (source and channel present, assignment payloads
//! non-empty) is checked here, before dispatch. Whether the sender of a
//! Leader broadcast is actually the rightful leader of the assignment it
//! carries is a separate question, answered by
//! [`leader_claim_is_valid`] at the state-machine level; a broadcast that
//! fails it is structurally fine but logically ignored.

use crate::assignment::BucketAssignments;
use crate::error::ProtocolError;
use crate::types::{ChannelId, HostId};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// A message envelope exchanged between hosts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    /// Host that produced the message.
    pub source: HostId,

    /// Channel the message was published on.
    pub channel: ChannelId,

    /// Typed message body.
    pub payload: Payload,
}

/// Typed message bodies.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Payload {
    /// Periodic liveness signal on the sender's data channel.
    Heartbeat {
        /// Value chosen by the sender at state entry; a host recognizes
        /// its own echo by matching this exactly.
        timestamp_ms: u64,
    },

    /// Reply to a Query, revealing the sender's view of the assignment.
    Identification {
        /// Current assignments, absent when the sender owns nothing yet.
        assignments: Option<BucketAssignments>,
    },

    /// Authoritative assignment broadcast from the leader.
    Leader {
        /// The new full bucket map.
        assignments: BucketAssignments,
    },

    /// Voluntary departure announcement.
    Offline,

    /// Solicits an Identification reply from whoever processes it.
    Query,
}

impl Envelope {
    /// Create a heartbeat envelope for the given data channel.
    pub fn heartbeat(source: HostId, channel: ChannelId, timestamp_ms: u64) -> Self {
        Self {
            source,
            channel,
            payload: Payload::Heartbeat { timestamp_ms },
        }
    }

    /// Create an identification reply.
    pub fn identification(
        source: HostId,
        channel: ChannelId,
        assignments: Option<BucketAssignments>,
    ) -> Self {
        Self {
            source,
            channel,
            payload: Payload::Identification { assignments },
        }
    }

    /// Create a leader broadcast.
    pub fn leader(source: HostId, channel: ChannelId, assignments: BucketAssignments) -> Self {
        Self {
            source,
            channel,
            payload: Payload::Leader { assignments },
        }
    }

    /// Create an offline announcement.
    pub fn offline(source: HostId, channel: ChannelId) -> Self {
        Self {
            source,
            channel,
            payload: Payload::Offline,
        }
    }

    /// Create a membership query.
    pub fn query(source: HostId, channel: ChannelId) -> Self {
        Self {
            source,
            channel,
            payload: Payload::Query,
        }
    }

    /// Check structural validity.
    ///
    /// A message failing this check is rejected at the boundary and never
    /// dispatched to a state.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.source.is_empty() {
            return Err(ProtocolError::MissingSource);
        }
        if self.channel.is_empty() {
            return Err(ProtocolError::MissingChannel);
        }
        match &self.payload {
            Payload::Leader { assignments } => {
                if assignments.is_empty() {
                    return Err(ProtocolError::EmptyAssignments);
                }
            }
            Payload::Identification {
                assignments: Some(assignments),
            } => {
                if assignments.is_empty() {
                    return Err(ProtocolError::EmptyAssignments);
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Serialize the envelope to wire bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serialize(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    /// Deserialize an envelope from wire bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        Ok(bincode::deserialize(data)?)
    }
}

/// Semantic check for a Leader broadcast.
///
/// Only the rightful leader's broadcasts are honored: the assignments must
/// be non-empty, the sender must own at least one bucket in them, and the
/// sender must be the assignment's computed leader (smallest host id
/// present). Anything else is ignored without being an error.
pub fn leader_claim_is_valid(source: &HostId, assignments: &BucketAssignments) -> bool {
    if assignments.is_empty() {
        return false;
    }
    if !assignments.has_host(source) {
        return false;
    }
    assignments.leader().map(|l| l == source).unwrap_or(false)
}

/// Current time as epoch milliseconds, for heartbeat stamping.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MAX_BUCKETS;

    fn assignments_for(hosts: &[&str]) -> BucketAssignments {
        let mut slots = vec![None; MAX_BUCKETS];
        for (i, host) in hosts.iter().enumerate() {
            slots[i] = Some(host.to_string());
        }
        BucketAssignments::from_slots(slots)
    }

    #[test]
    fn test_validate_requires_source_and_channel() {
        let msg = Envelope::query(String::new(), "admin".into());
        assert!(matches!(
            msg.validate(),
            Err(ProtocolError::MissingSource)
        ));

        let msg = Envelope::query("host-a".into(), String::new());
        assert!(matches!(
            msg.validate(),
            Err(ProtocolError::MissingChannel)
        ));

        let msg = Envelope::query("host-a".into(), "admin".into());
        assert!(msg.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_leader_assignments() {
        let msg = Envelope::leader(
            "host-a".into(),
            "admin".into(),
            BucketAssignments::default(),
        );
        assert!(matches!(
            msg.validate(),
            Err(ProtocolError::EmptyAssignments)
        ));
    }

    #[test]
    fn test_validate_rejects_empty_identification_assignments() {
        let msg = Envelope::identification(
            "host-a".into(),
            "admin".into(),
            Some(BucketAssignments::default()),
        );
        assert!(matches!(
            msg.validate(),
            Err(ProtocolError::EmptyAssignments)
        ));

        // Absent assignments are fine: an Inactive host identifies itself
        // without owning anything.
        let msg = Envelope::identification("host-a".into(), "admin".into(), None);
        assert!(msg.validate().is_ok());
    }

    #[test]
    fn test_wire_round_trip() {
        let original = Envelope::leader(
            "host-a".into(),
            "admin".into(),
            assignments_for(&["host-a", "host-b"]),
        );
        let bytes = original.to_bytes().unwrap();
        let decoded = Envelope::from_bytes(&bytes).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn test_heartbeat_round_trip_keeps_timestamp() {
        let original = Envelope::heartbeat("host-a".into(), "data".into(), 424242);
        let decoded = Envelope::from_bytes(&original.to_bytes().unwrap()).unwrap();
        match decoded.payload {
            Payload::Heartbeat { timestamp_ms } => assert_eq!(timestamp_ms, 424242),
            other => panic!("expected heartbeat, got {:?}", other),
        }
    }

    #[test]
    fn test_leader_claim_truth_table() {
        let empty = BucketAssignments::default();
        let a_leads = assignments_for(&["host-a", "host-b"]);

        // Empty assignments never pass.
        assert!(!leader_claim_is_valid(&"host-a".to_string(), &empty));

        // Sender absent from the assignment.
        assert!(!leader_claim_is_valid(&"host-z".to_string(), &a_leads));

        // Sender present but not the smallest id.
        assert!(!leader_claim_is_valid(&"host-b".to_string(), &a_leads));

        // The rightful leader.
        assert!(leader_claim_is_valid(&"host-a".to_string(), &a_leads));
    }
}
