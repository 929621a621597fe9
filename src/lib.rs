//! Peer-to-peer bucket-ownership coordination for homogeneous worker fleets.
//!
//! This crate lets a fleet of identical worker hosts agree, without a
//! central coordinator, on who leads, which of a fixed number of logical
//! work buckets each live host owns, and how ownership is redistributed
//! as hosts join, leave or go silent. Every host runs the same
//! message-driven state machine; the host with the smallest id among the
//! current owners is the leader and is the only one that recomputes the
//! bucket map.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       HostRuntime                           │
//! │   ┌───────────────┐   ┌──────────────┐   ┌──────────────┐   │
//! │   │  MessageBus   │   │ tokio timers │   │  WorkRouter  │   │
//! │   │ (transport)   │   │ (scheduler)  │   │ (work engine)│   │
//! │   └───────┬───────┘   └──────┬───────┘   └──────▲───────┘   │
//! │           │ frames           │ firings          │ bucket map │
//! │           ▼                  ▼                  │            │
//! │   ┌─────────────────────────────────────────────┴───────┐   │
//! │   │                    StateMachine                     │   │
//! │   │      Start ─► Query ─► Active ◄─► Inactive          │   │
//! │   └─────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use corral::{CoordinatorConfig, HostRuntime};
//! use std::sync::Arc;
//!
//! # async fn run(bus: Arc<dyn corral::MessageBus>, router: Arc<dyn corral::WorkRouter>) {
//! let config = CoordinatorConfig::new(corral::generate_host_id());
//! let runtime = HostRuntime::new(config, bus, router);
//! let machine = runtime.start();
//!
//! // Wire the transport listener: every inbound frame goes to
//! // runtime.deliver(&frame). The membership detector reports the live
//! // set with runtime.membership_changed(&live_hosts) while this host
//! // leads.
//! # }
//! ```
//!
//! # Consistency model
//!
//! There is no quorum protocol: the design trades strong consistency for
//! simplicity and relies on deterministic recomputation. Any host that
//! observes the same membership derives the same bucket map, Leader
//! broadcasts from anyone but the rightful leader are ignored, and every
//! disagreement is resolved by falling back to the boot sequence and
//! re-discovering the cluster.

pub mod assignment;
pub mod config;
pub mod coordination;
pub mod error;
pub mod manager;
pub mod metrics;
pub mod protocol;
pub mod runtime;
pub mod testing;
pub mod types;

// Re-export main types for convenience.
pub use assignment::{rebalance, BucketAssignments, HostLoad};
pub use config::{CoordinatorConfig, TimerConfig};
pub use coordination::{StateKind, StateMachine};
pub use error::{Error, ProtocolError, Result};
pub use manager::{Manager, TimerBag, TimerEvent, TimerHandle};
pub use metrics::{CoordinationMetrics, MetricsSnapshot};
pub use protocol::{Envelope, Payload};
pub use runtime::{HostRuntime, MessageBus, WorkRouter};
pub use types::{
    data_channel_for, generate_host_id, ChannelId, HostId, DEFAULT_ADMIN_CHANNEL, MAX_BUCKETS,
};
