//! In-memory cluster harness for end-to-end coordination scenarios.
//!
//! [`InMemoryBus`] stands in for the pub/sub transport: every attached
//! host receives every published frame, its own included (the Start state
//! depends on hearing its own heartbeat echo). Hosts can be partitioned,
//! which silently drops frames from and to them, and delivery can be
//! jittered to shake out ordering assumptions.

use crate::assignment::BucketAssignments;
use crate::config::{CoordinatorConfig, TimerConfig};
use crate::coordination::StateMachine;
use crate::error::Result;
use crate::protocol::Envelope;
use crate::runtime::{HostRuntime, MessageBus, WorkRouter};
use crate::types::{ChannelId, HostId};
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Broadcast bus delivering every frame to every attached host.
pub struct InMemoryBus {
    attachments: RwLock<Vec<(HostId, mpsc::UnboundedSender<Bytes>)>>,
    frames: Mutex<HashMap<ChannelId, Vec<Bytes>>>,
    partitioned: RwLock<HashSet<HostId>>,
    jitter: AtomicBool,
}

impl InMemoryBus {
    /// Create an empty bus.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            attachments: RwLock::new(Vec::new()),
            frames: Mutex::new(HashMap::new()),
            partitioned: RwLock::new(HashSet::new()),
            jitter: AtomicBool::new(false),
        })
    }

    /// Randomly skew delivery by a few milliseconds per host.
    pub fn enable_jitter(&self) {
        self.jitter.store(true, Ordering::SeqCst);
    }

    /// Attach a host: spawns a pump task feeding delivered frames into
    /// the runtime. Must be called before the host's runtime starts so
    /// the host can hear its own boot heartbeat.
    pub fn attach(self: &Arc<Self>, host: HostId, runtime: Arc<HostRuntime>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();
        self.attachments.write().push((host, tx));

        let jittered = self.jitter.load(Ordering::SeqCst);
        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if jittered {
                    let skew = rand::random::<u64>() % 3;
                    tokio::time::sleep(Duration::from_millis(skew)).await;
                }
                // Structurally invalid or garbled frames are the
                // receiver's problem; the bus keeps pumping.
                let _ = runtime.deliver(&frame);
            }
        });
    }

    /// Drop all traffic from and to a host.
    pub fn partition(&self, host: &HostId) {
        self.partitioned.write().insert(host.clone());
    }

    /// Restore a partitioned host.
    pub fn heal(&self, host: &HostId) {
        self.partitioned.write().remove(host);
    }

    /// Every frame ever published on a channel, partitioned senders
    /// included.
    pub fn frames_on(&self, channel: &ChannelId) -> Vec<Bytes> {
        self.frames.lock().get(channel).cloned().unwrap_or_default()
    }
}

impl MessageBus for InMemoryBus {
    fn publish(&self, channel: &ChannelId, frame: Bytes) -> Result<()> {
        self.frames
            .lock()
            .entry(channel.clone())
            .or_default()
            .push(frame.clone());

        let source = Envelope::from_bytes(&frame).map(|e| e.source).ok();
        let partitioned = self.partitioned.read();
        if let Some(source) = &source {
            if partitioned.contains(source) {
                return Ok(());
            }
        }

        for (host, tx) in self.attachments.read().iter() {
            if partitioned.contains(host) {
                continue;
            }
            let _ = tx.send(frame.clone());
        }
        Ok(())
    }
}

/// Work-router double that remembers every hand-off.
#[derive(Debug, Default)]
pub struct RecordingRouter {
    history: Mutex<Vec<Option<BucketAssignments>>>,
}

impl RecordingRouter {
    /// Create an empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recent distribution, if it was not a clear.
    pub fn current(&self) -> Option<BucketAssignments> {
        self.history.lock().last().cloned().flatten()
    }

    /// Number of hand-offs seen.
    pub fn distribution_count(&self) -> usize {
        self.history.lock().len()
    }
}

impl WorkRouter for RecordingRouter {
    fn start_distributing(&self, assignments: Option<BucketAssignments>) {
        self.history.lock().push(assignments);
    }
}

/// One host inside a [`TestCluster`].
pub struct TestHost {
    /// The host's id.
    pub id: HostId,
    /// The runtime gluing bus, timers and machine together.
    pub runtime: Arc<HostRuntime>,
    /// The host's coordination machine.
    pub machine: Arc<StateMachine>,
    /// The recorded work-router hand-offs.
    pub router: Arc<RecordingRouter>,
}

/// A fleet of coordinated hosts over one in-memory bus.
pub struct TestCluster {
    bus: Arc<InMemoryBus>,
    hosts: Vec<TestHost>,
}

impl TestCluster {
    /// Create an empty cluster.
    pub fn new() -> Self {
        Self {
            bus: InMemoryBus::new(),
            hosts: Vec::new(),
        }
    }

    /// The shared bus.
    pub fn bus(&self) -> &Arc<InMemoryBus> {
        &self.bus
    }

    /// Boot a host with compressed timers and attach it to the bus.
    pub fn spawn_host(&mut self, id: &str) -> &TestHost {
        let config = CoordinatorConfig::new(id).with_timers(TimerConfig::fast());
        let router = Arc::new(RecordingRouter::new());
        let runtime = HostRuntime::new(config, self.bus.clone(), router.clone());
        self.bus.attach(id.to_string(), runtime.clone());
        let machine = runtime.start();

        self.hosts.push(TestHost {
            id: id.to_string(),
            runtime,
            machine,
            router,
        });
        self.hosts.last().expect("just pushed")
    }

    /// Look up a host by id.
    pub fn host(&self, id: &str) -> &TestHost {
        self.hosts
            .iter()
            .find(|h| h.id == id)
            .unwrap_or_else(|| panic!("unknown test host {}", id))
    }

    /// All hosts.
    pub fn hosts(&self) -> &[TestHost] {
        &self.hosts
    }

    /// Cut a host off from the bus.
    pub fn partition(&self, id: &str) {
        self.bus.partition(&id.to_string());
    }

    /// Reconnect a host.
    pub fn heal(&self, id: &str) {
        self.bus.heal(&id.to_string());
    }
}

impl Default for TestCluster {
    fn default() -> Self {
        Self::new()
    }
}
