//! The volatile worker registry.
//!
//! Entries live in registration order; auction iteration and tie
//! breaking depend on it. The registry lock is only ever held to mutate
//! or snapshot the list, never across an await; per-worker slot state
//! has its own synchronization (lock order: registry before slot).

use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;

use crate::coordinator::slot::BidSlot;
use crate::error::{Result, SwarmError};
use crate::protocol::{MetricSnapshot, WireMessage};

/// One registered worker.
pub struct WorkerEntry {
    /// Stable worker identifier, unique within the live registry
    pub id: String,
    /// Coordinator-observed address of the control connection
    pub addr: IpAddr,
    /// When the registration was accepted
    pub connected_at: DateTime<Utc>,
    /// Whether the device carries a specialized accelerator
    pub has_accelerator: bool,

    accelerator_idle: AtomicBool,
    metrics: Mutex<MetricSnapshot>,
    outbound: mpsc::Sender<WireMessage>,
    /// Bid rendezvous cell for this worker
    pub slot: BidSlot,
}

impl WorkerEntry {
    /// Build an entry from a registration message.
    pub fn from_registration(
        msg: &WireMessage,
        addr: IpAddr,
        outbound: mpsc::Sender<WireMessage>,
    ) -> Self {
        Self {
            id: msg.agent_id.clone(),
            addr,
            connected_at: Utc::now(),
            has_accelerator: msg.has_accel.unwrap_or(false),
            accelerator_idle: AtomicBool::new(msg.npu_free.unwrap_or(false)),
            metrics: Mutex::new(msg.metrics().unwrap_or_default()),
            outbound,
            slot: BidSlot::new(),
        }
    }

    pub fn accelerator_idle(&self) -> bool {
        self.accelerator_idle.load(Ordering::Acquire)
    }

    pub fn metrics(&self) -> MetricSnapshot {
        *self.metrics.lock()
    }

    /// Apply a STATUS report: metric snapshot and accelerator idleness.
    pub fn apply_status(&self, msg: &WireMessage) {
        if let Some(snapshot) = msg.metrics() {
            *self.metrics.lock() = snapshot;
        }
        if let Some(idle) = msg.npu_free {
            self.accelerator_idle.store(idle, Ordering::Release);
        }
        tracing::trace!(worker = %self.id, "Status applied");
    }

    /// Queue a message for this worker's control connection.
    ///
    /// Fails when the connection's writer has gone away; the caller
    /// excludes the worker from the current auction and leaves the
    /// registry entry alone (the read path will evict it).
    pub async fn send(&self, msg: WireMessage) -> Result<()> {
        self.outbound
            .send(msg)
            .await
            .map_err(|_| SwarmError::send_failed(&self.id))
    }
}

impl std::fmt::Debug for WorkerEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerEntry")
            .field("id", &self.id)
            .field("addr", &self.addr)
            .field("has_accelerator", &self.has_accelerator)
            .field("accelerator_idle", &self.accelerator_idle())
            .finish()
    }
}

/// Registration-ordered registry of live workers.
pub struct Registry {
    workers: RwLock<Vec<Arc<WorkerEntry>>>,
    capacity: usize,
}

impl Registry {
    pub fn new(capacity: usize) -> Self {
        Self {
            workers: RwLock::new(Vec::new()),
            capacity,
        }
    }

    /// Add a worker. Rejects when full or when the id is already live.
    pub fn register(&self, entry: Arc<WorkerEntry>) -> Result<()> {
        let mut workers = self.workers.write();
        if workers.len() >= self.capacity {
            return Err(SwarmError::registry_full(self.capacity));
        }
        if workers.iter().any(|w| w.id == entry.id) {
            return Err(SwarmError::duplicate_worker(&entry.id));
        }

        tracing::info!(
            worker = %entry.id,
            addr = %entry.addr,
            has_accelerator = entry.has_accelerator,
            registered = workers.len() + 1,
            "Worker registered"
        );
        workers.push(entry);
        Ok(())
    }

    /// Remove a worker by id, returning its entry when present.
    pub fn remove(&self, id: &str) -> Option<Arc<WorkerEntry>> {
        let mut workers = self.workers.write();
        let pos = workers.iter().position(|w| w.id == id)?;
        let entry = workers.remove(pos);
        tracing::info!(worker = %id, remaining = workers.len(), "Worker evicted");
        Some(entry)
    }

    /// Snapshot the live workers in registration order.
    pub fn snapshot(&self) -> Vec<Arc<WorkerEntry>> {
        self.workers.read().clone()
    }

    pub fn get(&self, id: &str) -> Option<Arc<WorkerEntry>> {
        self.workers.read().iter().find(|w| w.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.workers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{status, MessageType};

    fn registration(id: &str, has_accel: bool) -> WireMessage {
        WireMessage::new(MessageType::RegClient)
            .with_agent(id)
            .with_capability(has_accel, has_accel)
    }

    fn entry(id: &str, has_accel: bool) -> Arc<WorkerEntry> {
        let (tx, _rx) = mpsc::channel(4);
        Arc::new(WorkerEntry::from_registration(
            &registration(id, has_accel),
            "127.0.0.1".parse().unwrap(),
            tx,
        ))
    }

    #[test]
    fn test_register_preserves_order() {
        let registry = Registry::new(10);
        registry.register(entry("a", false)).unwrap();
        registry.register(entry("b", true)).unwrap();
        registry.register(entry("c", false)).unwrap();

        let ids: Vec<_> = registry.snapshot().iter().map(|w| w.id.clone()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let registry = Registry::new(10);
        registry.register(entry("edge-1", false)).unwrap();

        let err = registry.register(entry("edge-1", true)).unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::DuplicateWorker);
        assert_eq!(registry.len(), 1);
        // The original entry survives.
        assert!(!registry.get("edge-1").unwrap().has_accelerator);
    }

    #[test]
    fn test_capacity_enforced() {
        let registry = Registry::new(2);
        registry.register(entry("a", false)).unwrap();
        registry.register(entry("b", false)).unwrap();

        let err = registry.register(entry("c", false)).unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::RegistryFull);
    }

    #[test]
    fn test_remove_keeps_order_of_rest() {
        let registry = Registry::new(10);
        for id in ["a", "b", "c"] {
            registry.register(entry(id, false)).unwrap();
        }
        assert!(registry.remove("b").is_some());
        assert!(registry.remove("b").is_none());

        let ids: Vec<_> = registry.snapshot().iter().map(|w| w.id.clone()).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[test]
    fn test_status_mutates_snapshot() {
        let registry = Registry::new(10);
        registry.register(entry("a", true)).unwrap();
        let worker = registry.get("a").unwrap();
        assert!(worker.accelerator_idle());

        let status = WireMessage::new(MessageType::Status)
            .with_status(status::SUCCESS)
            .with_capability(true, false)
            .with_data(serde_json::json!({
                "metrics": MetricSnapshot { cpu_load: 0.9, ram_pct: 75.0, battery: 40.0, storage_pct: 10.0 }
            }));
        worker.apply_status(&status);

        assert!(!worker.accelerator_idle());
        assert_eq!(worker.metrics().cpu_load, 0.9);
    }
}
