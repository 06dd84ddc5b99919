//! In-process remote store.
//!
//! Mirrors the realtime database semantics the tracker relies on (null
//! deletes, partial merges, live snapshots of a path) and records every write
//! so callers can assert on what would have gone over the wire.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::{mpsc, watch};
use tracing::debug;

use super::mirror::{apply_put, value_at};
use super::{join_path, Listener, RemoteStore};
use crate::error::{TrackerError, TrackerResult};
use crate::timeouts::SNAPSHOT_CHANNEL_CAPACITY;

/// A merge issued through [`RemoteStore::update`]
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedWrite {
    pub path: String,
    pub fields: Map<String, Value>,
}

pub struct MemoryStore {
    root: watch::Sender<Value>,
    writes: Mutex<Vec<RecordedWrite>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    fail_deletes: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::with_data(Value::Null)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_data(data: Value) -> Self {
        let (root, _) = watch::channel(data);
        Self {
            root,
            writes: Mutex::new(Vec::new()),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            fail_deletes: AtomicBool::new(false),
        }
    }

    /// Replace the value at `path`, as a device pushing telemetry would
    pub fn set(&self, path: &str, value: Value) {
        self.root.send_modify(|root| apply_put(root, path, value));
    }

    pub fn value_at(&self, path: &str) -> Value {
        value_at(&self.root.borrow(), path)
    }

    pub fn writes(&self) -> Vec<RecordedWrite> {
        self.writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    fn check(flag: &AtomicBool, operation: &str, path: &str) -> TrackerResult<()> {
        if flag.load(Ordering::SeqCst) {
            return Err(TrackerError::RemoteUnavailable(format!(
                "{} of '{}' failed",
                operation, path
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn get(&self, path: &str) -> TrackerResult<Value> {
        Self::check(&self.fail_reads, "read", path)?;
        Ok(self.value_at(path))
    }

    async fn update(&self, path: &str, fields: Map<String, Value>) -> TrackerResult<()> {
        Self::check(&self.fail_writes, "update", path)?;

        self.writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedWrite {
                path: path.to_string(),
                fields: fields.clone(),
            });

        self.root.send_modify(|root| {
            for (key, value) in fields {
                apply_put(root, &join_path(path, &key), value);
            }
        });
        Ok(())
    }

    async fn remove(&self, path: &str) -> TrackerResult<()> {
        Self::check(&self.fail_deletes, "delete", path)?;
        self.set(path, Value::Null);
        Ok(())
    }

    fn listen(&self, path: &str) -> Listener {
        let mut changes = self.root.subscribe();
        let (tx, rx) = mpsc::channel(SNAPSHOT_CHANNEL_CAPACITY);
        let path = path.to_string();

        let task = tokio::spawn(async move {
            loop {
                let snapshot = value_at(&changes.borrow_and_update(), &path);
                if tx.send(snapshot).await.is_err() {
                    break;
                }
                if changes.changed().await.is_err() {
                    break;
                }
            }
            debug!(path = %path, "memory listener stopped");
        });

        Listener::new(rx, task)
    }
}
