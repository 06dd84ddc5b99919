//! Remote key-value store boundary
//!
//! The tracker only needs four primitives from the realtime database:
//! - `get` - one-shot snapshot read of a path
//! - `update` - partial merge of fields at a path
//! - `remove` - delete a whole subtree
//! - `listen` - live snapshots of a path, delivered over a channel
//!
//! `FirebaseStore` talks to the Firebase Realtime Database REST API,
//! `MemoryStore` keeps everything in-process.

pub mod firebase;
pub mod memory;
pub mod mirror;
pub mod sse;

pub use firebase::FirebaseStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};

use crate::error::TrackerResult;

#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn get(&self, path: &str) -> TrackerResult<Value>;

    async fn update(&self, path: &str, fields: Map<String, Value>) -> TrackerResult<()>;

    async fn remove(&self, path: &str) -> TrackerResult<()>;

    /// Open a live subscription on `path`. The first snapshot is the current
    /// value, every later one follows a remote change.
    ///
    /// Must be called from within a Tokio runtime.
    fn listen(&self, path: &str) -> Listener;
}

/// Receiving end of a live subscription.
///
/// Dropping or closing the listener stops the background task feeding it.
pub struct Listener {
    snapshots: mpsc::Receiver<Value>,
    task: Option<JoinHandle<()>>,
}

impl Listener {
    pub fn new(snapshots: mpsc::Receiver<Value>, task: JoinHandle<()>) -> Self {
        Self {
            snapshots,
            task: Some(task),
        }
    }

    pub async fn recv(&mut self) -> Option<Value> {
        self.snapshots.recv().await
    }

    /// Handle that stops the feeding task without owning the listener
    pub fn abort_handle(&self) -> Option<AbortHandle> {
        self.task.as_ref().map(JoinHandle::abort_handle)
    }

    pub fn close(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.snapshots.close();
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.close();
    }
}

/// Join two slash-separated paths, ignoring redundant separators
pub fn join_path(base: &str, child: &str) -> String {
    let base = base.trim_matches('/');
    let child = child.trim_matches('/');
    match (base.is_empty(), child.is_empty()) {
        (true, _) => child.to_string(),
        (_, true) => base.to_string(),
        _ => format!("{}/{}", base, child),
    }
}
