//! Tauri command handlers for the tracker shell
//!
//! Commands are organized by concern:
//! - `tracker` - store reads, relay toggle, history browsing and event streaming
//! - `notification_cmd` - alert interaction reported by the frontend
//! - `config_cmd` - configuration read-out

pub mod config_cmd;
pub mod notification_cmd;
pub mod tracker;

use std::sync::Arc;
use tokio::sync::Mutex;

use crate::config::Config;
use crate::error::TrackerResult;
use crate::store::MotorcycleStore;

// Note: Commands are accessed via their submodules directly (e.g., commands::tracker::toggle_device)
// rather than being re-exported here, because Tauri's generate_handler! macro
// needs the __cmd__ functions to be accessible at the defining module level.

/// Shared application state managed by Tauri
pub struct AppState {
    /// The one store instance for the app's lifetime, disposed on exit
    pub store: MotorcycleStore,

    /// Configuration the store was built from
    pub config: Arc<Mutex<Config>>,
}

impl AppState {
    pub fn from_config(config: Config) -> TrackerResult<Self> {
        let store = MotorcycleStore::from_config(&config)?;
        Ok(Self {
            store,
            config: Arc::new(Mutex::new(config)),
        })
    }
}
