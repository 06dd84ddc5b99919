//! Motorcycle state store
//!
//! Owns everything the UI reads. Remote snapshots are applied by a single
//! consumer task, relay writes and history fetches run in call order on a
//! single worker task, and every transition is published as a
//! [`TrackerEvent`].
//!
//! ```text
//!  remote ──snapshots──► consumer ──► state ──► events
//!                                       ▲
//!  UI ──toggle/load──► command queue ──► worker ──► remote
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockWriteGuard, Weak};

use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::adapter::{Subscription, SyncAdapter};
use crate::config::Config;
use crate::error::{TrackerError, TrackerResult};
use crate::events::TrackerEvent;
use crate::models::{CurrentLocation, HistoricalLocation};
use crate::notification::{
    notifier_from_config, AlertDispatcher, AlertPolicy, ListenerHandle, NotificationCenter,
    Notifier,
};
use crate::remote::FirebaseStore;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Read-only snapshot of the store handed to the UI
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackerState {
    pub current_location: CurrentLocation,
    pub alert_active: bool,
    pub device_on: bool,
    pub historical_locations: Vec<HistoricalLocation>,
    pub history_visible: bool,
    pub selected_history: Option<HistoricalLocation>,
}

#[derive(Default)]
struct Guarded {
    state: TrackerState,
    disposed: bool,
}

#[derive(Debug)]
enum Command {
    WriteDeviceControl { device_id: String, on: bool },
    FetchHistory { device_id: String },
}

#[derive(Default)]
struct Lifecycle {
    mounted: bool,
    command_rx: Option<mpsc::UnboundedReceiver<Command>>,
    tasks: Vec<AbortHandle>,
    listeners: Vec<ListenerHandle>,
}

struct Inner {
    adapter: SyncAdapter,
    alerts: AlertDispatcher,
    policy: AlertPolicy,
    state: RwLock<Guarded>,
    events: broadcast::Sender<TrackerEvent>,
    commands: mpsc::UnboundedSender<Command>,
    lifecycle: Mutex<Lifecycle>,
}

#[derive(Clone)]
pub struct MotorcycleStore {
    inner: Arc<Inner>,
}

impl MotorcycleStore {
    pub fn new(adapter: SyncAdapter, notifier: Arc<dyn Notifier>, policy: AlertPolicy) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (commands, command_rx) = mpsc::unbounded_channel();

        Self {
            inner: Arc::new(Inner {
                adapter,
                alerts: AlertDispatcher::new(notifier, NotificationCenter::new()),
                policy,
                state: RwLock::new(Guarded::default()),
                events,
                commands,
                lifecycle: Mutex::new(Lifecycle {
                    command_rx: Some(command_rx),
                    ..Lifecycle::default()
                }),
            }),
        }
    }

    /// Store backed by the Firebase database and push settings in `config`
    pub fn from_config(config: &Config) -> TrackerResult<Self> {
        let remote = FirebaseStore::from_config(config)?;
        let adapter = SyncAdapter::new(Arc::new(remote), config.data_path.clone());
        let notifier = notifier_from_config(config)?;
        Ok(Self::new(adapter, notifier, config.alert_policy))
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Request notification permission, register notification listeners,
    /// open the remote subscription and start the background tasks.
    ///
    /// Calling it again is a no-op; after [`dispose`](Self::dispose) it fails.
    pub async fn mount(&self) -> TrackerResult<()> {
        {
            let lifecycle = self.inner.lifecycle();
            if self.inner.is_disposed() {
                return Err(TrackerError::Disposed);
            }
            if lifecycle.mounted {
                return Ok(());
            }
        }

        self.inner.alerts.request_permission().await;

        let mut lifecycle = self.inner.lifecycle();
        if self.inner.is_disposed() {
            return Err(TrackerError::Disposed);
        }
        // a concurrent mount won the race while permission was pending
        if lifecycle.mounted {
            return Ok(());
        }
        lifecycle.mounted = true;

        let center = self.inner.alerts.center();
        lifecycle.listeners.push(center.add_received_listener(|event| {
            info!(?event, "notification received");
        }));
        lifecycle.listeners.push(center.add_response_listener(|event| {
            info!(?event, "notification response");
        }));

        let subscription = self.inner.adapter.subscribe();
        if let Some(handle) = subscription.abort_handle() {
            lifecycle.tasks.push(handle);
        }
        let consumer = tokio::spawn(consume_snapshots(Arc::downgrade(&self.inner), subscription));
        lifecycle.tasks.push(consumer.abort_handle());

        if let Some(command_rx) = lifecycle.command_rx.take() {
            let worker = tokio::spawn(run_commands(Arc::downgrade(&self.inner), command_rx));
            lifecycle.tasks.push(worker.abort_handle());
        }

        info!(path = %self.inner.adapter.data_path(), "store mounted");
        Ok(())
    }

    /// Tear down the subscription, workers and listeners. Idempotent; no
    /// state transition lands after this returns.
    pub fn dispose(&self) {
        {
            let mut guard = self.inner.write();
            if guard.disposed {
                return;
            }
            guard.disposed = true;
            self.inner.publish(TrackerEvent::Disposed);
        }

        let mut lifecycle = self.inner.lifecycle();
        for task in lifecycle.tasks.drain(..) {
            task.abort();
        }
        for listener in lifecycle.listeners.drain(..) {
            listener.remove();
        }
        lifecycle.command_rx = None;
        info!("store disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.is_disposed()
    }

    pub fn events(&self) -> broadcast::Receiver<TrackerEvent> {
        self.inner.events.subscribe()
    }

    pub fn notifications(&self) -> NotificationCenter {
        self.inner.alerts.center().clone()
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub fn snapshot(&self) -> TrackerState {
        self.read(|state| state.clone())
    }

    pub fn current_location(&self) -> CurrentLocation {
        self.read(|state| state.current_location.clone())
    }

    pub fn alert_active(&self) -> bool {
        self.read(|state| state.alert_active)
    }

    pub fn device_on(&self) -> bool {
        self.read(|state| state.device_on)
    }

    pub fn historical_locations(&self) -> Vec<HistoricalLocation> {
        self.read(|state| state.historical_locations.clone())
    }

    pub fn history_visible(&self) -> bool {
        self.read(|state| state.history_visible)
    }

    pub fn selected_history(&self) -> Option<HistoricalLocation> {
        self.read(|state| state.selected_history.clone())
    }

    fn read<T>(&self, f: impl FnOnce(&TrackerState) -> T) -> T {
        let guard = self
            .inner
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        f(&guard.state)
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// Flip the relay and queue the remote write. Returns the new state.
    ///
    /// Never blocks; a failed write is only logged. Before the first reading
    /// arrives there is no device record to write under, so only the local
    /// flag flips and no write is issued.
    pub fn toggle_device(&self) -> bool {
        let (on, target) = {
            let mut guard = self.inner.write();
            if guard.disposed {
                return guard.state.device_on;
            }
            guard.state.device_on = !guard.state.device_on;
            let on = guard.state.device_on;
            self.inner.publish(TrackerEvent::DeviceToggled { on });
            self.inner.hide_history(&mut guard);
            (on, guard.state.current_location.clone())
        };

        if target.has_device() {
            self.inner.enqueue(Command::WriteDeviceControl {
                device_id: target.device_id,
                on,
            });
        } else {
            warn!(on, "no device known yet, relay state not written");
        }
        on
    }

    /// Queue a history fetch; the list is replaced and the history view
    /// opened once it completes. Does nothing until a device is known.
    pub fn load_history(&self) {
        let current = {
            let guard = self.inner.state.read().unwrap_or_else(PoisonError::into_inner);
            if guard.disposed {
                return;
            }
            guard.state.current_location.clone()
        };

        if !current.has_device() {
            debug!("history requested before any reading arrived");
            return;
        }
        self.inner.enqueue(Command::FetchHistory {
            device_id: current.device_id,
        });
    }

    pub fn select_history(&self, location: HistoricalLocation) {
        let mut guard = self.inner.write();
        if guard.disposed {
            return;
        }
        let id = location.id.clone();
        guard.state.selected_history = Some(location);
        self.inner.publish(TrackerEvent::HistorySelected { id });
        self.inner.hide_history(&mut guard);
    }

    pub fn set_history_visible(&self, visible: bool) {
        let mut guard = self.inner.write();
        if guard.disposed || guard.state.history_visible == visible {
            return;
        }
        guard.state.history_visible = visible;
        self.inner.publish(TrackerEvent::HistoryVisibility { visible });
    }

    /// Delete a record remotely, then drop it from the history list.
    /// On failure the list is left as it was.
    pub async fn delete_history(&self, id: &str) -> TrackerResult<()> {
        if self.inner.is_disposed() {
            return Err(TrackerError::Disposed);
        }

        if let Err(e) = self.inner.adapter.delete_record(id).await {
            warn!(id, error = %e, "failed to delete history record");
            return Err(e);
        }

        let mut guard = self.inner.write();
        if guard.disposed {
            return Ok(());
        }
        guard.state.historical_locations.retain(|location| location.id != id);
        self.inner
            .publish(TrackerEvent::HistoryDeleted { id: id.to_string() });
        info!(id, "history record deleted");
        Ok(())
    }
}

impl Inner {
    fn write(&self) -> RwLockWriteGuard<'_, Guarded> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_disposed(&self) -> bool {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .disposed
    }

    fn publish(&self, event: TrackerEvent) {
        // nobody listening is fine
        let _ = self.events.send(event);
    }

    fn enqueue(&self, command: Command) {
        if self.commands.send(command).is_err() {
            debug!("command queue closed");
        }
    }

    fn hide_history(&self, guard: &mut Guarded) {
        if guard.state.history_visible {
            guard.state.history_visible = false;
            self.publish(TrackerEvent::HistoryVisibility { visible: false });
        }
    }

    fn apply_location(&self, location: CurrentLocation) {
        let mut guard = self.write();
        if guard.disposed {
            return;
        }

        let was_active = guard.state.alert_active;
        let alert_active = location.reading.vibration_detected();
        guard.state.current_location = location.clone();
        guard.state.alert_active = alert_active;

        debug!(device_id = %location.device_id, alert_active, "reading applied");
        if self.policy.should_fire(was_active, alert_active) {
            info!(device_id = %location.device_id, "vibration detected");
            self.alerts.dispatch(&location);
        }
        self.publish(TrackerEvent::LocationUpdated {
            location,
            alert_active,
        });
    }

    fn apply_history(&self, mut history: Vec<HistoricalLocation>) {
        let mut guard = self.write();
        if guard.disposed {
            return;
        }

        // the active device may have changed while the fetch was in flight
        let current = &guard.state.current_location.device_id;
        history.retain(|location| &location.id != current);

        let count = history.len();
        guard.state.historical_locations = history;
        self.publish(TrackerEvent::HistoryLoaded { count });
        if !guard.state.history_visible {
            guard.state.history_visible = true;
            self.publish(TrackerEvent::HistoryVisibility { visible: true });
        }
    }

    async fn execute(&self, command: Command) {
        match command {
            Command::WriteDeviceControl { device_id, on } => {
                if let Err(e) = self.adapter.write_device_control(&device_id, on).await {
                    warn!(device_id = %device_id, on, error = %e, "relay write failed");
                }
            }
            Command::FetchHistory { device_id } => {
                match self.adapter.fetch_history(&device_id).await {
                    Ok(history) => self.apply_history(history),
                    Err(e) => warn!(error = %e, "history fetch failed"),
                }
            }
        }
    }
}

async fn consume_snapshots(inner: Weak<Inner>, mut subscription: Subscription) {
    while let Some(location) = subscription.next().await {
        let Some(inner) = inner.upgrade() else {
            // store dropped without dispose
            subscription.unsubscribe();
            return;
        };
        inner.apply_location(location);
    }
    debug!("snapshot consumer stopped");
}

async fn run_commands(inner: Weak<Inner>, mut commands: mpsc::UnboundedReceiver<Command>) {
    while let Some(command) = commands.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        debug!(?command, "executing command");
        inner.execute(command).await;
    }
    debug!("command worker stopped");
}
