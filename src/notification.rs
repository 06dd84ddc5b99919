//! Vibration alert delivery
//!
//! The store only ever calls [`AlertDispatcher::dispatch`], which fires the
//! alert on a background task and returns. Delivery results come back as
//! [`NotificationEvent`]s on the [`NotificationCenter`].

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{TrackerError, TrackerResult};
use crate::events::NotificationEvent;
use crate::models::CurrentLocation;

pub const ALERT_TITLE: &str = "🚨 Getaran Terdeteksi!";

const NOTIFICATION_CHANNEL_CAPACITY: usize = 64;

/// When a vibration reading raises an alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertPolicy {
    /// Every remote change that carries the sentinel alerts again
    #[default]
    EveryChange,
    /// Only the change that turns the alert on
    OnTransition,
}

impl AlertPolicy {
    pub fn should_fire(self, was_active: bool, is_active: bool) -> bool {
        match self {
            AlertPolicy::EveryChange => is_active,
            AlertPolicy::OnTransition => is_active && !was_active,
        }
    }
}

/// Data attached to an alert so a tap can focus the device on the map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertData {
    pub device_id: String,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertMessage {
    pub id: Uuid,
    pub title: String,
    pub body: String,
    pub data: AlertData,
}

impl AlertMessage {
    pub fn vibration(location: &CurrentLocation) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: ALERT_TITLE.to_string(),
            body: format!("Motor dengan ID: {} mengalami getaran", location.device_id),
            data: AlertData {
                device_id: location.device_id.clone(),
                latitude: location.reading.latitude,
                longitude: location.reading.longitude,
            },
        }
    }
}

/// Delivery acknowledgement from the notification service
#[derive(Debug, Clone, PartialEq)]
pub struct Receipt {
    pub id: Option<String>,
    pub sent_at: DateTime<Utc>,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Ask for permission to notify; returns the push token when granted
    async fn request_permission(&self) -> Option<String>;

    async fn send_alert(&self, alert: &AlertMessage) -> TrackerResult<Receipt>;
}

/// Android channel alerts are posted on
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationChannel {
    pub id: &'static str,
    pub name: &'static str,
    pub importance: &'static str,
    pub vibration_pattern: [u32; 4],
    pub light_color: &'static str,
    pub lockscreen_visibility: &'static str,
}

pub const VIBRATION_CHANNEL: NotificationChannel = NotificationChannel {
    id: "vibration-alert",
    name: "Getaran Motor",
    importance: "high",
    vibration_pattern: [0, 250, 250, 250],
    light_color: "#FF0000",
    lockscreen_visibility: "public",
};

// ============================================================================
// Expo push
// ============================================================================

/// Sends alerts through the Expo push HTTP API
pub struct ExpoPushNotifier {
    client: reqwest::Client,
    endpoint: String,
    token: String,
}

impl ExpoPushNotifier {
    pub fn new(endpoint: impl Into<String>, token: impl Into<String>) -> TrackerResult<Self> {
        let token = token.into();
        if !is_expo_token(&token) {
            return Err(TrackerError::Notification(format!(
                "not an Expo push token: '{}'",
                token
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(crate::timeouts::request_timeout())
            .build()?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            token,
        })
    }

    /// `None` when no push token is configured
    pub fn from_config(config: &Config) -> TrackerResult<Option<Self>> {
        match config.push_token.as_deref() {
            Some(token) => Self::new(config.push_endpoint.clone(), token).map(Some),
            None => Ok(None),
        }
    }
}

fn is_expo_token(token: &str) -> bool {
    ["ExponentPushToken[", "ExpoPushToken["]
        .iter()
        .any(|prefix| token.starts_with(prefix) && token.ends_with(']') && token.len() > prefix.len() + 1)
}

/// Request body for a single push message
pub fn push_payload(token: &str, alert: &AlertMessage) -> Value {
    json!({
        "to": token,
        "title": alert.title,
        "body": alert.body,
        "data": alert.data,
        "sound": "default",
        "priority": "high",
        "channelId": VIBRATION_CHANNEL.id,
    })
}

#[derive(Deserialize)]
struct TicketResponse {
    data: Ticket,
}

#[derive(Deserialize)]
struct Ticket {
    status: String,
    id: Option<String>,
    message: Option<String>,
}

/// Turn a push ticket into a receipt; an `error` ticket is a failed send
pub fn parse_ticket(body: Value) -> TrackerResult<Receipt> {
    let response: TicketResponse = serde_json::from_value(body)?;
    let ticket = response.data;

    if ticket.status != "ok" {
        return Err(TrackerError::Notification(
            ticket
                .message
                .unwrap_or_else(|| format!("push ticket status '{}'", ticket.status)),
        ));
    }

    Ok(Receipt {
        id: ticket.id,
        sent_at: Utc::now(),
    })
}

#[async_trait]
impl Notifier for ExpoPushNotifier {
    async fn request_permission(&self) -> Option<String> {
        Some(self.token.clone())
    }

    async fn send_alert(&self, alert: &AlertMessage) -> TrackerResult<Receipt> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&push_payload(&self.token, alert))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TrackerError::Notification(format!(
                "push service returned {}",
                status
            )));
        }

        parse_ticket(response.json::<Value>().await?)
    }
}

/// Used when no push token is configured: alerts are only logged
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn request_permission(&self) -> Option<String> {
        None
    }

    async fn send_alert(&self, alert: &AlertMessage) -> TrackerResult<Receipt> {
        info!(title = %alert.title, body = %alert.body, "alert (no push token configured)");
        Ok(Receipt {
            id: None,
            sent_at: Utc::now(),
        })
    }
}

/// Expo when a push token is configured, log-only otherwise
pub fn notifier_from_config(config: &Config) -> TrackerResult<Arc<dyn Notifier>> {
    let notifier: Arc<dyn Notifier> = match ExpoPushNotifier::from_config(config)? {
        Some(expo) => Arc::new(expo),
        None => Arc::new(LogNotifier),
    };
    Ok(notifier)
}

// ============================================================================
// Listeners
// ============================================================================

/// Broadcast hub for alert delivery and interaction events
#[derive(Clone)]
pub struct NotificationCenter {
    tx: broadcast::Sender<NotificationEvent>,
}

impl Default for NotificationCenter {
    fn default() -> Self {
        let (tx, _) = broadcast::channel(NOTIFICATION_CHANNEL_CAPACITY);
        Self { tx }
    }
}

impl NotificationCenter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, event: NotificationEvent) {
        // no receivers is fine
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NotificationEvent> {
        self.tx.subscribe()
    }

    /// The UI reports that the user tapped an alert
    pub fn respond(&self, data: Value) {
        let device_id = data
            .get("deviceId")
            .and_then(Value::as_str)
            .map(str::to_string);
        self.publish(NotificationEvent::Responded { device_id, data });
    }

    pub fn add_received_listener<F>(&self, callback: F) -> ListenerHandle
    where
        F: Fn(NotificationEvent) + Send + 'static,
    {
        self.add_listener(
            |event| matches!(event, NotificationEvent::Received { .. }),
            callback,
        )
    }

    pub fn add_response_listener<F>(&self, callback: F) -> ListenerHandle
    where
        F: Fn(NotificationEvent) + Send + 'static,
    {
        self.add_listener(
            |event| matches!(event, NotificationEvent::Responded { .. }),
            callback,
        )
    }

    fn add_listener<P, F>(&self, wants: P, callback: F) -> ListenerHandle
    where
        P: Fn(&NotificationEvent) -> bool + Send + 'static,
        F: Fn(NotificationEvent) + Send + 'static,
    {
        let mut rx = self.tx.subscribe();
        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) if wants(&event) => callback(event),
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "notification listener lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        ListenerHandle {
            task: Mutex::new(Some(task)),
        }
    }
}

/// Registration returned by the `add_*_listener` calls
pub struct ListenerHandle {
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ListenerHandle {
    /// Stop delivering events to the listener. Safe to call more than once.
    pub fn remove(&self) {
        if let Some(task) = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.remove();
    }
}

// ============================================================================
// Dispatch
// ============================================================================

/// Fire-and-forget alert sender
#[derive(Clone)]
pub struct AlertDispatcher {
    notifier: Arc<dyn Notifier>,
    center: NotificationCenter,
}

impl AlertDispatcher {
    pub fn new(notifier: Arc<dyn Notifier>, center: NotificationCenter) -> Self {
        Self { notifier, center }
    }

    pub fn center(&self) -> &NotificationCenter {
        &self.center
    }

    pub async fn request_permission(&self) -> Option<String> {
        let token = self.notifier.request_permission().await;
        match &token {
            Some(_) => info!("notification permission granted"),
            None => debug!("no push token available"),
        }
        token
    }

    /// Send a vibration alert for `location` without waiting for the result
    pub fn dispatch(&self, location: &CurrentLocation) -> JoinHandle<()> {
        let alert = AlertMessage::vibration(location);
        let notifier = self.notifier.clone();
        let center = self.center.clone();

        tokio::spawn(async move {
            match notifier.send_alert(&alert).await {
                Ok(receipt) => {
                    info!(device_id = %alert.data.device_id, "vibration alert sent");
                    center.publish(NotificationEvent::Received {
                        alert_id: alert.id.to_string(),
                        device_id: alert.data.device_id,
                        receipt_id: receipt.id,
                        received_at: receipt.sent_at,
                    });
                }
                Err(e) => {
                    warn!(device_id = %alert.data.device_id, error = %e, "vibration alert failed");
                }
            }
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Notifier that remembers every alert instead of sending it
    #[derive(Default)]
    pub struct RecordingNotifier {
        sent: Mutex<Vec<AlertMessage>>,
        fail: AtomicBool,
    }

    impl RecordingNotifier {
        pub fn sent(&self) -> Vec<AlertMessage> {
            self.sent.lock().unwrap().clone()
        }

        pub fn fail(&self, fail: bool) {
            self.fail.store(fail, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn request_permission(&self) -> Option<String> {
            Some("ExponentPushToken[test]".to_string())
        }

        async fn send_alert(&self, alert: &AlertMessage) -> TrackerResult<Receipt> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(TrackerError::Notification("push service down".to_string()));
            }
            self.sent.lock().unwrap().push(alert.clone());
            Ok(Receipt {
                id: Some(format!("ticket-{}", alert.id)),
                sent_at: Utc::now(),
            })
        }
    }
}
