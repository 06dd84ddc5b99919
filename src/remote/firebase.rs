//! Firebase Realtime Database over its REST API
//!
//! - `GET {db}/{path}.json` for snapshot reads
//! - `PATCH` for partial merges, `DELETE` for subtree removal
//! - `GET` with `Accept: text/event-stream` for live listens; the stream
//!   carries `put`/`patch` deltas that are folded into a local mirror

use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::header::ACCEPT;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use super::mirror::{apply_patch, apply_put};
use super::sse::{FirebaseEvent, SseDecoder};
use super::{Listener, RemoteStore};
use crate::config::Config;
use crate::error::{TrackerError, TrackerResult};
use crate::stream_state::{StreamSignal, StreamState};
use crate::timeouts::{connect_timeout, SNAPSHOT_CHANNEL_CAPACITY};

#[derive(Clone)]
pub struct FirebaseStore {
    client: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
    request_timeout: Duration,
}

impl FirebaseStore {
    pub fn new(
        base_url: &str,
        auth_token: Option<String>,
        request_timeout: Duration,
    ) -> TrackerResult<Self> {
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        if !(base_url.starts_with("https://") || base_url.starts_with("http://")) {
            return Err(TrackerError::Config(format!(
                "database_url must be an http(s) URL, got '{}'",
                base_url
            )));
        }

        // No client-wide timeout: it would also cut live streams
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout())
            .build()?;

        Ok(Self {
            client,
            base_url,
            auth_token: auth_token.filter(|t| !t.is_empty()),
            request_timeout,
        })
    }

    pub fn from_config(config: &Config) -> TrackerResult<Self> {
        Self::new(
            config.require_database_url()?,
            config.auth_token.clone(),
            config.request_timeout(),
        )
    }

    /// REST location of `path`
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}.json", self.base_url, path.trim_matches('/'))
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, self.url(path));
        match &self.auth_token {
            Some(token) => builder.query(&[("auth", token)]),
            None => builder,
        }
    }
}

fn ensure_success(
    response: reqwest::Response,
    operation: &'static str,
    path: &str,
) -> TrackerResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(TrackerError::RemoteRejected {
            operation,
            path: path.to_string(),
            status: status.as_u16(),
        })
    }
}

#[async_trait]
impl RemoteStore for FirebaseStore {
    async fn get(&self, path: &str) -> TrackerResult<Value> {
        let response = self
            .request(reqwest::Method::GET, path)
            .timeout(self.request_timeout)
            .send()
            .await?;
        let value = ensure_success(response, "read", path)?.json::<Value>().await?;
        Ok(value)
    }

    async fn update(&self, path: &str, fields: Map<String, Value>) -> TrackerResult<()> {
        let response = self
            .request(reqwest::Method::PATCH, path)
            .timeout(self.request_timeout)
            .json(&fields)
            .send()
            .await?;
        ensure_success(response, "update", path)?;
        Ok(())
    }

    async fn remove(&self, path: &str) -> TrackerResult<()> {
        let response = self
            .request(reqwest::Method::DELETE, path)
            .timeout(self.request_timeout)
            .send()
            .await?;
        ensure_success(response, "delete", path)?;
        Ok(())
    }

    fn listen(&self, path: &str) -> Listener {
        let (tx, rx) = mpsc::channel(SNAPSHOT_CHANNEL_CAPACITY);
        let store = self.clone();
        let path = path.to_string();

        let task = tokio::spawn(async move {
            run_stream(store, path, tx).await;
        });

        Listener::new(rx, task)
    }
}

/// Keep a listen stream open until the receiver goes away or the server
/// cancels it, reconnecting with backoff in between.
async fn run_stream(store: FirebaseStore, path: String, tx: mpsc::Sender<Value>) {
    let mut state = StreamState::default();
    let mut mirror = Value::Null;

    loop {
        if let Some(delay) = state.backoff() {
            warn!(path = %path, delay_ms = delay.as_millis() as u64, "live stream reconnecting");
            tokio::time::sleep(delay).await;
        }

        let signal = match open_stream(&store, &path, state.timeout()).await {
            Ok(response) => {
                state = state.transition(StreamSignal::Opened);
                info!(path = %path, "live stream opened");
                pump_events(response.bytes_stream(), &mut state, &mut mirror, &tx).await
            }
            Err(e) => {
                warn!(path = %path, error = %e, "failed to open live stream");
                StreamSignal::Failed
            }
        };

        if tx.is_closed() {
            debug!(path = %path, "listener dropped, stopping live stream");
            return;
        }

        state = state.transition(signal);
        if state.is_closed() {
            error!(path = %path, "live stream cancelled by the server");
            return;
        }
    }
}

async fn open_stream(
    store: &FirebaseStore,
    path: &str,
    within: Duration,
) -> TrackerResult<reqwest::Response> {
    let request = store
        .request(reqwest::Method::GET, path)
        .header(ACCEPT, "text/event-stream")
        .send();

    let response = tokio::time::timeout(within, request)
        .await
        .map_err(|_| TrackerError::RemoteUnavailable("timed out opening live stream".to_string()))??;

    ensure_success(response, "listen", path)
}

/// Fold stream events into the mirror until the stream ends; returns why it ended
async fn pump_events<S, B, E>(
    body: S,
    state: &mut StreamState,
    mirror: &mut Value,
    tx: &mpsc::Sender<Value>,
) -> StreamSignal
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let mut body = Box::pin(body);
    let mut decoder = SseDecoder::default();

    loop {
        let chunk = match tokio::time::timeout(state.timeout(), body.next()).await {
            Err(_) => {
                warn!("live stream idle for too long");
                return StreamSignal::Failed;
            }
            Ok(None) => {
                debug!("live stream ended by server");
                return StreamSignal::Failed;
            }
            Ok(Some(Err(e))) => {
                warn!(error = %e, "live stream read error");
                return StreamSignal::Failed;
            }
            Ok(Some(Ok(chunk))) => chunk,
        };

        for frame in decoder.push(chunk.as_ref()) {
            *state = state.transition(StreamSignal::Message);

            let changed = match FirebaseEvent::parse(&frame) {
                Ok(Some(FirebaseEvent::Put { path, data })) => {
                    apply_put(mirror, &path, data);
                    true
                }
                Ok(Some(FirebaseEvent::Patch { path, data })) => {
                    apply_patch(mirror, &path, data);
                    true
                }
                Ok(Some(FirebaseEvent::KeepAlive)) => {
                    trace!("keep-alive");
                    false
                }
                Ok(Some(FirebaseEvent::Cancel(reason))) => {
                    error!(reason = %reason, "listen cancelled");
                    return StreamSignal::Cancelled;
                }
                Ok(Some(FirebaseEvent::AuthRevoked)) => {
                    warn!("auth credential revoked");
                    return StreamSignal::Revoked;
                }
                Ok(None) => {
                    debug!(event = %frame.event, "ignoring stream event");
                    false
                }
                Err(e) => {
                    warn!(event = %frame.event, error = %e, "malformed stream event");
                    false
                }
            };

            if changed && tx.send(mirror.clone()).await.is_err() {
                return StreamSignal::Failed;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store(url: &str) -> FirebaseStore {
        FirebaseStore::new(url, None, Duration::from_secs(1)).unwrap()
    }

    #[test]
    fn test_url_joins_path_with_json_suffix() {
        let store = store("https://iot-gps.example.app/");
        assert_eq!(
            store.url("/motorcycle/data/"),
            "https://iot-gps.example.app/motorcycle/data.json"
        );
        assert_eq!(
            store.url("motorcycle/data/A"),
            "https://iot-gps.example.app/motorcycle/data/A.json"
        );
    }

    #[test]
    fn test_auth_token_goes_in_query() {
        let store = FirebaseStore::new(
            "https://iot-gps.example.app",
            Some("secret".to_string()),
            Duration::from_secs(1),
        )
        .unwrap();

        let request = store
            .request(reqwest::Method::GET, "motorcycle/data")
            .build()
            .unwrap();
        assert_eq!(
            request.url().as_str(),
            "https://iot-gps.example.app/motorcycle/data.json?auth=secret"
        );
    }

    #[test]
    fn test_empty_auth_token_is_dropped() {
        let store = FirebaseStore::new(
            "https://iot-gps.example.app",
            Some(String::new()),
            Duration::from_secs(1),
        )
        .unwrap();

        let request = store.request(reqwest::Method::DELETE, "a").build().unwrap();
        assert_eq!(request.url().query(), None);
    }

    #[test]
    fn test_rejects_non_http_url() {
        let result = FirebaseStore::new("iot-gps.example.app", None, Duration::from_secs(1));
        assert!(matches!(result, Err(TrackerError::Config(_))));
    }

    #[test]
    fn test_from_config_requires_url() {
        let result = FirebaseStore::from_config(&Config::default());
        assert!(matches!(result, Err(TrackerError::Config(_))));
    }

    // ==================== Event pump tests ====================

    struct Pumped {
        signal: StreamSignal,
        snapshots: Vec<Value>,
        mirror: Value,
    }

    async fn pump(chunks: Vec<Result<&'static str, &'static str>>) -> Pumped {
        let (tx, mut rx) = mpsc::channel(16);
        let mut state = StreamState::Live;
        let mut mirror = Value::Null;
        let body = futures::stream::iter(chunks.into_iter().map(|c| c.map(str::as_bytes)));

        let signal = pump_events(body, &mut state, &mut mirror, &tx).await;
        drop(tx);

        let mut snapshots = Vec::new();
        while let Some(snapshot) = rx.recv().await {
            snapshots.push(snapshot);
        }
        Pumped {
            signal,
            snapshots,
            mirror,
        }
    }

    #[tokio::test]
    async fn test_put_then_patch_yields_snapshots_in_order() {
        let pumped = pump(vec![
            Ok("event: put\ndata: {\"path\":\"/\",\"data\":{\"A\":{\"latitude\":\"1.5\"},\"B\":{\"latitude\":3}}}\n\n"),
            Ok("event: patch\ndata: {\"path\":\"/A\","),
            Ok("\"data\":{\"vibration\":\"Ada Getaran\"}}\n\n"),
        ])
        .await;

        assert_eq!(
            pumped.snapshots,
            vec![
                json!({"A": {"latitude": "1.5"}, "B": {"latitude": 3}}),
                json!({"A": {"latitude": "1.5", "vibration": "Ada Getaran"}, "B": {"latitude": 3}}),
            ]
        );
        let keys: Vec<&String> = pumped.snapshots[1].as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["A", "B"]);
        // body ended without cancel
        assert_eq!(pumped.signal, StreamSignal::Failed);
    }

    #[tokio::test]
    async fn test_keep_alive_sends_nothing_and_cancel_is_permanent() {
        let pumped = pump(vec![
            Ok("event: keep-alive\ndata: null\n\n"),
            Ok("event: cancel\ndata: permission denied\n\n"),
            Ok("event: put\ndata: {\"path\":\"/\",\"data\":{\"A\":{}}}\n\n"),
        ])
        .await;

        assert!(pumped.snapshots.is_empty());
        assert_eq!(pumped.signal, StreamSignal::Cancelled);
        assert_eq!(pumped.mirror, Value::Null);
    }

    #[tokio::test]
    async fn test_auth_revoked_asks_for_reconnect() {
        let pumped = pump(vec![Ok("event: auth_revoked\ndata: credential expired\n\n")]).await;
        assert_eq!(pumped.signal, StreamSignal::Revoked);
    }

    #[tokio::test]
    async fn test_read_error_fails_after_applied_events() {
        let pumped = pump(vec![
            Ok("event: put\ndata: {\"path\":\"/A\",\"data\":{\"signal\":2}}\n\n"),
            Err("connection reset"),
            Ok("event: put\ndata: {\"path\":\"/B\",\"data\":{\"signal\":3}}\n\n"),
        ])
        .await;

        assert_eq!(pumped.snapshots, vec![json!({"A": {"signal": 2}})]);
        assert_eq!(pumped.signal, StreamSignal::Failed);
    }

    #[tokio::test]
    async fn test_malformed_event_is_skipped() {
        let pumped = pump(vec![
            Ok("event: put\ndata: not json\n\n"),
            Ok("event: put\ndata: {\"path\":\"/\",\"data\":{\"A\":{\"signal\":1}}}\n\n"),
        ])
        .await;

        assert_eq!(pumped.snapshots, vec![json!({"A": {"signal": 1}})]);
    }

    #[tokio::test]
    async fn test_deleting_last_field_drops_device_from_snapshot() {
        let pumped = pump(vec![
            Ok("event: put\ndata: {\"path\":\"/\",\"data\":{\"A\":{\"latitude\":1},\"B\":{\"latitude\":2}}}\n\n"),
            Ok("event: put\ndata: {\"path\":\"/A/latitude\",\"data\":null}\n\n"),
        ])
        .await;

        assert_eq!(pumped.snapshots[1], json!({"B": {"latitude": 2}}));
    }

    // ==================== Live stream tests ====================

    /// Serve one canned SSE body per connection, then close it
    async fn serve_streams(bodies: Vec<&'static str>) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            for body in bodies {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    let n = socket.read(&mut buf).await.unwrap();
                    if n == 0 {
                        break;
                    }
                    request.extend_from_slice(&buf[..n]);
                }
                let head = "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nConnection: close\r\n\r\n";
                socket.write_all(head.as_bytes()).await.unwrap();
                socket.write_all(body.as_bytes()).await.unwrap();
                socket.shutdown().await.unwrap();
            }
        });

        format!("http://{}", addr)
    }

    async fn next_snapshot(listener: &mut Listener) -> Option<Value> {
        tokio::time::timeout(Duration::from_secs(5), listener.recv())
            .await
            .expect("no snapshot in time")
    }

    #[tokio::test]
    async fn test_listen_stops_for_good_on_cancel() {
        let url = serve_streams(vec![
            "event: put\ndata: {\"path\":\"/\",\"data\":{\"A\":{\"signal\":1}}}\n\nevent: cancel\ndata: permission denied\n\n",
        ])
        .await;
        let store = store(&url);

        let mut listener = store.listen("motorcycle/data");

        assert_eq!(next_snapshot(&mut listener).await, Some(json!({"A": {"signal": 1}})));
        assert_eq!(next_snapshot(&mut listener).await, None);
    }

    #[tokio::test]
    async fn test_listen_reconnects_after_end_of_body() {
        let url = serve_streams(vec![
            "event: put\ndata: {\"path\":\"/\",\"data\":{\"A\":{\"signal\":1}}}\n\n",
            "event: put\ndata: {\"path\":\"/\",\"data\":{\"A\":{\"signal\":2}}}\n\nevent: cancel\ndata: done\n\n",
        ])
        .await;
        let store = store(&url);

        let mut listener = store.listen("motorcycle/data");

        assert_eq!(next_snapshot(&mut listener).await, Some(json!({"A": {"signal": 1}})));
        assert_eq!(next_snapshot(&mut listener).await, Some(json!({"A": {"signal": 2}})));
        assert_eq!(next_snapshot(&mut listener).await, None);
    }
}
