//! Server-sent events framing for the realtime database streaming endpoint.
//!
//! Frames are `event:`/`data:` line groups terminated by a blank line.
//! Chunks from the HTTP body can split a line (or a UTF-8 sequence)
//! anywhere, so bytes are buffered until a full line is available.

use serde::Deserialize;
use serde_json::Value;

use crate::error::TrackerResult;

/// One dispatched server-sent event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: String,
    pub data: String,
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    /// Feed a body chunk, returning every frame it completed
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();

        while let Some(newline) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);

            if let Some(frame) = self.process_line(line) {
                frames.push(frame);
            }
        }

        frames
    }

    fn process_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            // id / retry are not used by the database stream
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        let event = self.event.take();
        if event.is_none() && self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseFrame {
            event: event.unwrap_or_else(|| "message".to_string()),
            data,
        })
    }
}

/// Events the realtime database sends on a listen stream
#[derive(Debug, Clone, PartialEq)]
pub enum FirebaseEvent {
    Put { path: String, data: Value },
    Patch { path: String, data: Value },
    KeepAlive,
    /// Security rules no longer allow reading the location
    Cancel(String),
    /// The auth credential expired or was revoked
    AuthRevoked,
}

#[derive(Deserialize)]
struct DeltaPayload {
    path: String,
    #[serde(default)]
    data: Value,
}

impl FirebaseEvent {
    /// Parse a frame; unknown event names give `Ok(None)`
    pub fn parse(frame: &SseFrame) -> TrackerResult<Option<Self>> {
        let event = match frame.event.as_str() {
            "put" => {
                let payload: DeltaPayload = serde_json::from_str(&frame.data)?;
                FirebaseEvent::Put {
                    path: payload.path,
                    data: payload.data,
                }
            }
            "patch" => {
                let payload: DeltaPayload = serde_json::from_str(&frame.data)?;
                FirebaseEvent::Patch {
                    path: payload.path,
                    data: payload.data,
                }
            }
            "keep-alive" => FirebaseEvent::KeepAlive,
            "cancel" => FirebaseEvent::Cancel(frame.data.clone()),
            "auth_revoked" => FirebaseEvent::AuthRevoked,
            _ => return Ok(None),
        };
        Ok(Some(event))
    }
}
