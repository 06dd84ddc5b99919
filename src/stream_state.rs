//! Connection state machine for the live subscription stream
//!
//! Replaces ad-hoc retry counters in the stream loop with a single enum
//! that makes the state explicit and testable.
//!
//! # State Transitions
//!
//! ```text
//!     ┌──────────────────────┐   Opened
//!     │      Connecting      │ ──────────────────┐
//!     └──────────────────────┘                   │
//!          ^          │ Failed                   v
//!          │          v               ┌──────────────────────┐
//!          │  ┌──────────────────────┐│         Live         │
//!          └──│     Reconnecting     │└──────────────────────┘
//!   backoff   └──────────────────────┘   │ Failed / Revoked
//!   elapsed            ^                 │
//!                      └─────────────────┘
//!
//!     any state ── Cancelled ──► Closed
//! ```

use std::time::Duration;

use crate::timeouts::{backoff_delay, connect_timeout, stream_idle_timeout};

/// What happened on the wire since the last transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamSignal {
    /// HTTP stream established
    Opened,
    /// Any server-sent event, including keep-alive
    Message,
    /// Transport error, idle timeout or end of body
    Failed,
    /// Server revoked the credential; reconnect with the same one
    Revoked,
    /// Server cancelled the listen (rules deny access); permanent
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamState {
    #[default]
    Connecting,
    Live,
    /// Waiting out the backoff before attempt `attempt`
    Reconnecting { attempt: u32 },
    Closed,
}

impl StreamState {
    /// How long a read may stay silent in this state
    pub fn timeout(&self) -> Duration {
        match self {
            StreamState::Connecting | StreamState::Reconnecting { .. } => connect_timeout(),
            StreamState::Live | StreamState::Closed => stream_idle_timeout(),
        }
    }

    /// Delay to wait before connecting again, if this state is a backoff
    pub fn backoff(&self) -> Option<Duration> {
        match self {
            StreamState::Reconnecting { attempt } => Some(backoff_delay(*attempt)),
            _ => None,
        }
    }

    pub fn transition(&self, signal: StreamSignal) -> Self {
        match (self, signal) {
            (StreamState::Closed, _) => StreamState::Closed,
            (_, StreamSignal::Cancelled) => StreamState::Closed,

            (_, StreamSignal::Opened) | (StreamState::Live, StreamSignal::Message) => {
                StreamState::Live
            }

            (StreamState::Reconnecting { attempt }, StreamSignal::Failed | StreamSignal::Revoked) => {
                StreamState::Reconnecting {
                    attempt: attempt.saturating_add(1),
                }
            }
            (_, StreamSignal::Failed | StreamSignal::Revoked) => {
                StreamState::Reconnecting { attempt: 1 }
            }

            // messages before Opened are not possible on a well-formed stream
            (state, StreamSignal::Message) => *state,
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, StreamState::Closed)
    }
}
