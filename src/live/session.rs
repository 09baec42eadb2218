//! # Live Session Lifecycle
//!
//! Tracks the state of one conversation with the speech service together with
//! its timestamps and counters. A new [`SessionLifecycle`] (with a fresh
//! UUID) is created for every start request; events tagged with another
//! session id are stale and get dropped by the orchestrator.
//!
//! ## Session Lifecycle:
//! 1. **Idle**: nothing running
//! 2. **Connecting**: transport opened, waiting for `setupComplete`
//! 3. **Open**: capture wired, audio flowing both ways
//! 4. **Closed**: stream closed, errored or stopped. Terminal.
//!
//! Any state may move to Closed; Closed never moves anywhere.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Current state of a live session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Connecting,
    Open,
    Closed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Open => "open",
            SessionState::Closed => "closed",
        }
    }

    /// True while a session holds the transport.
    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Connecting | SessionState::Open)
    }
}

/// Counters collected over the life of one session.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionStats {
    /// Capture frames handed to the transport
    pub frames_sent: u64,
    /// Inline audio parts scheduled for playback
    pub audio_chunks: u64,
    /// Decoded PCM bytes received
    pub audio_bytes: u64,
    /// Inline audio parts dropped because of malformed base64
    pub decode_errors: u64,
    /// Interruptions signalled by the service
    pub interruptions: u64,
    pub turns_completed: u64,
}

/// Serializable view of a session for the local API.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    pub opened_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub close_reason: Option<String>,
    pub duration_seconds: f64,
    pub stats: SessionStats,
}

/// One conversation with the speech service.
#[derive(Debug)]
pub struct SessionLifecycle {
    session_id: Uuid,
    state: SessionState,
    created_at: DateTime<Utc>,
    opened_at: Option<DateTime<Utc>>,
    closed_at: Option<DateTime<Utc>>,
    close_reason: Option<String>,
    pub stats: SessionStats,
}

impl SessionLifecycle {
    pub fn new() -> Self {
        Self {
            session_id: Uuid::new_v4(),
            state: SessionState::Idle,
            created_at: Utc::now(),
            opened_at: None,
            closed_at: None,
            close_reason: None,
            stats: SessionStats::default(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.session_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Idle → Connecting
    pub fn begin_connect(&mut self) -> Result<(), String> {
        match self.state {
            SessionState::Idle => {
                self.state = SessionState::Connecting;
                Ok(())
            }
            other => Err(format!("Cannot connect from status: {}", other.as_str())),
        }
    }

    /// Connecting → Open
    pub fn open(&mut self) -> Result<(), String> {
        match self.state {
            SessionState::Connecting => {
                self.state = SessionState::Open;
                self.opened_at = Some(Utc::now());
                Ok(())
            }
            other => Err(format!("Cannot open from status: {}", other.as_str())),
        }
    }

    /// Any → Closed. Returns false if the session was already closed, in
    /// which case the first reason is kept.
    pub fn close(&mut self, reason: impl Into<String>) -> bool {
        if self.state == SessionState::Closed {
            return false;
        }
        self.state = SessionState::Closed;
        self.closed_at = Some(Utc::now());
        self.close_reason = Some(reason.into());
        true
    }

    /// Seconds since creation, or until close.
    pub fn duration_seconds(&self) -> f64 {
        let end = self.closed_at.unwrap_or_else(Utc::now);
        end.signed_duration_since(self.created_at).num_milliseconds() as f64 / 1000.0
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            session_id: self.session_id,
            state: self.state,
            created_at: self.created_at,
            opened_at: self.opened_at,
            closed_at: self.closed_at,
            close_reason: self.close_reason.clone(),
            duration_seconds: self.duration_seconds(),
            stats: self.stats.clone(),
        }
    }
}

impl Default for SessionLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let mut session = SessionLifecycle::new();
        assert_eq!(session.state(), SessionState::Idle);

        session.begin_connect().unwrap();
        assert_eq!(session.state(), SessionState::Connecting);
        assert!(session.state().is_active());

        session.open().unwrap();
        assert_eq!(session.state(), SessionState::Open);
        assert!(session.summary().opened_at.is_some());

        assert!(session.close("stream closed"));
        assert_eq!(session.state(), SessionState::Closed);
        assert!(!session.state().is_active());
    }

    #[test]
    fn test_illegal_transitions_are_rejected() {
        let mut session = SessionLifecycle::new();
        assert!(session.open().is_err());

        session.begin_connect().unwrap();
        assert!(session.begin_connect().is_err());

        session.close("error");
        assert!(session.open().is_err());
        assert!(session.begin_connect().is_err());
    }

    #[test]
    fn test_close_is_idempotent_and_keeps_first_reason() {
        let mut session = SessionLifecycle::new();
        session.begin_connect().unwrap();

        assert!(session.close("transport error"));
        assert!(!session.close("stop requested"));
        assert_eq!(session.summary().close_reason.as_deref(), Some("transport error"));
    }

    #[test]
    fn test_each_session_gets_a_new_id() {
        assert_ne!(SessionLifecycle::new().id(), SessionLifecycle::new().id());
    }

    #[test]
    fn test_state_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&SessionState::Connecting).unwrap(), "\"connecting\"");
        assert_eq!(SessionState::Open.as_str(), "open");
    }
}
