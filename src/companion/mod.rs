//! # Companion
//!
//! The avatar's brain: one [`orchestrator::Orchestrator`] task owns the live
//! session, the playback scheduler, the transcript log, the current emotion
//! and the memory string. Everything else talks to it through a
//! [`CompanionHandle`]:
//!
//! - requests go in as [`orchestrator::CompanionEvent`]s on one channel
//! - state comes out as a [`CompanionSnapshot`] on a `watch` channel
//! - the microphone gain is a separate `watch` value read once per frame
//! - capture sources are opened on the blocking pool before the start
//!   request reaches the orchestrator
//!
//! ```text
//!  HTTP / ws ──► CompanionHandle ──events──► Orchestrator ──► scheduler ──► output
//!       ▲                                        │  ▲
//!       └────────────── snapshot ◄───────────────┘  └── transport / capture / output callbacks
//! ```

pub mod emotion;
pub mod instruction;
pub mod memory;
pub mod orchestrator;
pub mod transcript;

use crate::audio::output::CompletionCallback;
use crate::audio::BoxedOutput;
use crate::error::{AppError, AppResult};
use crate::live::session::SessionSummary;
use chrono::{DateTime, Utc};
use emotion::Emotion;
use orchestrator::{CompanionEvent, CompanionParts, OpenedCapture, Orchestrator, SourceFactory, StartRequest};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use transcript::TranscriptEntry;
use uuid::Uuid;

/// User-facing message shown when the capture device cannot be opened.
pub const MICROPHONE_ERROR_MESSAGE: &str = "No pude despertar... ¿Me das permiso para usar el micrófono?";

/// What the renderer needs to animate the avatar.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AvatarState {
    pub emotion: Emotion,
    pub is_speaking: bool,
    pub is_connected: bool,
    /// Always 100; kept for renderers that display it
    pub confidence: u8,
}

impl Default for AvatarState {
    fn default() -> Self {
        Self {
            emotion: Emotion::Neutral,
            is_speaking: false,
            is_connected: false,
            confidence: 100,
        }
    }
}

/// Everything observable about the companion at one point in time.
#[derive(Debug, Clone, Serialize)]
pub struct CompanionSnapshot {
    pub avatar: AvatarState,
    pub session: Option<SessionSummary>,
    pub transcripts: Vec<TranscriptEntry>,
    pub memory: Option<String>,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Default for CompanionSnapshot {
    fn default() -> Self {
        Self {
            avatar: AvatarState::default(),
            session: None,
            transcripts: Vec::new(),
            memory: None,
            last_error: None,
            updated_at: Utc::now(),
        }
    }
}

/// Cloneable front door to the orchestrator task.
#[derive(Clone)]
pub struct CompanionHandle {
    events: mpsc::UnboundedSender<CompanionEvent>,
    snapshot: watch::Receiver<CompanionSnapshot>,
    sensitivity: Arc<watch::Sender<f32>>,
    sources: SourceFactory,
}

impl CompanionHandle {
    fn send(&self, event: CompanionEvent) -> AppResult<()> {
        self.events
            .send(event)
            .map_err(|_| AppError::Internal("companion task is not running".to_string()))
    }

    /// Start a session. Resolves once the transport is connecting (not open).
    pub async fn start(&self, request: StartRequest) -> AppResult<Uuid> {
        let running = self
            .snapshot
            .borrow()
            .session
            .as_ref()
            .map(|s| s.state)
            .filter(|state| state.is_active());
        if let Some(state) = running {
            return Err(AppError::Conflict(format!("session already {}", state.as_str())));
        }

        let sources = Arc::clone(&self.sources);
        let audio = request.audio.clone();
        let capture = tokio::task::spawn_blocking(move || OpenedCapture::open(&sources, &audio))
            .await
            .map_err(|e| AppError::Internal(format!("capture open task failed: {}", e)))?;

        let (reply, response) = oneshot::channel();
        self.send(CompanionEvent::Start {
            request,
            capture,
            reply: Some(reply),
        })?;
        response
            .await
            .map_err(|_| AppError::Internal("companion task dropped the request".to_string()))?
    }

    /// Stop the running session. Returns false when nothing was running.
    pub async fn stop(&self) -> AppResult<bool> {
        let (reply, response) = oneshot::channel();
        self.send(CompanionEvent::Stop { reply: Some(reply) })?;
        response
            .await
            .map_err(|_| AppError::Internal("companion task dropped the request".to_string()))
    }

    pub fn snapshot(&self) -> CompanionSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<CompanionSnapshot> {
        self.snapshot.clone()
    }

    /// New microphone gain, picked up from the next capture frame.
    pub fn set_sensitivity(&self, gain: f32) {
        self.sensitivity.send_replace(gain);
    }

    pub fn sensitivity(&self) -> f32 {
        *self.sensitivity.borrow()
    }

    pub fn shutdown(&self) {
        let _ = self.events.send(CompanionEvent::Shutdown);
    }
}

/// Build the orchestrator and run it on the current tokio runtime.
///
/// `sources` opens the capture input for each session. `make_output` receives
/// the callback the output must invoke when a source finishes on its own.
pub fn spawn_companion<F>(
    parts: CompanionParts,
    sources: SourceFactory,
    initial_sensitivity: f32,
    make_output: F,
) -> AppResult<(CompanionHandle, JoinHandle<()>)>
where
    F: FnOnce(CompletionCallback) -> AppResult<BoxedOutput>,
{
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (sensitivity_tx, sensitivity_rx) = watch::channel(initial_sensitivity);

    let completions = events_tx.clone();
    let on_complete: CompletionCallback = Arc::new(move |id| {
        let _ = completions.send(CompanionEvent::PlaybackFinished(id));
    });
    let output = make_output(on_complete)?;

    let (orchestrator, snapshot) = Orchestrator::new(parts, output, events_tx.clone(), sensitivity_rx);
    let task = tokio::spawn(orchestrator.run(events_rx));

    let handle = CompanionHandle {
        events: events_tx,
        snapshot,
        sensitivity: Arc::new(sensitivity_tx),
        sources,
    };
    Ok((handle, task))
}
