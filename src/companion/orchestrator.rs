//! # Session Orchestrator
//!
//! Single-owner state machine driving one live session at a time.
//!
//! ## Events handled (all on one channel):
//! - **Start / Stop**: requests from the local API. A start carries a
//!   capture source that was already opened off the runtime threads
//! - **Live**: transport events tagged with the session they belong to;
//!   events from any session other than the current one are dropped
//! - **FrameSent**: capture progress, only counted
//! - **PlaybackFinished**: natural end of a scheduled source
//!
//! ## Per server message (in this order):
//! 1. inline audio parts → decode → schedule (a malformed part drops the
//!    whole message)
//! 2. input transcription → user transcript entry
//! 3. output transcription → avatar entry, emotion, memory update
//! 4. interrupted flag → hard cut of playback
//!
//! A snapshot is published to the `watch` channel after every event that
//! changed something observable.

use crate::audio::capture::CapturePipeline;
use crate::audio::codec::{self, AudioFrame, DecodedBuffer};
use crate::audio::output::SourceId;
use crate::audio::scheduler::{PlaybackScheduler, SpeechSignal};
use crate::audio::source::FrameSource;
use crate::audio::BoxedOutput;
use crate::companion::emotion::{self, Emotion};
use crate::companion::instruction::session_instruction;
use crate::companion::memory::{derive_memory, MemoryStore};
use crate::companion::transcript::{Speaker, TranscriptLog};
use crate::companion::{AvatarState, CompanionSnapshot, MICROPHONE_ERROR_MESSAGE};
use crate::config::{AudioConfig, LiveConfig};
use crate::error::{AppError, AppResult};
use crate::live::protocol::{ServerContent, SetupPayload};
use crate::live::session::{SessionLifecycle, SessionState};
use crate::live::transport::{Connector, LiveEvent, LiveEventSink, LiveLink};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Opens the capture source for a session.
pub type SourceFactory = Arc<dyn Fn(&AudioConfig) -> AppResult<Box<dyn FrameSource>> + Send + Sync>;

/// A capture source that is already producing frames.
pub struct OpenedCapture {
    source: Box<dyn FrameSource>,
    frames: mpsc::Receiver<AudioFrame>,
}

impl OpenedCapture {
    /// Create and open the source named by `audio`.
    ///
    /// Blocks: devices report readiness synchronously and WAV files are read
    /// whole. Call it from `spawn_blocking`.
    pub fn open(sources: &SourceFactory, audio: &AudioConfig) -> AppResult<Self> {
        let mut source = sources(audio)?;
        let frames = source.open(audio.frame_size, audio.capture_sample_rate)?;
        Ok(Self { source, frames })
    }

    fn close(mut self) {
        self.source.close();
    }
}

/// Everything needed to start a session, captured from the configuration at
/// request time.
#[derive(Debug, Clone)]
pub struct StartRequest {
    /// Endpoint including credentials
    pub url: String,
    pub live: LiveConfig,
    pub audio: AudioConfig,
}

pub enum CompanionEvent {
    Start {
        request: StartRequest,
        capture: AppResult<OpenedCapture>,
        reply: Option<oneshot::Sender<AppResult<Uuid>>>,
    },
    Stop {
        reply: Option<oneshot::Sender<bool>>,
    },
    Live {
        session: Uuid,
        event: LiveEvent,
    },
    FrameSent {
        session: Uuid,
        count: u64,
    },
    PlaybackFinished(SourceId),
    Shutdown,
}

/// Collaborators the orchestrator is built from.
pub struct CompanionParts {
    pub connector: Box<dyn Connector>,
    pub store: Box<dyn MemoryStore>,
    pub transcript_capacity: usize,
}

/// Resources held by the current (or last) session.
struct ActiveSession {
    lifecycle: SessionLifecycle,
    link: Option<LiveLink>,
    source: Box<dyn FrameSource>,
    /// Handed to the capture pipeline once the service acknowledged setup
    frames: Option<mpsc::Receiver<AudioFrame>>,
    capture: Option<JoinHandle<()>>,
    playback_sample_rate: u32,
}

impl ActiveSession {
    /// Release transport and capture. The lifecycle record stays.
    fn release(&mut self) {
        if let Some(capture) = self.capture.take() {
            capture.abort();
        }
        self.frames = None;
        self.source.close();
        if let Some(link) = self.link.take() {
            link.shutdown();
        }
    }
}

pub struct Orchestrator {
    connector: Box<dyn Connector>,
    store: Box<dyn MemoryStore>,
    scheduler: PlaybackScheduler<BoxedOutput>,
    transcripts: TranscriptLog,
    emotion: Emotion,
    memory: Option<String>,
    session: Option<ActiveSession>,
    last_error: Option<String>,
    events: mpsc::UnboundedSender<CompanionEvent>,
    sensitivity: watch::Receiver<f32>,
    snapshot: watch::Sender<CompanionSnapshot>,
}

impl Orchestrator {
    /// Build the orchestrator and load the persisted memory.
    ///
    /// `events` must feed the receiver later passed to [`Orchestrator::run`];
    /// transport and capture tasks post into it.
    pub fn new(
        parts: CompanionParts,
        output: BoxedOutput,
        events: mpsc::UnboundedSender<CompanionEvent>,
        sensitivity: watch::Receiver<f32>,
    ) -> (Self, watch::Receiver<CompanionSnapshot>) {
        let memory = match parts.store.load() {
            Ok(memory) => memory,
            Err(e) => {
                warn!(error = %e, "Could not load memory, starting fresh");
                None
            }
        };

        let (snapshot, snapshot_rx) = watch::channel(CompanionSnapshot::default());
        let orchestrator = Self {
            connector: parts.connector,
            store: parts.store,
            scheduler: PlaybackScheduler::new(output),
            transcripts: TranscriptLog::new(parts.transcript_capacity),
            emotion: Emotion::Neutral,
            memory,
            session: None,
            last_error: None,
            events,
            sensitivity,
            snapshot,
        };
        orchestrator.publish();
        (orchestrator, snapshot_rx)
    }

    /// Consume events until shutdown.
    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<CompanionEvent>) {
        info!("Companion orchestrator running");
        while let Some(event) = events.recv().await {
            if matches!(event, CompanionEvent::Shutdown) {
                break;
            }
            if self.handle_event(event) {
                self.publish();
            }
        }

        self.close_session("shutdown");
        self.scheduler.interrupt();
        info!("Companion orchestrator stopped");
    }

    /// Apply one event. Returns true when observable state may have changed.
    pub fn handle_event(&mut self, event: CompanionEvent) -> bool {
        match event {
            CompanionEvent::Start {
                request,
                capture,
                reply,
            } => {
                let result = self.start_session(request, capture);
                // publish before replying so callers see the new state
                self.publish();
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
                false
            }
            CompanionEvent::Stop { reply } => {
                let stopped = self.stop_session();
                self.publish();
                if let Some(reply) = reply {
                    let _ = reply.send(stopped);
                }
                false
            }
            CompanionEvent::Live { session, event } => self.on_live_event(session, event),
            CompanionEvent::FrameSent { session, count } => {
                if let Some(active) = self.current_session_mut(session) {
                    active.lifecycle.stats.frames_sent = count;
                }
                false
            }
            CompanionEvent::PlaybackFinished(id) => {
                self.scheduler.on_source_ended(id) == Some(SpeechSignal::Ended)
            }
            CompanionEvent::Shutdown => false,
        }
    }

    fn current_session_mut(&mut self, id: Uuid) -> Option<&mut ActiveSession> {
        self.session.as_mut().filter(|s| s.lifecycle.id() == id)
    }

    fn session_state(&self) -> SessionState {
        self.session
            .as_ref()
            .map(|s| s.lifecycle.state())
            .unwrap_or(SessionState::Idle)
    }

    /// Idle/Closed → Connecting.
    fn start_session(&mut self, request: StartRequest, capture: AppResult<OpenedCapture>) -> AppResult<Uuid> {
        if self.session_state().is_active() {
            if let Ok(capture) = capture {
                capture.close();
            }
            return Err(AppError::Conflict(format!(
                "session already {}",
                self.session_state().as_str()
            )));
        }

        let OpenedCapture { source, frames } = match capture {
            Ok(capture) => capture,
            Err(e) => {
                error!(error = %e, "Could not open capture source");
                self.last_error = Some(MICROPHONE_ERROR_MESSAGE.to_string());
                return Err(e);
            }
        };

        let mut lifecycle = SessionLifecycle::new();
        lifecycle.begin_connect().map_err(AppError::Session)?;
        let session_id = lifecycle.id();

        let setup = SetupPayload::new(&request.live, session_instruction(self.memory.as_deref()));
        let events = self.events.clone();
        let sink: LiveEventSink = Arc::new(move |event| {
            let _ = events.send(CompanionEvent::Live {
                session: session_id,
                event,
            });
        });
        let link = self.connector.connect(&request.url, setup, sink);

        info!(session = %session_id, model = %request.live.model, "Session connecting");
        self.last_error = None;
        self.session = Some(ActiveSession {
            lifecycle,
            link: Some(link),
            source,
            frames: Some(frames),
            capture: None,
            playback_sample_rate: request.audio.playback_sample_rate,
        });
        Ok(session_id)
    }

    /// Explicit stop: close the session and cut playback.
    fn stop_session(&mut self) -> bool {
        if !self.session_state().is_active() {
            return false;
        }
        self.close_session("stop requested");
        self.scheduler.interrupt();
        true
    }

    fn close_session(&mut self, reason: &str) {
        if let Some(active) = self.session.as_mut() {
            active.release();
            if active.lifecycle.close(reason) {
                info!(
                    session = %active.lifecycle.id(),
                    reason,
                    stats = ?active.lifecycle.stats,
                    "Session closed"
                );
            }
        }
    }

    fn on_live_event(&mut self, session: Uuid, event: LiveEvent) -> bool {
        let Some(active) = self.current_session_mut(session) else {
            debug!(session = %session, "Dropping event from stale session");
            return false;
        };
        if active.lifecycle.state() == SessionState::Closed {
            return false;
        }

        match event {
            LiveEvent::Opened => {
                if let Err(e) = active.lifecycle.open() {
                    warn!(error = %e, "Ignoring duplicate setup acknowledgement");
                    return false;
                }
                info!(session = %session, "Session open");
                self.wire_capture(session);
                true
            }
            LiveEvent::Content(content) => {
                if active.lifecycle.state() != SessionState::Open {
                    debug!("Server content before setup acknowledgement, ignoring");
                    return false;
                }
                self.handle_content(content);
                true
            }
            LiveEvent::Error(message) => {
                error!(session = %session, error = %message, "Live session error");
                self.close_session(&format!("error: {}", message));
                true
            }
            LiveEvent::Closed(reason) => {
                let reason = reason.unwrap_or_else(|| "stream closed".to_string());
                self.close_session(&reason);
                true
            }
        }
    }

    /// Start pumping captured frames into the transport.
    fn wire_capture(&mut self, session: Uuid) {
        let sensitivity = self.sensitivity.clone();
        let events = self.events.clone();
        let Some(active) = self.current_session_mut(session) else {
            return;
        };
        let (Some(frames), Some(link)) = (active.frames.take(), active.link.as_ref()) else {
            warn!("Session opened without a capture stream");
            return;
        };

        let pipeline = CapturePipeline::new(sensitivity, link.outbound.clone());
        active.capture = Some(tokio::spawn(async move {
            let end = pipeline
                .run(frames, move |count| {
                    let _ = events.send(CompanionEvent::FrameSent { session, count });
                })
                .await;
            debug!(reason = ?end, "Capture finished");
        }));
    }

    fn handle_content(&mut self, content: ServerContent) {
        if let Err(e) = self.play_inline_audio(&content) {
            warn!(error = %e, "Dropping server message with undecodable audio");
            if let Some(active) = self.session.as_mut() {
                active.lifecycle.stats.decode_errors += 1;
            }
            return;
        }

        if let Some(text) = content.input_text().filter(|t| !t.is_empty()) {
            self.transcripts.push(Speaker::User, text);
        }

        if let Some(text) = content.output_text().filter(|t| !t.is_empty()) {
            self.transcripts.push(Speaker::Avatar, text);
            self.emotion = emotion::classify(text);
            if let Some(memory) = derive_memory(text) {
                self.remember(memory);
            }
        }

        if content.interrupted {
            self.scheduler.interrupt();
            if let Some(active) = self.session.as_mut() {
                active.lifecycle.stats.interruptions += 1;
            }
        }

        if content.turn_complete {
            if let Some(active) = self.session.as_mut() {
                active.lifecycle.stats.turns_completed += 1;
            }
        }
    }

    /// Decode every inline part first so one bad part schedules nothing.
    fn play_inline_audio(&mut self, content: &ServerContent) -> AppResult<()> {
        let rate = self
            .session
            .as_ref()
            .map(|s| s.playback_sample_rate)
            .unwrap_or(24000);

        let buffers = content
            .inline_audio()
            .map(codec::decode)
            .collect::<AppResult<Vec<Vec<u8>>>>()?;

        for bytes in buffers {
            let buffer: DecodedBuffer = codec::to_audio_buffer(&bytes, rate, 1);
            if buffer.is_empty() {
                continue;
            }
            if let Some(active) = self.session.as_mut() {
                active.lifecycle.stats.audio_chunks += 1;
                active.lifecycle.stats.audio_bytes += bytes.len() as u64;
            }
            if let Err(e) = self.scheduler.schedule(buffer) {
                warn!(error = %e, "Output refused a playback buffer");
            }
        }
        Ok(())
    }

    fn remember(&mut self, memory: String) {
        if let Err(e) = self.store.save(&memory) {
            warn!(error = %e, "Could not persist memory");
        }
        self.memory = Some(memory);
    }

    fn publish(&self) {
        let snapshot = CompanionSnapshot {
            avatar: AvatarState {
                emotion: self.emotion,
                is_speaking: self.scheduler.is_speaking(),
                is_connected: self.session_state() == SessionState::Open,
                confidence: 100,
            },
            session: self.session.as_ref().map(|s| s.lifecycle.summary()),
            transcripts: self.transcripts.entries(),
            memory: self.memory.clone(),
            last_error: self.last_error.clone(),
            updated_at: Utc::now(),
        };
        self.snapshot.send_replace(snapshot);
    }
}
