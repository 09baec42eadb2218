//! # Audio Outputs
//!
//! The playback scheduler only needs three things from a sink: a clock, a way
//! to start a buffer at a given time and a way to cut a buffer short. That is
//! the [`AudioOutput`] trait.
//!
//! ## Implementations:
//! - [`SilentOutput`]: keeps real-time timing with tokio timers but renders
//!   nothing. Used for headless runs and when no speaker is configured.
//! - `SpeakerOutput` (feature `device-audio`): mixes scheduled buffers into the
//!   default output device through cpal.
//!
//! Natural completions are reported through a [`CompletionCallback`] so the
//! orchestrator can receive them on its single event channel.

use crate::audio::codec::DecodedBuffer;
use crate::error::AppResult;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::trace;

/// Identifier of one scheduled playback source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(pub u64);

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "src-{}", self.0)
    }
}

/// Invoked when a source finished playing on its own (not when stopped).
pub type CompletionCallback = Arc<dyn Fn(SourceId) + Send + Sync>;

/// A playback sink with its own clock.
pub trait AudioOutput {
    /// Current position of the output timeline, in seconds.
    fn current_time(&self) -> f64;

    /// Start `buffer` at `at` seconds on the output timeline.
    fn start(&mut self, buffer: DecodedBuffer, at: f64) -> AppResult<SourceId>;

    /// Stop a source immediately. Unknown ids are ignored.
    fn stop(&mut self, id: SourceId);
}

impl<T: AudioOutput + ?Sized> AudioOutput for Box<T> {
    fn current_time(&self) -> f64 {
        (**self).current_time()
    }

    fn start(&mut self, buffer: DecodedBuffer, at: f64) -> AppResult<SourceId> {
        (**self).start(buffer, at)
    }

    fn stop(&mut self, id: SourceId) {
        (**self).stop(id)
    }
}

/// Output that tracks playback time without producing sound.
///
/// Each started source gets a timer task that fires the completion callback
/// when the buffer would have finished. Stopping a source aborts its timer.
/// Must be used from inside a tokio runtime.
pub struct SilentOutput {
    origin: Instant,
    next_id: u64,
    timers: HashMap<SourceId, JoinHandle<()>>,
    on_complete: CompletionCallback,
}

impl SilentOutput {
    pub fn new(on_complete: CompletionCallback) -> Self {
        Self {
            origin: Instant::now(),
            next_id: 0,
            timers: HashMap::new(),
            on_complete,
        }
    }

    /// Number of sources whose timers are still pending.
    #[cfg(test)]
    pub fn pending(&self) -> usize {
        self.timers.values().filter(|t| !t.is_finished()).count()
    }
}

impl AudioOutput for SilentOutput {
    fn current_time(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }

    fn start(&mut self, buffer: DecodedBuffer, at: f64) -> AppResult<SourceId> {
        self.next_id += 1;
        let id = SourceId(self.next_id);

        let end = at.max(0.0) + buffer.duration();
        let deadline = self.origin + std::time::Duration::from_secs_f64(end);
        let on_complete = Arc::clone(&self.on_complete);

        let timer = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            on_complete(id);
        });

        // Drop handles of timers that already fired.
        self.timers.retain(|_, t| !t.is_finished());
        self.timers.insert(id, timer);

        trace!(source = %id, at, end, "Silent source started");
        Ok(id)
    }

    fn stop(&mut self, id: SourceId) {
        if let Some(timer) = self.timers.remove(&id) {
            timer.abort();
        }
    }
}

impl Drop for SilentOutput {
    fn drop(&mut self) {
        for (_, timer) in self.timers.drain() {
            timer.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn buffer(ms: usize) -> DecodedBuffer {
        DecodedBuffer {
            sample_rate: 1000,
            channels: vec![vec![0.0; ms]],
        }
    }

    fn collecting_output() -> (SilentOutput, mpsc::UnboundedReceiver<SourceId>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let output = SilentOutput::new(Arc::new(move |id| {
            let _ = tx.send(id);
        }));
        (output, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_completion_fires_after_buffer_duration() {
        let (mut output, mut done) = collecting_output();
        let id = output.start(buffer(200), 0.0).unwrap();

        tokio::time::advance(Duration::from_millis(150)).await;
        assert!(done.try_recv().is_err());

        let finished = tokio::time::timeout(Duration::from_secs(1), done.recv())
            .await
            .unwrap();
        assert_eq!(finished, Some(id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stopped_source_never_completes() {
        let (mut output, mut done) = collecting_output();
        let id = output.start(buffer(100), 0.0).unwrap();
        output.stop(id);

        tokio::time::advance(Duration::from_millis(500)).await;
        tokio::task::yield_now().await;
        assert!(done.try_recv().is_err());
        assert_eq!(output.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clock_advances_with_time() {
        let (output, _done) = collecting_output();
        let before = output.current_time();
        tokio::time::advance(Duration::from_millis(250)).await;
        assert!(output.current_time() - before >= 0.25 - 1e-6);
    }
}
