//! # Playback Scheduler
//!
//! Queues decoded buffers back to back on the output timeline so consecutive
//! chunks from the speech service play without gaps or overlap.
//!
//! ## State:
//! - **cursor** (`next_start_time`): where the next buffer starts, in output
//!   seconds. Only advanced by the duration of a just-scheduled buffer and only
//!   reset (to 0) by [`PlaybackScheduler::interrupt`].
//! - **active**: sources that are scheduled or playing. Empty means the avatar
//!   is not speaking.
//!
//! ## Underruns:
//! When the output clock has already passed the cursor (the service is
//! lagging), the next buffer starts right away instead of leaving a gap that
//! would accumulate drift.

use crate::audio::codec::DecodedBuffer;
use crate::audio::output::{AudioOutput, SourceId};
use crate::error::AppResult;
use std::collections::HashSet;
use tracing::{debug, info};

/// Speech activity changes the avatar cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeechSignal {
    Started,
    Ended,
}

/// Result of scheduling one buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledSource {
    pub id: SourceId,
    pub start_at: f64,
    pub duration: f64,
    /// True when the output clock had passed the cursor
    pub underrun: bool,
    /// `Some(Started)` when this buffer went into an empty set
    pub signal: Option<SpeechSignal>,
}

pub struct PlaybackScheduler<O: AudioOutput> {
    output: O,
    next_start_time: f64,
    active: HashSet<SourceId>,
}

impl<O: AudioOutput> PlaybackScheduler<O> {
    pub fn new(output: O) -> Self {
        Self {
            output,
            next_start_time: 0.0,
            active: HashSet::new(),
        }
    }

    /// Schedule `buffer` right after everything already queued.
    ///
    /// The source is started before the cursor moves, so the cursor never
    /// runs ahead of what the output actually holds.
    pub fn schedule(&mut self, buffer: DecodedBuffer) -> AppResult<ScheduledSource> {
        let now = self.output.current_time();
        let underrun = now > self.next_start_time;
        let start_at = self.next_start_time.max(now);
        let duration = buffer.duration();

        let id = self.output.start(buffer, start_at)?;
        self.next_start_time = start_at + duration;

        let signal = if self.active.is_empty() {
            Some(SpeechSignal::Started)
        } else {
            None
        };
        self.active.insert(id);

        debug!(
            source = %id,
            start_at,
            duration,
            underrun,
            active = self.active.len(),
            "Scheduled playback buffer"
        );

        Ok(ScheduledSource {
            id,
            start_at,
            duration,
            underrun,
            signal,
        })
    }

    /// Called when a source finished on its own.
    ///
    /// Returns `Some(Ended)` only when this completion emptied the set.
    /// Completions for sources that were already stopped are ignored.
    pub fn on_source_ended(&mut self, id: SourceId) -> Option<SpeechSignal> {
        if !self.active.remove(&id) {
            return None;
        }

        if self.active.is_empty() {
            debug!(source = %id, "Last active source finished");
            Some(SpeechSignal::Ended)
        } else {
            None
        }
    }

    /// Hard cut: stop everything, forget the queue and rewind the cursor.
    pub fn interrupt(&mut self) -> SpeechSignal {
        let stopped = self.active.len();
        for id in self.active.drain() {
            self.output.stop(id);
        }
        self.next_start_time = 0.0;

        info!(stopped, "Playback interrupted");
        SpeechSignal::Ended
    }

    pub fn is_speaking(&self) -> bool {
        !self.active.is_empty()
    }

    #[cfg(test)]
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    #[cfg(test)]
    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::audio::codec::DecodedBuffer;
    use std::sync::{Arc, Mutex};

    /// Output whose clock is moved by hand.
    #[derive(Clone, Default)]
    pub(crate) struct ManualOutput {
        pub(crate) inner: Arc<Mutex<ManualOutputState>>,
    }

    #[derive(Default)]
    pub(crate) struct ManualOutputState {
        pub(crate) now: f64,
        pub(crate) next_id: u64,
        pub(crate) started: Vec<(SourceId, f64, f64)>,
        pub(crate) stopped: Vec<SourceId>,
    }

    impl ManualOutput {
        pub(crate) fn set_time(&self, now: f64) {
            self.inner.lock().unwrap().now = now;
        }

        pub(crate) fn started(&self) -> Vec<(SourceId, f64, f64)> {
            self.inner.lock().unwrap().started.clone()
        }

        pub(crate) fn stopped(&self) -> Vec<SourceId> {
            self.inner.lock().unwrap().stopped.clone()
        }
    }

    impl AudioOutput for ManualOutput {
        fn current_time(&self) -> f64 {
            self.inner.lock().unwrap().now
        }

        fn start(&mut self, buffer: DecodedBuffer, at: f64) -> AppResult<SourceId> {
            let mut state = self.inner.lock().unwrap();
            state.next_id += 1;
            let id = SourceId(state.next_id);
            state.started.push((id, at, buffer.duration()));
            Ok(id)
        }

        fn stop(&mut self, id: SourceId) {
            self.inner.lock().unwrap().stopped.push(id);
        }
    }

    pub(crate) fn buffer_of(seconds: f64) -> DecodedBuffer {
        let rate = 1000;
        DecodedBuffer {
            sample_rate: rate,
            channels: vec![vec![0.0; (seconds * rate as f64) as usize]],
        }
    }

    #[test]
    fn test_back_to_back_buffers_have_no_gap() {
        let output = ManualOutput::default();
        let mut scheduler = PlaybackScheduler::new(output.clone());

        let first = scheduler.schedule(buffer_of(0.5)).unwrap();
        let second = scheduler.schedule(buffer_of(0.25)).unwrap();
        let third = scheduler.schedule(buffer_of(1.0)).unwrap();

        assert_eq!(first.start_at, 0.0);
        assert_eq!(second.start_at, 0.5);
        assert_eq!(third.start_at, 0.75);
        assert!((scheduler.next_start_time() - 1.75).abs() < 1e-9);
        assert_eq!(output.started().len(), 3);
    }

    #[test]
    fn test_start_times_are_monotonic_with_clock_progress() {
        let output = ManualOutput::default();
        let mut scheduler = PlaybackScheduler::new(output.clone());

        let durations = [0.3, 0.2, 0.4, 0.1, 0.5];
        let clock = [0.0, 0.1, 0.9, 1.0, 2.5];
        let mut previous: Option<ScheduledSource> = None;

        for (d, t) in durations.iter().zip(clock.iter()) {
            output.set_time(*t);
            let scheduled = scheduler.schedule(buffer_of(*d)).unwrap();
            if let Some(prev) = &previous {
                assert!(scheduled.start_at >= prev.start_at);
                if scheduled.underrun {
                    assert_eq!(scheduled.start_at, *t);
                } else {
                    assert!(scheduled.start_at >= prev.start_at + prev.duration - 1e-9);
                }
            }
            previous = Some(scheduled);
        }
    }

    #[test]
    fn test_underrun_starts_immediately() {
        let output = ManualOutput::default();
        let mut scheduler = PlaybackScheduler::new(output.clone());

        scheduler.schedule(buffer_of(0.5)).unwrap();
        output.set_time(3.0);
        let late = scheduler.schedule(buffer_of(0.5)).unwrap();

        assert!(late.underrun);
        assert_eq!(late.start_at, 3.0);
        assert!((scheduler.next_start_time() - 3.5).abs() < 1e-9);
    }

    #[test]
    fn test_speech_signals_follow_active_set() {
        let output = ManualOutput::default();
        let mut scheduler = PlaybackScheduler::new(output);

        let a = scheduler.schedule(buffer_of(0.1)).unwrap();
        let b = scheduler.schedule(buffer_of(0.1)).unwrap();
        assert_eq!(a.signal, Some(SpeechSignal::Started));
        assert_eq!(b.signal, None);
        assert!(scheduler.is_speaking());

        assert_eq!(scheduler.on_source_ended(a.id), None);
        assert_eq!(scheduler.on_source_ended(b.id), Some(SpeechSignal::Ended));
        assert!(!scheduler.is_speaking());

        // duplicate completion does not re-signal
        assert_eq!(scheduler.on_source_ended(b.id), None);
    }

    #[test]
    fn test_interrupt_clears_everything() {
        let output = ManualOutput::default();
        let mut scheduler = PlaybackScheduler::new(output.clone());

        let a = scheduler.schedule(buffer_of(1.0)).unwrap();
        let b = scheduler.schedule(buffer_of(1.0)).unwrap();

        assert_eq!(scheduler.interrupt(), SpeechSignal::Ended);
        assert_eq!(scheduler.active_count(), 0);
        assert_eq!(scheduler.next_start_time(), 0.0);

        let mut stopped = output.stopped();
        stopped.sort_by_key(|id| id.0);
        assert_eq!(stopped, vec![a.id, b.id]);

        // late completion of a stopped source is ignored
        assert_eq!(scheduler.on_source_ended(a.id), None);
    }

    #[test]
    fn test_interrupt_on_idle_scheduler() {
        let mut scheduler = PlaybackScheduler::new(ManualOutput::default());
        scheduler.interrupt();
        assert_eq!(scheduler.active_count(), 0);
        assert_eq!(scheduler.next_start_time(), 0.0);
    }

    #[test]
    fn test_schedule_after_interrupt_uses_output_clock() {
        let output = ManualOutput::default();
        let mut scheduler = PlaybackScheduler::new(output.clone());

        output.set_time(5.0);
        scheduler.schedule(buffer_of(2.0)).unwrap();
        scheduler.interrupt();

        output.set_time(5.5);
        let next = scheduler.schedule(buffer_of(0.5)).unwrap();
        assert_eq!(next.start_at, 5.5);
    }
}
