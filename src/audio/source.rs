//! # Frame Sources
//!
//! Where captured audio comes from. A [`FrameSource`] is opened once per
//! session and hands back a channel of fixed-size [`AudioFrame`]s at the
//! capture rate.
//!
//! ## Implementations:
//! - [`WavFileSource`]: replays a WAV file in real time (demos, tests, headless runs)
//! - `MicrophoneSource` (feature `device-audio`): the default input device
//!
//! The frame channel has room for a single frame: a source never queues more
//! than one frame ahead of the capture pipeline.

use crate::audio::codec::AudioFrame;
use crate::audio::resample::resample;
use crate::error::{AppError, AppResult};
use std::fs::File;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Capacity of the frame channel between a source and the capture pipeline.
pub const FRAME_CHANNEL_CAPACITY: usize = 1;

/// Producer of capture frames.
pub trait FrameSource: Send {
    /// Start producing frames of `frame_size` samples at `sample_rate`.
    ///
    /// Fails with [`AppError::MicrophoneUnavailable`] or [`AppError::Audio`]
    /// when the underlying device/file cannot be opened.
    fn open(&mut self, frame_size: usize, sample_rate: u32) -> AppResult<mpsc::Receiver<AudioFrame>>;

    /// Release the device. Dropping the receiver has the same effect.
    fn close(&mut self) {}
}

/// Accumulates arbitrary-length sample runs into fixed-size frames.
#[derive(Debug)]
pub struct FrameChunker {
    frame_size: usize,
    sample_rate: u32,
    pending: Vec<f32>,
}

impl FrameChunker {
    pub fn new(frame_size: usize, sample_rate: u32) -> Self {
        Self {
            frame_size,
            sample_rate,
            pending: Vec::with_capacity(frame_size),
        }
    }

    /// Add samples and return every frame that became complete.
    pub fn push(&mut self, samples: &[f32]) -> Vec<AudioFrame> {
        self.pending.extend_from_slice(samples);

        let mut frames = Vec::new();
        while self.pending.len() >= self.frame_size {
            let rest = self.pending.split_off(self.frame_size);
            let full = std::mem::replace(&mut self.pending, rest);
            frames.push(AudioFrame::new(full, self.sample_rate));
        }
        frames
    }

    /// Samples waiting for the next frame.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

/// Average interleaved channels into mono.
pub fn downmix(samples: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    samples
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Send prepared frames paced at real-time speed.
fn spawn_paced(frames: Vec<AudioFrame>, pace: Option<Duration>) -> (mpsc::Receiver<AudioFrame>, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);

    let task = tokio::spawn(async move {
        let mut ticker = pace.map(tokio::time::interval);
        for frame in frames {
            if let Some(ticker) = ticker.as_mut() {
                ticker.tick().await;
            }
            if tx.send(frame).await.is_err() {
                debug!("Frame receiver dropped, stopping replay");
                return;
            }
        }
    });

    (rx, task)
}

/// Replays a WAV file as if it were a microphone.
///
/// Any channel count and sample rate is accepted: channels are averaged and
/// the signal is resampled to the capture rate. A trailing partial frame is
/// padded with silence so the end of the recording is not lost.
pub struct WavFileSource {
    path: PathBuf,
    realtime: bool,
    task: Option<JoinHandle<()>>,
}

impl WavFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            realtime: true,
            task: None,
        }
    }

    /// Deliver frames as fast as the consumer takes them.
    #[cfg(test)]
    pub fn unpaced(mut self) -> Self {
        self.realtime = false;
        self
    }

    fn read_samples(&self) -> AppResult<(Vec<f32>, u32)> {
        let mut file = File::open(&self.path).map_err(|e| {
            AppError::Audio(format!("cannot open {}: {}", self.path.display(), e))
        })?;
        let (header, data) = wav::read(&mut file).map_err(|e| {
            AppError::Audio(format!("cannot read {}: {}", self.path.display(), e))
        })?;

        let interleaved: Vec<f32> = match data {
            wav::BitDepth::Eight(samples) => samples
                .into_iter()
                .map(|s| (s as f32 - 128.0) / 128.0)
                .collect(),
            wav::BitDepth::Sixteen(samples) => samples
                .into_iter()
                .map(|s| s as f32 / 32768.0)
                .collect(),
            wav::BitDepth::TwentyFour(samples) => samples
                .into_iter()
                .map(|s| s as f32 / 8_388_608.0)
                .collect(),
            wav::BitDepth::ThirtyTwoFloat(samples) => samples,
            wav::BitDepth::Empty => {
                return Err(AppError::Audio(format!("{} has no audio data", self.path.display())))
            }
        };

        let mono = downmix(&interleaved, header.channel_count as usize);
        Ok((mono, header.sampling_rate))
    }
}

impl FrameSource for WavFileSource {
    fn open(&mut self, frame_size: usize, sample_rate: u32) -> AppResult<mpsc::Receiver<AudioFrame>> {
        let (samples, file_rate) = self.read_samples()?;
        let samples = resample(&samples, file_rate, sample_rate)?;

        let mut chunker = FrameChunker::new(frame_size, sample_rate);
        let mut frames = chunker.push(&samples);
        if chunker.pending() > 0 {
            let padding = vec![0.0; frame_size - chunker.pending()];
            frames.extend(chunker.push(&padding));
        }

        info!(
            path = %self.path.display(),
            file_rate,
            frames = frames.len(),
            "Replaying WAV file as capture input"
        );

        let pace = self
            .realtime
            .then(|| Duration::from_secs_f64(frame_size as f64 / sample_rate as f64));
        let (rx, task) = spawn_paced(frames, pace);
        self.task = Some(task);
        Ok(rx)
    }

    fn close(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Frames prepared in memory, delivered without pacing.
#[cfg(test)]
pub struct VecSource {
    frames: Option<Vec<AudioFrame>>,
}

#[cfg(test)]
impl VecSource {
    pub fn new(frames: Vec<AudioFrame>) -> Self {
        Self { frames: Some(frames) }
    }
}

#[cfg(test)]
impl FrameSource for VecSource {
    fn open(&mut self, _frame_size: usize, _sample_rate: u32) -> AppResult<mpsc::Receiver<AudioFrame>> {
        let frames = self
            .frames
            .take()
            .ok_or_else(|| AppError::Audio("source already consumed".to_string()))?;
        let (rx, _task) = spawn_paced(frames, None);
        Ok(rx)
    }
}
