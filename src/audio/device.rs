//! Local microphone and speaker through CPAL.
//!
//! `cpal::Stream` is not `Send` on every platform, so each stream lives on a
//! dedicated thread that builds it, reports whether that worked and then parks
//! until told to stop. The handles returned here only hold the stop channel.
//!
//! Both directions open the device at its native configuration and convert in
//! software (downmix + rubato resampling), which avoids configs that some
//! PipeWire/ALSA setups accept but never deliver data for.

use crate::audio::codec::{AudioFrame, DecodedBuffer};
use crate::audio::output::{AudioOutput, CompletionCallback, SourceId};
use crate::audio::resample::{resample, RateConverter, DEFAULT_CHUNK_SIZE};
use crate::audio::source::{downmix, FrameChunker, FrameSource, FRAME_CHANNEL_CAPACITY};
use crate::error::{AppError, AppResult};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleFormat;
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Spawn a thread that owns a stream built by `build`.
///
/// Returns once the stream is playing (or failed to start). Dropping the
/// returned sender stops the stream.
fn spawn_stream_thread<B>(name: &str, build: B) -> Result<std_mpsc::Sender<()>, String>
where
    B: FnOnce() -> Result<cpal::Stream, String> + Send + 'static,
{
    let (ready_tx, ready_rx) = std_mpsc::channel::<Result<(), String>>();
    let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

    thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            let stream = match build().and_then(|s| s.play().map(|_| s).map_err(|e| e.to_string())) {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            let _ = ready_tx.send(Ok(()));
            // Blocks until a stop message arrives or the sender is dropped.
            let _ = stop_rx.recv();
            drop(stream);
        })
        .map_err(|e| e.to_string())?;

    ready_rx
        .recv()
        .map_err(|_| "audio thread exited before reporting".to_string())??;
    Ok(stop_tx)
}

/// Default input device of the default host.
pub struct MicrophoneSource {
    stop: Option<std_mpsc::Sender<()>>,
}

impl MicrophoneSource {
    pub fn new() -> Self {
        Self { stop: None }
    }
}

impl Default for MicrophoneSource {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSource for MicrophoneSource {
    fn open(&mut self, frame_size: usize, sample_rate: u32) -> AppResult<mpsc::Receiver<AudioFrame>> {
        let (tx, rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);

        let stop = spawn_stream_thread("azumi-microphone", move || {
            let host = cpal::default_host();
            let device = host
                .default_input_device()
                .ok_or_else(|| "no input device available".to_string())?;
            let config = device.default_input_config().map_err(|e| e.to_string())?;

            let native_rate = config.sample_rate().0;
            let channels = config.channels() as usize;
            info!(
                device = %device.name().unwrap_or_default(),
                native_rate,
                channels,
                format = ?config.sample_format(),
                "Opening microphone"
            );

            let mut converter = RateConverter::new(native_rate, sample_rate, DEFAULT_CHUNK_SIZE)
                .map_err(|e| e.to_string())?;
            let mut chunker = FrameChunker::new(frame_size, sample_rate);
            let mut dropped = 0u64;
            let mut deliver = move |samples: Vec<f32>| {
                let mono = downmix(&samples, channels);
                let resampled = converter.process(&mono);
                for frame in chunker.push(&resampled) {
                    if tx.try_send(frame).is_err() {
                        dropped += 1;
                        if dropped % 50 == 1 {
                            warn!(dropped, "Capture consumer is behind, dropping frames");
                        }
                    }
                }
            };

            let on_error = |err: cpal::StreamError| error!(error = %err, "Microphone stream error");
            let stream_config: cpal::StreamConfig = config.clone().into();

            let stream = match config.sample_format() {
                SampleFormat::F32 => device.build_input_stream(
                    &stream_config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| deliver(data.to_vec()),
                    on_error,
                    None,
                ),
                SampleFormat::I16 => device.build_input_stream(
                    &stream_config,
                    move |data: &[i16], _: &cpal::InputCallbackInfo| {
                        deliver(data.iter().map(|&s| s as f32 / 32768.0).collect())
                    },
                    on_error,
                    None,
                ),
                other => return Err(format!("unsupported input sample format {:?}", other)),
            };
            stream.map_err(|e| e.to_string())
        })
        .map_err(AppError::MicrophoneUnavailable)?;

        self.stop = Some(stop);
        Ok(rx)
    }

    fn close(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
            debug!("Microphone closed");
        }
    }
}

impl Drop for MicrophoneSource {
    fn drop(&mut self) {
        self.close();
    }
}

struct Voice {
    id: SourceId,
    start_frame: u64,
    samples: Vec<f32>,
}

impl Voice {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

/// Mixer shared between the scheduler side and the device callback.
struct MixerState {
    frames_rendered: u64,
    voices: Vec<Voice>,
}

impl MixerState {
    /// Fill `out` with mono samples starting at the current position and
    /// return the ids of voices that finished within this block.
    fn render(&mut self, out: &mut [f32]) -> Vec<SourceId> {
        let base = self.frames_rendered;
        for (offset, slot) in out.iter_mut().enumerate() {
            let t = base + offset as u64;
            *slot = self
                .voices
                .iter()
                .filter(|v| t >= v.start_frame && t < v.end_frame())
                .map(|v| v.samples[(t - v.start_frame) as usize])
                .sum::<f32>()
                .clamp(-1.0, 1.0);
        }
        self.frames_rendered += out.len() as u64;

        let now = self.frames_rendered;
        let mut finished = Vec::new();
        self.voices.retain(|v| {
            let done = v.end_frame() <= now;
            if done {
                finished.push(v.id);
            }
            !done
        });
        finished
    }
}

/// Default output device of the default host.
///
/// The output clock is the number of frames the device has pulled so far.
pub struct SpeakerOutput {
    device_rate: u32,
    next_id: u64,
    mixer: Arc<Mutex<MixerState>>,
    _stop: std_mpsc::Sender<()>,
}

impl SpeakerOutput {
    pub fn new(on_complete: CompletionCallback) -> AppResult<Self> {
        let mixer = Arc::new(Mutex::new(MixerState {
            frames_rendered: 0,
            voices: Vec::new(),
        }));
        let (rate_tx, rate_rx) = std_mpsc::channel();

        let callback_mixer = Arc::clone(&mixer);
        let stop = spawn_stream_thread("azumi-speaker", move || {
            let host = cpal::default_host();
            let device = host
                .default_output_device()
                .ok_or_else(|| "no output device available".to_string())?;
            let config = device.default_output_config().map_err(|e| e.to_string())?;
            if config.sample_format() != SampleFormat::F32 {
                return Err(format!("unsupported output sample format {:?}", config.sample_format()));
            }

            let channels = config.channels() as usize;
            let _ = rate_tx.send(config.sample_rate().0);
            info!(
                device = %device.name().unwrap_or_default(),
                rate = config.sample_rate().0,
                channels,
                "Opening speaker"
            );

            let mut mono = Vec::new();
            device
                .build_output_stream(
                    &config.into(),
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        mono.resize(data.len() / channels.max(1), 0.0);
                        let finished = callback_mixer
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .render(&mut mono);
                        for (frame, sample) in data.chunks_mut(channels.max(1)).zip(mono.iter()) {
                            frame.fill(*sample);
                        }
                        for id in finished {
                            on_complete(id);
                        }
                    },
                    |err| error!(error = %err, "Speaker stream error"),
                    None,
                )
                .map_err(|e| e.to_string())
        })
        .map_err(AppError::Audio)?;

        let device_rate = rate_rx
            .recv()
            .map_err(|_| AppError::Audio("speaker thread did not report its rate".to_string()))?;

        Ok(Self {
            device_rate,
            next_id: 0,
            mixer,
            _stop: stop,
        })
    }
}

impl AudioOutput for SpeakerOutput {
    fn current_time(&self) -> f64 {
        let frames = self
            .mixer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .frames_rendered;
        frames as f64 / self.device_rate as f64
    }

    fn start(&mut self, buffer: DecodedBuffer, at: f64) -> AppResult<SourceId> {
        self.next_id += 1;
        let id = SourceId(self.next_id);

        let samples = resample(&buffer.mixdown(), buffer.sample_rate, self.device_rate)?;
        let start_frame = (at.max(0.0) * self.device_rate as f64).round() as u64;

        self.mixer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .voices
            .push(Voice {
                id,
                start_frame,
                samples,
            });
        Ok(id)
    }

    fn stop(&mut self, id: SourceId) {
        self.mixer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .voices
            .retain(|v| v.id != id);
    }
}
