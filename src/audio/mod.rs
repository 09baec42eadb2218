//! # Audio Module
//!
//! Everything between the sound card and the live session:
//!
//! ## Key Components:
//! - **codec**: float frames ⇄ base64 16-bit PCM
//! - **scheduler**: gapless playback queue with hard interruption
//! - **capture**: frame → gain → encode → outbound pipeline
//! - **source**: where capture frames come from (WAV replay, microphone)
//! - **resample**: stateful rate conversion (rubato)
//! - **output**: where decoded buffers go (silent clock, speaker)
//!
//! ## Audio Format Requirements:
//! - **Capture**: 16 kHz mono, 4096-sample frames, 16-bit LE PCM on the wire
//! - **Playback**: 24 kHz mono 16-bit LE PCM from the service
//!
//! Local devices need the `device-audio` cargo feature. Without it the
//! microphone reports itself as unavailable and the speaker falls back to the
//! silent output.

pub mod capture;
pub mod codec;
pub mod output;
pub mod resample;
pub mod scheduler;
pub mod source;

#[cfg(feature = "device-audio")]
pub mod device;

use crate::config::AudioConfig;
use crate::error::{AppError, AppResult};
use output::{AudioOutput, CompletionCallback, SilentOutput};
use source::{FrameSource, WavFileSource};
use tracing::{info, warn};

/// Output type the orchestrator drives.
pub type BoxedOutput = Box<dyn AudioOutput + Send>;

/// Open the capture source named by `audio.input`.
pub fn open_frame_source(audio: &AudioConfig) -> AppResult<Box<dyn FrameSource>> {
    match audio.input.as_str() {
        "wav" => {
            let path = audio.input_wav_path.as_deref().ok_or_else(|| {
                AppError::ConfigError("audio.input_wav_path is required when audio.input = \"wav\"".to_string())
            })?;
            info!(path, "Using WAV file as capture input");
            Ok(Box::new(WavFileSource::new(path)))
        }
        "microphone" => microphone(),
        other => Err(AppError::ConfigError(format!("Unknown audio input '{}'", other))),
    }
}

#[cfg(feature = "device-audio")]
fn microphone() -> AppResult<Box<dyn FrameSource>> {
    Ok(Box::new(device::MicrophoneSource::new()))
}

#[cfg(not(feature = "device-audio"))]
fn microphone() -> AppResult<Box<dyn FrameSource>> {
    Err(AppError::MicrophoneUnavailable(
        "built without the device-audio feature".to_string(),
    ))
}

/// Create the playback sink named by `audio.output`.
pub fn open_output(audio: &AudioConfig, on_complete: CompletionCallback) -> AppResult<BoxedOutput> {
    match audio.output.as_str() {
        "silent" => Ok(Box::new(SilentOutput::new(on_complete))),
        "speaker" => speaker(on_complete),
        other => Err(AppError::ConfigError(format!("Unknown audio output '{}'", other))),
    }
}

#[cfg(feature = "device-audio")]
fn speaker(on_complete: CompletionCallback) -> AppResult<BoxedOutput> {
    match device::SpeakerOutput::new(on_complete.clone()) {
        Ok(speaker) => Ok(Box::new(speaker)),
        Err(e) => {
            warn!(error = %e, "Speaker unavailable, playback will be silent");
            Ok(Box::new(SilentOutput::new(on_complete)))
        }
    }
}

#[cfg(not(feature = "device-audio"))]
fn speaker(on_complete: CompletionCallback) -> AppResult<BoxedOutput> {
    warn!("Built without the device-audio feature, playback will be silent");
    Ok(Box::new(SilentOutput::new(on_complete)))
}
