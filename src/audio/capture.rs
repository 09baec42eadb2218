//! # Capture Pipeline
//!
//! Frames from a [`FrameSource`](crate::audio::source::FrameSource) → gain →
//! PCM encode → outbound message stream.
//!
//! The gain is read from a `watch` channel once per frame, so a sensitivity
//! change from the configuration panel applies from the next frame on and
//! never in the middle of one. Range checks live in the configuration layer.

use crate::audio::codec::{self, AudioFrame, WireBlob};
use crate::live::protocol::ClientMessage;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

/// Apply `gain` and encode.
pub fn process_frame(mut frame: AudioFrame, gain: f32) -> WireBlob {
    frame.apply_gain(gain);
    codec::encode(&frame)
}

/// Why a capture run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureEnd {
    /// The frame source ran dry or was closed
    SourceFinished,
    /// The outbound stream went away
    OutboundClosed,
}

pub struct CapturePipeline {
    sensitivity: watch::Receiver<f32>,
    outbound: mpsc::Sender<ClientMessage>,
}

impl CapturePipeline {
    pub fn new(sensitivity: watch::Receiver<f32>, outbound: mpsc::Sender<ClientMessage>) -> Self {
        Self { sensitivity, outbound }
    }

    /// Pump frames until the source or the outbound stream ends.
    ///
    /// `on_frame` is called after each successful hand-off with the running
    /// frame count.
    pub async fn run<F>(self, mut frames: mpsc::Receiver<AudioFrame>, mut on_frame: F) -> CaptureEnd
    where
        F: FnMut(u64) + Send,
    {
        info!("Capture pipeline started");
        let mut sent = 0u64;

        let end = loop {
            let Some(frame) = frames.recv().await else {
                break CaptureEnd::SourceFinished;
            };

            let gain = *self.sensitivity.borrow();
            let blob = process_frame(frame, gain);

            if self.outbound.send(ClientMessage::audio(blob)).await.is_err() {
                break CaptureEnd::OutboundClosed;
            }
            sent += 1;
            on_frame(sent);
        };

        debug!(frames = sent, reason = ?end, "Capture pipeline stopped");
        end
    }
}
