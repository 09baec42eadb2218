//! # PCM Codec
//!
//! Converts between the float samples the audio devices work with and the
//! 16-bit little-endian PCM the live speech service speaks.
//!
//! ## Directions:
//! - **Outbound**: [`AudioFrame`] (f32, 16 kHz) → [`WireBlob`] (base64 PCM + MIME tag)
//! - **Inbound**: base64 string → raw bytes → [`DecodedBuffer`] (f32, 24 kHz)
//!
//! ## Sample scaling:
//! Encoding clamps to [-1.0, 1.0] and scales by 32767; decoding divides by
//! 32768. The asymmetry is the usual PCM convention and keeps `-1.0` exact.

use crate::error::AppResult;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

/// Scale used when converting float samples to i16.
const ENCODE_SCALE: f32 = 32767.0;

/// Divisor used when converting i16 samples back to float.
const DECODE_SCALE: f32 = 32768.0;

/// MIME descriptor for outbound PCM at the given rate.
pub fn pcm_mime_type(sample_rate: u32) -> String {
    format!("audio/pcm;rate={}", sample_rate)
}

/// One capture tick worth of mono samples.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self { samples, sample_rate }
    }

    /// Multiply every sample by `gain`.
    pub fn apply_gain(&mut self, gain: f32) {
        for sample in self.samples.iter_mut() {
            *sample *= gain;
        }
    }
}

/// Base64 PCM payload plus its MIME tag, exactly as the service expects it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireBlob {
    pub data: String,
    pub mime_type: String,
}

/// Playable audio reconstructed from inbound PCM.
///
/// Samples are stored per channel (`channels[c][i]`), all channels share the
/// same length.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedBuffer {
    pub sample_rate: u32,
    pub channels: Vec<Vec<f32>>,
}

impl DecodedBuffer {
    /// Number of frames (samples per channel).
    pub fn len(&self) -> usize {
        self.channels.first().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Playback duration in seconds.
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.len() as f64 / self.sample_rate as f64
    }

    /// Average of all channels, used by mono outputs.
    pub fn mixdown(&self) -> Vec<f32> {
        match self.channels.len() {
            0 => Vec::new(),
            1 => self.channels[0].clone(),
            n => (0..self.len())
                .map(|i| self.channels.iter().map(|c| c[i]).sum::<f32>() / n as f32)
                .collect(),
        }
    }
}

/// Encode a captured frame into a wire blob.
///
/// Never fails: out-of-range values are clamped and NaN becomes silence.
pub fn encode(frame: &AudioFrame) -> WireBlob {
    let quantized: Vec<i16> = frame
        .samples
        .iter()
        .map(|&sample| {
            if sample.is_nan() {
                0
            } else {
                (sample.clamp(-1.0, 1.0) * ENCODE_SCALE).round() as i16
            }
        })
        .collect();

    let mut pcm = vec![0u8; quantized.len() * 2];
    LittleEndian::write_i16_into(&quantized, &mut pcm);

    WireBlob {
        data: BASE64.encode(&pcm),
        mime_type: pcm_mime_type(frame.sample_rate),
    }
}

/// Decode a base64 payload into raw bytes.
pub fn decode(data: &str) -> AppResult<Vec<u8>> {
    Ok(BASE64.decode(data)?)
}

/// Reinterpret little-endian i16 PCM as a playable buffer.
///
/// Interleaved layout is assumed for `channels > 1`. Bytes that do not make
/// up a whole frame (including a trailing odd byte) are dropped.
pub fn to_audio_buffer(bytes: &[u8], sample_rate: u32, channels: usize) -> DecodedBuffer {
    let channels = channels.max(1);
    let frame_count = bytes.len() / (2 * channels);
    let mut data = vec![Vec::with_capacity(frame_count); channels];

    for (i, pair) in bytes.chunks_exact(2).take(frame_count * channels).enumerate() {
        let sample = LittleEndian::read_i16(pair) as f32 / DECODE_SCALE;
        data[i % channels].push(sample);
    }

    DecodedBuffer {
        sample_rate,
        channels: data,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STEP: f32 = 1.0 / 32768.0;

    #[test]
    fn test_encode_tags_mime_type() {
        let blob = encode(&AudioFrame::new(vec![0.0; 4], 16000));
        assert_eq!(blob.mime_type, "audio/pcm;rate=16000");
        assert_eq!(decode(&blob.data).unwrap(), vec![0u8; 8]);
    }

    #[test]
    fn test_encode_clamps_and_scales() {
        let blob = encode(&AudioFrame::new(vec![1.0, -1.0, 2.5, -7.0, f32::NAN], 16000));
        let bytes = decode(&blob.data).unwrap();
        let values: Vec<i16> = bytes.chunks_exact(2).map(LittleEndian::read_i16).collect();
        assert_eq!(values, vec![32767, -32767, 32767, -32767, 0]);
    }

    #[test]
    fn test_round_trip_within_quantization_step() {
        let samples: Vec<f32> = (0..=200).map(|i| -1.0 + i as f32 * 0.01).collect();
        let blob = encode(&AudioFrame::new(samples.clone(), 16000));
        let buffer = to_audio_buffer(&decode(&blob.data).unwrap(), 16000, 1);

        assert_eq!(buffer.len(), samples.len());
        for (original, restored) in samples.iter().zip(buffer.channels[0].iter()) {
            // one 16-bit step plus the half step lost to rounding
            assert!(
                (original - restored).abs() <= 1.5 * STEP + f32::EPSILON,
                "{} vs {}",
                original,
                restored
            );
        }
    }

    #[test]
    fn test_decode_rejects_malformed_base64() {
        assert!(decode("not base64 at all!").is_err());
    }

    #[test]
    fn test_trailing_odd_byte_is_dropped() {
        let bytes = [0x00, 0x40, 0x00, 0xC0, 0x7F];
        let buffer = to_audio_buffer(&bytes, 24000, 1);
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.channels[0], vec![0.5, -0.5]);
    }

    #[test]
    fn test_stereo_deinterleave() {
        // L=0x4000 (0.5), R=0xC000 (-0.5), then a dangling left sample
        let bytes = [0x00, 0x40, 0x00, 0xC0, 0x00, 0x40];
        let buffer = to_audio_buffer(&bytes, 24000, 2);
        assert_eq!(buffer.channel_count(), 2);
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.channels[0], vec![0.5]);
        assert_eq!(buffer.channels[1], vec![-0.5]);
        assert_eq!(buffer.mixdown(), vec![0.0]);
    }

    #[test]
    fn test_duration_uses_sample_rate() {
        let buffer = to_audio_buffer(&vec![0u8; 48000], 24000, 1);
        assert!((buffer.duration() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_apply_gain() {
        let mut frame = AudioFrame::new(vec![0.1, -0.2], 16000);
        frame.apply_gain(2.0);
        assert_eq!(frame.samples, vec![0.2, -0.4]);
    }
}
