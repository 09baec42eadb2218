//! Sample-rate conversion on top of a rubato `FastFixedIn` resampler.
//!
//! Devices and WAV files arrive at whatever rate they were recorded at, the
//! live session wants 16 kHz and the speaker wants its own native rate.
//! [`RateConverter`] keeps the resampler state and a partial-chunk buffer
//! between calls, so feeding a signal in arbitrary pieces gives the same
//! output as converting it in one go.

use crate::error::{AppError, AppResult};
use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::{debug, error};

/// Input samples handed to rubato per call.
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// Converts mono f32 audio between two fixed rates.
pub struct RateConverter {
    /// `None` when both rates match.
    resampler: Option<FastFixedIn<f32>>,
    ratio: f64,
    chunk_size: usize,
    input_buf: Vec<f32>,
    output_buf: Vec<Vec<f32>>,
    /// Leading output samples that are still filter delay.
    skip: usize,
    samples_in: u64,
    samples_out: u64,
}

impl RateConverter {
    pub fn new(from_rate: u32, to_rate: u32, chunk_size: usize) -> AppResult<Self> {
        if from_rate == 0 || to_rate == 0 || chunk_size == 0 {
            return Err(AppError::Audio(format!(
                "cannot resample {} Hz to {} Hz in chunks of {}",
                from_rate, to_rate, chunk_size
            )));
        }

        let ratio = to_rate as f64 / from_rate as f64;
        if from_rate == to_rate {
            return Ok(Self {
                resampler: None,
                ratio,
                chunk_size,
                input_buf: Vec::new(),
                output_buf: Vec::new(),
                skip: 0,
                samples_in: 0,
                samples_out: 0,
            });
        }

        let resampler = FastFixedIn::<f32>::new(ratio, 1.0, PolynomialDegree::Cubic, chunk_size, 1)
            .map_err(|e| AppError::Audio(format!("resampler init: {}", e)))?;
        let output_buf = vec![vec![0f32; resampler.output_frames_max()]; 1];
        let skip = resampler.output_delay();

        debug!(from_rate, to_rate, chunk_size, delay = skip, "Resampler ready");

        Ok(Self {
            resampler: Some(resampler),
            ratio,
            chunk_size,
            input_buf: Vec::with_capacity(chunk_size),
            output_buf,
            skip,
            samples_in: 0,
            samples_out: 0,
        })
    }

    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }

    /// Convert the next piece of a signal. Output may be empty while less
    /// than one chunk is buffered.
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        let Some(resampler) = self.resampler.as_mut() else {
            return samples.to_vec();
        };

        self.samples_in += samples.len() as u64;
        self.input_buf.extend_from_slice(samples);

        let mut result = Vec::new();
        let mut consumed = 0;
        while self.input_buf.len() - consumed >= self.chunk_size {
            let chunk = &self.input_buf[consumed..consumed + self.chunk_size];
            match resampler.process_into_buffer(&[chunk], &mut self.output_buf, None) {
                Ok((_, produced)) => {
                    let out = drop_delay(&mut self.skip, &self.output_buf[0][..produced]);
                    result.extend_from_slice(out);
                }
                Err(e) => error!(error = %e, "Resampler failed on a chunk"),
            }
            consumed += self.chunk_size;
        }
        self.input_buf.drain(..consumed);

        self.samples_out += result.len() as u64;
        result
    }

    /// Flush the buffered tail. Afterwards the total output is exactly
    /// `round(samples_in * to_rate / from_rate)` samples long.
    pub fn finish(&mut self) -> Vec<f32> {
        let Some(resampler) = self.resampler.as_mut() else {
            return Vec::new();
        };

        let expected = (self.samples_in as f64 * self.ratio).round() as u64;
        let mut pending = std::mem::take(&mut self.input_buf);
        let mut result = Vec::new();

        while self.samples_out + (result.len() as u64) < expected {
            let chunk = [pending.as_slice()];
            let input = (!pending.is_empty()).then_some(&chunk[..]);
            match resampler.process_partial_into_buffer(input, &mut self.output_buf, None) {
                Ok((_, 0)) => break,
                Ok((_, produced)) => {
                    let out = drop_delay(&mut self.skip, &self.output_buf[0][..produced]);
                    result.extend_from_slice(out);
                }
                Err(e) => {
                    error!(error = %e, "Resampler failed while flushing");
                    break;
                }
            }
            pending.clear();
        }

        let wanted = expected.saturating_sub(self.samples_out) as usize;
        result.truncate(wanted);
        self.samples_out += result.len() as u64;
        result
    }
}

fn drop_delay<'a>(skip: &mut usize, produced: &'a [f32]) -> &'a [f32] {
    let n = (*skip).min(produced.len());
    *skip -= n;
    &produced[n..]
}

/// Convert a complete signal.
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> AppResult<Vec<f32>> {
    let mut converter = RateConverter::new(from_rate, to_rate, DEFAULT_CHUNK_SIZE)?;
    if converter.is_passthrough() {
        return Ok(samples.to_vec());
    }
    let mut out = converter.process(samples);
    out.extend(converter.finish());
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(rate: u32, seconds: f64) -> Vec<f32> {
        let n = (rate as f64 * seconds) as usize;
        (0..n)
            .map(|i| 0.5 * (2.0 * std::f64::consts::PI * 440.0 * i as f64 / rate as f64).sin() as f32)
            .collect()
    }

    #[test]
    fn test_passthrough_is_identity() {
        let mut rc = RateConverter::new(16_000, 16_000, 512).unwrap();
        assert!(rc.is_passthrough());
        let samples: Vec<f32> = (0..300).map(|i| i as f32 * 0.001).collect();
        assert_eq!(rc.process(&samples), samples);
        assert!(rc.finish().is_empty());
    }

    #[test]
    fn test_partial_chunk_waits_for_finish() {
        let mut rc = RateConverter::new(48_000, 16_000, 960).unwrap();
        assert!(rc.process(&[0.1; 500]).is_empty());
        let tail = rc.finish();
        assert_eq!(tail.len(), 167);
    }

    #[test]
    fn test_chunked_stream_matches_whole_signal() {
        let input = sine(44_100, 1.0);

        let whole = resample(&input, 44_100, 16_000).unwrap();

        let mut rc = RateConverter::new(44_100, 16_000, DEFAULT_CHUNK_SIZE).unwrap();
        let mut chunked = Vec::new();
        for piece in input.chunks(512) {
            chunked.extend(rc.process(piece));
        }
        chunked.extend(rc.finish());

        assert_eq!(whole.len(), 16_000);
        assert_eq!(chunked.len(), 16_000);
        assert_eq!(chunked, whole);
    }

    #[test]
    fn test_chunked_output_has_no_seams() {
        let input = sine(44_100, 1.0);
        let mut rc = RateConverter::new(44_100, 16_000, DEFAULT_CHUNK_SIZE).unwrap();
        let mut out = Vec::new();
        for piece in input.chunks(441) {
            out.extend(rc.process(piece));
        }
        out.extend(rc.finish());

        // A 440 Hz tone at half scale moves at most ~0.087 per 16 kHz sample.
        let max_jump = out[..out.len() - 64]
            .windows(2)
            .map(|w| (w[1] - w[0]).abs())
            .fold(0.0f32, f32::max);
        assert!(max_jump < 0.12, "max jump {}", max_jump);
    }

    #[test]
    fn test_upsampling_length() {
        let out = resample(&vec![0.0; 2400], 24_000, 48_000).unwrap();
        assert_eq!(out.len(), 4800);
    }

    #[test]
    fn test_zero_rate_is_rejected() {
        assert!(matches!(RateConverter::new(0, 16_000, 512), Err(AppError::Audio(_))));
    }
}
