//! Audio sample sources
//!
//! The transmitter consumes unsigned 8-bit mono samples centered on 128.
//! Helpers here turn PCM audio into that form: stereo down-mix, volume,
//! linear-interpolation resampling and quantization.

use crate::error::{FmError, Result};
use crate::SAMPLE_CENTER;
use std::f64::consts::TAU;

/// Pull-based provider of 8-bit audio samples
///
/// Returning `None` ends the stream.
pub trait SampleSource {
    fn next_sample(&mut self) -> Option<u8>;

    /// Stop after `count` samples
    fn take_samples(self, count: usize) -> TakeSamples<Self>
    where
        Self: Sized,
    {
        TakeSamples {
            inner: self,
            remaining: count,
        }
    }
}

impl<F> SampleSource for F
where
    F: FnMut() -> Option<u8>,
{
    fn next_sample(&mut self) -> Option<u8> {
        self()
    }
}

/// Source limited to a fixed number of samples
#[derive(Debug, Clone)]
pub struct TakeSamples<S> {
    inner: S,
    remaining: usize,
}

impl<S: SampleSource> SampleSource for TakeSamples<S> {
    fn next_sample(&mut self) -> Option<u8> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        self.inner.next_sample()
    }
}

/// Source backed by any iterator of samples
#[derive(Debug, Clone)]
pub struct IterSource<I> {
    iter: I,
}

impl<I: Iterator<Item = u8>> SampleSource for IterSource<I> {
    fn next_sample(&mut self) -> Option<u8> {
        self.iter.next()
    }
}

pub fn from_iter<I>(samples: I) -> IterSource<I::IntoIter>
where
    I: IntoIterator<Item = u8>,
{
    IterSource {
        iter: samples.into_iter(),
    }
}

/// Endless center samples: an unmodulated carrier
#[derive(Debug, Clone, Copy, Default)]
pub struct Silence;

impl SampleSource for Silence {
    fn next_sample(&mut self) -> Option<u8> {
        Some(SAMPLE_CENTER)
    }
}

/// Endless sine test tone
#[derive(Debug, Clone)]
pub struct ToneSource {
    phase: f64,
    step: f64,
    amplitude: f64,
}

impl ToneSource {
    /// Full-scale tone at `frequency_hz`, sampled at `sample_rate`
    pub fn new(frequency_hz: f64, sample_rate: u32) -> Self {
        Self {
            phase: 0.0,
            step: TAU * frequency_hz / sample_rate as f64,
            amplitude: 1.0,
        }
    }

    /// Scale the tone, 0.0 (silent) to 1.0 (full deviation)
    pub fn with_amplitude(mut self, amplitude: f64) -> Self {
        self.amplitude = amplitude.clamp(0.0, 1.0);
        self
    }
}

impl SampleSource for ToneSource {
    fn next_sample(&mut self) -> Option<u8> {
        let value = self.amplitude * self.phase.sin();
        self.phase = (self.phase + self.step) % TAU;
        Some(float_to_u8(value as f32))
    }
}

/// Finite buffer of prepared samples, optionally repeated
#[derive(Debug, Clone)]
pub struct BufferSource {
    samples: Vec<u8>,
    position: usize,
    looping: bool,
}

impl BufferSource {
    pub fn new(samples: Vec<u8>) -> Self {
        Self {
            samples,
            position: 0,
            looping: false,
        }
    }

    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl SampleSource for BufferSource {
    fn next_sample(&mut self) -> Option<u8> {
        if self.position == self.samples.len() {
            if !self.looping || self.samples.is_empty() {
                return None;
            }
            self.position = 0;
        }
        let sample = self.samples[self.position];
        self.position += 1;
        Some(sample)
    }
}

/// Signed 16-bit PCM to unsigned 8-bit, keeping the top byte
pub fn pcm16_to_u8(sample: i16) -> u8 {
    ((sample as i32 + 32_768) >> 8) as u8
}

/// Normalized float in [-1.0, 1.0] to unsigned 8-bit
pub fn float_to_u8(sample: f32) -> u8 {
    ((sample.clamp(-1.0, 1.0) + 1.0) * 127.5).round() as u8
}

/// Down-mix interleaved 16-bit stereo to 8-bit mono at `volume_percent`
pub fn stereo_pcm16_to_u8(interleaved: &[i16], volume_percent: u8) -> Result<Vec<u8>> {
    if interleaved.len() % 2 != 0 {
        return Err(FmError::InvalidConfig(
            "stereo audio must have an even number of samples".to_string(),
        ));
    }
    let volume = volume_percent.min(100) as i32;

    Ok(interleaved
        .chunks_exact(2)
        .map(|frame| {
            let mono = (frame[0] as i32 + frame[1] as i32) / 2;
            pcm16_to_u8((mono * volume / 100) as i16)
        })
        .collect())
}

/// Mix stereo audio to mono by averaging both channels
///
/// `samples` is interleaved `[L, R, L, R, ...]` and must have even length.
pub fn stereo_to_mono(samples: &[f32]) -> Result<Vec<f32>> {
    if samples.len() % 2 != 0 {
        return Err(FmError::InvalidConfig(
            "stereo audio must have an even number of samples".to_string(),
        ));
    }
    Ok(samples
        .chunks_exact(2)
        .map(|frame| (frame[0] + frame[1]) / 2.0)
        .collect())
}

/// Resample audio to a target sample rate using linear interpolation
///
/// # Example
/// ```
/// use fmwave_core::source::resample_audio;
///
/// let audio_16k = vec![0.0f32; 160];
/// let audio_8k = resample_audio(&audio_16k, 16_000, 8_000);
/// assert_eq!(audio_8k.len(), 80);
/// ```
pub fn resample_audio(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let step = from_rate as f64 / to_rate as f64;
    let new_length = (samples.len() as u64 * to_rate as u64).div_ceil(from_rate as u64) as usize;
    let mut resampled = Vec::with_capacity(new_length);

    for i in 0..new_length {
        let src_idx = i as f64 * step;
        let floor = (src_idx.floor() as usize).min(samples.len() - 1);
        let fraction = (src_idx - floor as f64) as f32;

        let value = match samples.get(floor + 1) {
            Some(next) => samples[floor] * (1.0 - fraction) + next * fraction,
            None => samples[floor],
        };
        resampled.push(value);
    }

    resampled
}

/// Quantize normalized audio for the transmitter
pub fn to_u8_samples(samples: &[f32]) -> Vec<u8> {
    samples.iter().map(|&s| float_to_u8(s)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silence_is_center() {
        let mut silence = Silence;
        for _ in 0..10 {
            assert_eq!(silence.next_sample(), Some(128));
        }
    }

    #[test]
    fn test_take_samples_ends_stream() {
        let mut source = Silence.take_samples(3);
        assert_eq!(source.next_sample(), Some(128));
        assert_eq!(source.next_sample(), Some(128));
        assert_eq!(source.next_sample(), Some(128));
        assert_eq!(source.next_sample(), None);
    }

    #[test]
    fn test_closure_source() {
        let mut n = 0u8;
        let mut source = move || {
            n += 1;
            (n <= 2).then_some(n)
        };
        assert_eq!(source.next_sample(), Some(1));
        assert_eq!(source.next_sample(), Some(2));
        assert_eq!(source.next_sample(), None);
    }

    #[test]
    fn test_iterator_source() {
        let mut source = from_iter(vec![0u8, 128, 255]);
        assert_eq!(source.next_sample(), Some(0));
        assert_eq!(source.next_sample(), Some(128));
        assert_eq!(source.next_sample(), Some(255));
        assert_eq!(source.next_sample(), None);
    }

    #[test]
    fn test_tone_swings_full_range() {
        let mut tone = ToneSource::new(1_000.0, 8_000);
        let samples: Vec<u8> = (0..8).filter_map(|_| tone.next_sample()).collect();

        // Eight samples per cycle: 0, 45, 90 ... degrees
        assert_eq!(samples[0], 128);
        assert_eq!(samples[2], 255);
        assert_eq!(samples[6], 0);
    }

    #[test]
    fn test_tone_amplitude_scales() {
        let mut tone = ToneSource::new(1_000.0, 8_000).with_amplitude(0.5);
        let peak = (0..8).filter_map(|_| tone.next_sample()).max().unwrap();
        assert!((190..=192).contains(&peak), "peak {}", peak);
    }

    #[test]
    fn test_buffer_source_loops() {
        let mut source = BufferSource::new(vec![1, 2]).looping(true);
        let played: Vec<u8> = (0..5).filter_map(|_| source.next_sample()).collect();
        assert_eq!(played, vec![1, 2, 1, 2, 1]);

        let mut once = BufferSource::new(vec![7]);
        assert_eq!(once.next_sample(), Some(7));
        assert_eq!(once.next_sample(), None);

        let mut empty = BufferSource::new(Vec::new()).looping(true);
        assert_eq!(empty.next_sample(), None);
    }

    #[test]
    fn test_pcm16_to_u8() {
        assert_eq!(pcm16_to_u8(i16::MIN), 0);
        assert_eq!(pcm16_to_u8(0), 128);
        assert_eq!(pcm16_to_u8(i16::MAX), 255);
    }

    #[test]
    fn test_float_to_u8_clamps() {
        assert_eq!(float_to_u8(-2.0), 0);
        assert_eq!(float_to_u8(0.0), 128);
        assert_eq!(float_to_u8(1.0), 255);
        assert_eq!(float_to_u8(3.5), 255);
    }

    #[test]
    fn test_stereo_pcm16_with_volume() {
        let stereo = [i16::MAX, i16::MAX, -16_384, 16_384];
        assert_eq!(stereo_pcm16_to_u8(&stereo, 100).unwrap(), vec![255, 128]);

        // Zero volume collapses to the center
        assert_eq!(stereo_pcm16_to_u8(&stereo, 0).unwrap(), vec![128, 128]);
        assert!(stereo_pcm16_to_u8(&[1, 2, 3], 100).is_err());
    }

    #[test]
    fn test_stereo_to_mono() {
        let stereo = vec![0.2, 0.8, 0.4, 0.6]; // [L, R, L, R]
        let mono = stereo_to_mono(&stereo).unwrap();
        assert_eq!(mono.len(), 2);
        assert!((mono[0] - 0.5).abs() < 0.001);
        assert!((mono[1] - 0.5).abs() < 0.001);
    }

    #[test]
    fn test_stereo_to_mono_rejects_odd_length() {
        assert!(stereo_to_mono(&[0.1, 0.2, 0.3]).is_err());
    }

    #[test]
    fn test_resample_same_rate() {
        let samples = vec![0.1, 0.2, 0.3, 0.4];
        assert_eq!(resample_audio(&samples, 8_000, 8_000), samples);
    }

    #[test]
    fn test_resample_cd_audio_down_to_8k() {
        let samples = vec![0.25f32; 44_100];
        let resampled = resample_audio(&samples, 44_100, 8_000);
        assert_eq!(resampled.len(), 8_000);
        assert!(resampled.iter().all(|s| (s - 0.25).abs() < 1e-6));
    }

    #[test]
    fn test_resample_interpolates_between_points() {
        let resampled = resample_audio(&[0.0, 1.0], 8_000, 16_000);
        assert_eq!(resampled.len(), 4);
        assert!((resampled[1] - 0.5).abs() < 1e-6);
        assert!((resampled[2] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_resample_preserves_value_range() {
        let samples = vec![0.1, 0.5, -0.3, 0.8, -0.2];
        for sample in resample_audio(&samples, 16_000, 22_050) {
            assert!((-1.0..=1.0).contains(&sample), "sample out of range: {}", sample);
        }
    }
}
