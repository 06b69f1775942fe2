use crate::error::CliError;
use fmwave_core::source::{resample_audio, stereo_to_mono, to_u8_samples};
use hound::SampleFormat;
use std::path::Path;
use tracing::info;

/// Read a WAV file as 8-bit mono samples at `sample_rate`
pub fn load_wav(path: &Path, sample_rate: u32, volume_percent: u8) -> Result<Vec<u8>, CliError> {
    let mut reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    info!(
        "Read WAV: {} Hz, {} channels, {} bits",
        spec.sample_rate, spec.channels, spec.bits_per_sample
    );

    let samples: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Int, 8) => reader
            .samples::<i8>()
            .map(|s| s.map(|s| s as f32 / 128.0))
            .collect::<Result<_, _>>()?,
        (SampleFormat::Int, 16) => reader
            .samples::<i16>()
            .map(|s| s.map(|s| s as f32 / 32768.0))
            .collect::<Result<_, _>>()?,
        (SampleFormat::Float, 32) => reader.samples::<f32>().collect::<Result<_, _>>()?,
        (format, bits) => {
            return Err(CliError::UnsupportedWav(format!("{:?} at {} bits", format, bits)));
        }
    };

    let mono = match spec.channels {
        1 => samples,
        2 => stereo_to_mono(&samples)?,
        n => return Err(CliError::UnsupportedWav(format!("{} channels", n))),
    };

    let gain = volume_percent.min(100) as f32 / 100.0;
    let scaled: Vec<f32> = mono.iter().map(|s| s * gain).collect();
    let resampled = resample_audio(&scaled, spec.sample_rate, sample_rate);

    info!(
        "Prepared {} samples ({:.2} s at {} Hz)",
        resampled.len(),
        resampled.len() as f64 / sample_rate as f64,
        sample_rate
    );
    Ok(to_u8_samples(&resampled))
}
