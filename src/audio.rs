//! WAV helpers shared by the store and the timing estimator.

use std::path::Path;

/// Convert a float sample to 16-bit PCM, clamping out-of-range input.
pub fn f32_to_pcm16(sample: f32) -> i16 {
    let x = sample.clamp(-1.0, 1.0);
    // Symmetric mapping: -1.0 -> -32768, +1.0 -> 32767
    if x >= 0.0 {
        (x * 32767.0).round() as i16
    } else {
        (x * 32768.0).round() as i16
    }
}

/// Total playback length of a WAV file in seconds (frames / sample rate).
pub fn wav_duration_secs(path: &Path) -> Result<f64, hound::Error> {
    let reader = hound::WavReader::open(path)?;
    let sample_rate = reader.spec().sample_rate;
    if sample_rate == 0 {
        return Err(hound::Error::FormatError("sample rate is zero"));
    }
    Ok(reader.duration() as f64 / sample_rate as f64)
}
