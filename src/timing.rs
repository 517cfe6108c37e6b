//! Per-word timing derived from total narration length.
//!
//! Every word is assumed to take the same time: `duration / word_count`.
//! This is an approximation, not acoustic alignment; clients drift on long
//! words and pauses but stay anchored at the start and the end.

use std::time::Instant;

use serde::Serialize;

use crate::audio;
use crate::error::NarrationError;
use crate::store::AudioArtifact;

/// Uniform word schedule for one narration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TimingSchedule {
    pub word_count: usize,
    pub per_word_seconds: f64,
}

impl TimingSchedule {
    /// Spread `total_seconds` evenly over `word_count` words.
    pub fn from_duration(total_seconds: f64, word_count: usize) -> Result<Self, NarrationError> {
        if word_count == 0 {
            return Err(NarrationError::InvalidWordCount);
        }
        Ok(Self {
            word_count,
            per_word_seconds: total_seconds / word_count as f64,
        })
    }

    pub fn total_seconds(&self) -> f64 {
        self.per_word_seconds * self.word_count as f64
    }

    /// Playback offset at which word `index` starts.
    pub fn word_start(&self, index: usize) -> Option<f64> {
        (index < self.word_count).then(|| index as f64 * self.per_word_seconds)
    }

    /// Index of the word being spoken at `seconds` into playback.
    pub fn word_at(&self, seconds: f64) -> Option<usize> {
        if seconds.is_nan() || seconds < 0.0 || seconds >= self.total_seconds() {
            return None;
        }
        let index = (seconds / self.per_word_seconds).floor() as usize;
        Some(index.min(self.word_count - 1))
    }
}

/// Split text into words on any whitespace, keeping order.
pub fn split_words(text: &str) -> Vec<String> {
    text.split_whitespace().map(str::to_string).collect()
}

/// Builds [`TimingSchedule`]s from persisted artifacts.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimingEstimator;

impl TimingEstimator {
    pub fn new() -> Self {
        Self
    }

    /// Measure the artifact and spread its duration over `word_count` words.
    pub fn estimate(
        &self,
        artifact: &AudioArtifact,
        word_count: usize,
    ) -> Result<TimingSchedule, NarrationError> {
        if word_count == 0 {
            return Err(NarrationError::InvalidWordCount);
        }

        let start = Instant::now();
        let duration = audio::wav_duration_secs(&artifact.file_path)?;
        log::info!(
            "Measured {} ({duration:.2}s) in {:.2?}",
            artifact.id,
            start.elapsed()
        );

        TimingSchedule::from_duration(duration, word_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ArtifactStore;
    use crate::SynthesisResult;

    #[test]
    fn per_word_time_is_duration_over_count() {
        for (duration, words) in [(2.0, 2), (10.0, 3), (0.5, 7), (3600.0, 12_345), (1.0, 1)] {
            let schedule = TimingSchedule::from_duration(duration, words).unwrap();
            assert!((schedule.per_word_seconds - duration / words as f64).abs() < 1e-12);
            assert!((schedule.total_seconds() - duration).abs() < 1e-9);
        }
    }

    #[test]
    fn zero_words_is_rejected_not_infinite() {
        assert!(matches!(
            TimingSchedule::from_duration(2.0, 0),
            Err(NarrationError::InvalidWordCount)
        ));
        assert!(matches!(
            TimingSchedule::from_duration(0.0, 0),
            Err(NarrationError::InvalidWordCount)
        ));
    }

    #[test]
    fn word_offsets_follow_uniform_schedule() {
        let schedule = TimingSchedule::from_duration(3.0, 4).unwrap();
        assert_eq!(schedule.word_start(0), Some(0.0));
        assert_eq!(schedule.word_start(2), Some(1.5));
        assert_eq!(schedule.word_start(4), None);

        assert_eq!(schedule.word_at(0.0), Some(0));
        assert_eq!(schedule.word_at(0.8), Some(1));
        assert_eq!(schedule.word_at(2.99), Some(3));
        assert_eq!(schedule.word_at(3.0), None);
        assert_eq!(schedule.word_at(-1.0), None);
        assert_eq!(schedule.word_at(f64::NAN), None);
    }

    #[test]
    fn splits_on_any_whitespace_in_order() {
        assert_eq!(
            split_words("  Hello\tworld\n\nagain  "),
            vec!["Hello", "world", "again"]
        );
        assert!(split_words(" \n\t ").is_empty());
    }

    #[test]
    fn hello_world_over_two_seconds_is_one_second_per_word() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open_dir(dir.path()).unwrap();
        let artifact = store
            .persist(
                &SynthesisResult {
                    samples: vec![0.0; 32000],
                    sample_rate: 16000,
                },
                "base",
            )
            .unwrap();

        let words = split_words("Hello world");
        let schedule = TimingEstimator::new()
            .estimate(&artifact, words.len())
            .unwrap();
        assert_eq!(schedule.word_count, 2);
        assert!((schedule.per_word_seconds - 1.0).abs() < 1e-9);
    }

    #[test]
    fn estimate_checks_word_count_before_reading_audio() {
        let artifact = AudioArtifact {
            id: "missing.wav".to_string(),
            file_path: "/nonexistent/missing.wav".into(),
            created_at: std::time::SystemTime::now(),
            voice_id: "base".to_string(),
        };
        assert!(matches!(
            TimingEstimator::new().estimate(&artifact, 0),
            Err(NarrationError::InvalidWordCount)
        ));
        assert!(matches!(
            TimingEstimator::new().estimate(&artifact, 3),
            Err(NarrationError::Audio(_))
        ));
    }
}
