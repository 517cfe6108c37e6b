//! # narrate-rs
//!
//! Turns an uploaded document into narrated audio plus a per-word timing map
//! so a client can highlight text in sync with playback.
//!
//! ## Features
//!
//! - **Voice registry**: voice ids map to a model file and its shared config
//! - **Document extraction**: plain text, and PDF with the `pdf` feature
//! - **Synthesis orchestration**: one engine call per request, serialized
//!   across requests, with artifacts persisted under collision-free names
//! - **Timing estimation**: uniform per-word duration derived from the
//!   measured length of the narration
//!
//! ## Quick Start
//!
//! ```no_run
//! use narrate_rs::{
//!     engines::CommandEngine, NarrationPipeline, NarrationRequest, NarratorConfig, VoiceEntry,
//! };
//!
//! let config = NarratorConfig::builder()
//!     .output_dir("results")
//!     .voice("base", VoiceEntry::new("models/base.onnx", "models/base.onnx.json"))
//!     .build()?;
//!
//! let pipeline = NarrationPipeline::new(config, CommandEngine::new())?;
//! let document = std::fs::read("paper.pdf")?;
//! let response = pipeline.narrate(NarrationRequest::new(document).with_speed(1.25))?;
//!
//! println!("{} words, {:.3}s each", response.words.len(), response.word_timing_seconds);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod audio;
pub mod config;
pub mod engines;
pub mod error;
pub mod extract;
pub mod pipeline;
pub mod registry;
pub mod store;
pub mod synthesis;
pub mod timing;

use std::path::Path;

pub use config::{NarratorConfig, NarratorConfigBuilder, UnknownVoicePolicy, VoiceEntry};
pub use engines::EngineError;
pub use error::{NarrationError, PipelineError, Stage};
pub use extract::{DocumentExtractor, ExtractError, PlainTextExtractor, TextExtractor};
pub use pipeline::{NarrationPipeline, NarrationRequest, NarrationResponse, PipelineState};
pub use registry::{ModelRegistry, VoiceProfile};
pub use store::{ArtifactStore, AudioArtifact};
pub use synthesis::SynthesisOrchestrator;
pub use timing::{split_words, TimingEstimator, TimingSchedule};

/// The result of a synthesis (text-to-speech) operation.
///
/// Contains raw f32 audio samples and the sample rate of the output audio.
#[derive(Debug, Clone)]
pub struct SynthesisResult {
    /// Raw mono audio samples in `[-1.0, 1.0]`
    pub samples: Vec<f32>,
    /// Sample rate of the audio
    pub sample_rate: u32,
}

impl SynthesisResult {
    /// Write the audio to a 16-bit PCM mono WAV file.
    ///
    /// The file is finalized (header patched, buffers flushed) before this
    /// returns.
    pub fn write_wav(&self, path: &Path) -> Result<(), hound::Error> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec)?;
        for &sample in &self.samples {
            writer.write_sample(audio::f32_to_pcm16(sample))?;
        }
        writer.finalize()?;
        Ok(())
    }

    /// Duration of the audio in seconds.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Common interface for text-to-speech synthesis engines.
///
/// An engine holds at most one voice model at a time. Engines are not
/// expected to be thread-safe; [`SynthesisOrchestrator`] serializes access.
pub trait SynthesisEngine {
    /// Load the model and config of a resolved voice, replacing any loaded one.
    fn load_model(&mut self, voice: &VoiceProfile) -> Result<(), EngineError>;

    /// Unload the currently loaded model and free associated resources.
    fn unload_model(&mut self);

    /// Id of the voice currently loaded, if any.
    fn loaded_voice(&self) -> Option<&str>;

    /// Run on a compute accelerator when one is available. Engines without
    /// one ignore this.
    fn set_accelerator(&mut self, _enabled: bool) {}

    /// Synthesize speech from the given text at a speed multiplier.
    fn synthesize(&mut self, text: &str, speed: f32) -> Result<SynthesisResult, EngineError>;

    /// Synthesize speech from the given text and write to a WAV file.
    ///
    /// Default implementation calls `synthesize()` then `SynthesisResult::write_wav()`.
    fn synthesize_to_file(
        &mut self,
        text: &str,
        wav_path: &Path,
        speed: f32,
    ) -> Result<(), EngineError> {
        self.synthesize(text, speed)?.write_wav(wav_path)?;
        Ok(())
    }
}
