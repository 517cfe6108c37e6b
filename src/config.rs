//! Process-wide narration settings.
//!
//! A [`NarratorConfig`] is built once at startup, either through
//! [`NarratorConfigBuilder`] or from a JSON file, and handed to the
//! pipeline. It is never mutated afterwards.
//!
//! ```json
//! {
//!   "output_dir": "results",
//!   "default_voice": "base",
//!   "voices": {
//!     "base": { "model": "models/base.onnx", "config": "models/models_config.json" },
//!     "juice_wrld": { "model": "models/juice-wrld.onnx", "config": "models/models_config.json" }
//!   },
//!   "use_accelerator": false,
//!   "unknown_voice": "fallback_to_default"
//! }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

use crate::error::NarrationError;

/// Voice used when a request names none.
pub const DEFAULT_VOICE: &str = "base";

/// Model artifact and shared configuration for one voice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceEntry {
    pub model: PathBuf,
    pub config: PathBuf,
}

impl VoiceEntry {
    pub fn new(model: impl Into<PathBuf>, config: impl Into<PathBuf>) -> Self {
        Self {
            model: model.into(),
            config: config.into(),
        }
    }
}

/// What to do with a voice id that is not configured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownVoicePolicy {
    /// Narrate with the default voice and log a warning.
    #[default]
    FallbackToDefault,
    /// Fail the request with [`NarrationError::UnknownVoice`].
    Reject,
}

#[derive(Debug, Clone, PartialEq, Builder, Serialize, Deserialize)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct NarratorConfig {
    /// Directory holding uploaded documents and generated audio.
    pub output_dir: PathBuf,
    #[builder(default = "DEFAULT_VOICE.to_string()")]
    #[serde(default = "default_voice")]
    pub default_voice: String,
    #[builder(default)]
    #[serde(default)]
    pub voices: BTreeMap<String, VoiceEntry>,
    #[builder(default)]
    #[serde(default)]
    pub use_accelerator: bool,
    #[builder(default)]
    #[serde(default)]
    pub unknown_voice: UnknownVoicePolicy,
    /// Total synthesis attempts per request; 1 disables retries.
    #[builder(default = "1")]
    #[serde(default = "default_attempts")]
    pub synthesis_attempts: u32,
    #[builder(default = "500")]
    #[serde(default = "default_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[builder(default)]
    #[serde(default)]
    pub request_timeout_secs: Option<f64>,
}

fn default_voice() -> String {
    DEFAULT_VOICE.to_string()
}

fn default_attempts() -> u32 {
    1
}

fn default_backoff_ms() -> u64 {
    500
}

impl NarratorConfigBuilder {
    /// Register a voice.
    pub fn voice(&mut self, id: impl Into<String>, entry: VoiceEntry) -> &mut Self {
        self.voices
            .get_or_insert_with(BTreeMap::new)
            .insert(id.into(), entry);
        self
    }

    fn validate(&self) -> Result<(), String> {
        let empty = BTreeMap::new();
        check(
            self.default_voice.as_deref().unwrap_or(DEFAULT_VOICE),
            self.voices.as_ref().unwrap_or(&empty),
            self.synthesis_attempts.unwrap_or(1),
            self.request_timeout_secs.flatten(),
        )
    }
}

impl NarratorConfig {
    pub fn builder() -> NarratorConfigBuilder {
        NarratorConfigBuilder::default()
    }

    /// Load a JSON config file. Relative paths inside it are resolved
    /// against the file's directory.
    pub fn from_json_file(path: &Path) -> Result<Self, NarrationError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: NarratorConfig = serde_json::from_str(&content)
            .map_err(|e| NarrationError::Config(format!("{}: {e}", path.display())))?;

        if let Some(base) = path.parent() {
            config.resolve_relative(base);
        }
        config.validate()?;
        log::info!(
            "Loaded config from {} ({} voices)",
            path.display(),
            config.voices.len()
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), NarrationError> {
        check(
            &self.default_voice,
            &self.voices,
            self.synthesis_attempts,
            self.request_timeout_secs,
        )
        .map_err(NarrationError::Config)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs_f64)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    fn resolve_relative(&mut self, base: &Path) {
        let join = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        join(&mut self.output_dir);
        for entry in self.voices.values_mut() {
            join(&mut entry.model);
            join(&mut entry.config);
        }
    }
}

fn check(
    default_voice: &str,
    voices: &BTreeMap<String, VoiceEntry>,
    attempts: u32,
    timeout_secs: Option<f64>,
) -> Result<(), String> {
    if !voices.contains_key(default_voice) {
        return Err(format!(
            "default voice '{default_voice}' is not among the configured voices"
        ));
    }
    if attempts == 0 {
        return Err("synthesis_attempts must be at least 1".to_string());
    }
    if let Some(secs) = timeout_secs {
        if !(secs.is_finite() && secs > 0.0) {
            return Err(format!("request_timeout_secs must be positive, got {secs}"));
        }
    }
    Ok(())
}
