//! Voice id → model resolution.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::{NarratorConfig, UnknownVoicePolicy};
use crate::error::NarrationError;

/// A synthesis model and its shared configuration, selected by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VoiceProfile {
    pub id: String,
    pub model_artifact_path: PathBuf,
    pub shared_config_path: PathBuf,
}

/// Read-only table of configured voices.
///
/// Built once from a [`NarratorConfig`]; safe to share between threads
/// without locking.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    profiles: BTreeMap<String, VoiceProfile>,
    default_voice: String,
    unknown_voice: UnknownVoicePolicy,
}

impl ModelRegistry {
    pub fn from_config(config: &NarratorConfig) -> Self {
        let profiles = config
            .voices
            .iter()
            .map(|(id, entry)| {
                let profile = VoiceProfile {
                    id: id.clone(),
                    model_artifact_path: entry.model.clone(),
                    shared_config_path: entry.config.clone(),
                };
                (id.clone(), profile)
            })
            .collect();

        Self {
            profiles,
            default_voice: config.default_voice.clone(),
            unknown_voice: config.unknown_voice,
        }
    }

    /// Resolve a voice id to a profile whose model and config are readable.
    ///
    /// A missing or empty id selects the default voice. An unrecognized id
    /// either falls back to the default or fails, per the configured
    /// [`UnknownVoicePolicy`].
    pub fn resolve(&self, voice_id: Option<&str>) -> Result<&VoiceProfile, NarrationError> {
        let requested = voice_id.map(str::trim).filter(|id| !id.is_empty());

        let profile = match requested {
            None => self.default_profile()?,
            Some(id) => match (self.profiles.get(id), self.unknown_voice) {
                (Some(profile), _) => profile,
                (None, UnknownVoicePolicy::FallbackToDefault) => {
                    log::warn!(
                        "Unknown voice '{id}', falling back to '{}'",
                        self.default_voice
                    );
                    self.default_profile()?
                }
                (None, UnknownVoicePolicy::Reject) => {
                    return Err(NarrationError::UnknownVoice(id.to_string()))
                }
            },
        };

        ensure_readable(&profile.model_artifact_path)?;
        ensure_readable(&profile.shared_config_path)?;
        Ok(profile)
    }

    pub fn get(&self, voice_id: &str) -> Option<&VoiceProfile> {
        self.profiles.get(voice_id)
    }

    /// All configured voice ids in sorted order.
    pub fn list_voices(&self) -> Vec<&str> {
        self.profiles.keys().map(String::as_str).collect()
    }

    pub fn default_voice(&self) -> &str {
        &self.default_voice
    }

    fn default_profile(&self) -> Result<&VoiceProfile, NarrationError> {
        self.profiles
            .get(&self.default_voice)
            .ok_or_else(|| NarrationError::UnknownVoice(self.default_voice.clone()))
    }
}

fn ensure_readable(path: &Path) -> Result<(), NarrationError> {
    let readable = File::open(path)
        .and_then(|file| file.metadata())
        .map(|meta| meta.is_file())
        .unwrap_or(false);

    if readable {
        Ok(())
    } else {
        Err(NarrationError::ResourceMissing(path.to_path_buf()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VoiceEntry;

    fn write_voice(dir: &Path, name: &str) -> VoiceEntry {
        let model = dir.join(format!("{name}.onnx"));
        let config = dir.join("models_config.json");
        std::fs::write(&model, b"weights").unwrap();
        std::fs::write(&config, b"{}").unwrap();
        VoiceEntry::new(model, config)
    }

    fn registry(dir: &Path, policy: UnknownVoicePolicy) -> ModelRegistry {
        let config = NarratorConfig::builder()
            .output_dir(dir.join("results"))
            .voice("base", write_voice(dir, "trump"))
            .voice("juice_wrld", write_voice(dir, "juice-wrld"))
            .unknown_voice(policy)
            .build()
            .unwrap();
        ModelRegistry::from_config(&config)
    }

    #[test]
    fn known_voice_resolves_to_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path(), UnknownVoicePolicy::FallbackToDefault);

        let profile = registry.resolve(Some("juice_wrld")).unwrap();
        assert_eq!(profile.id, "juice_wrld");
        assert!(profile.model_artifact_path.is_file());
        assert!(profile.shared_config_path.is_file());
    }

    #[test]
    fn missing_voice_selects_default() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path(), UnknownVoicePolicy::Reject);

        assert_eq!(registry.resolve(None).unwrap().id, "base");
        assert_eq!(registry.resolve(Some("  ")).unwrap().id, "base");
    }

    #[test]
    fn unknown_voice_falls_back_to_default_under_fallback_policy() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path(), UnknownVoicePolicy::FallbackToDefault);

        assert_eq!(registry.resolve(Some("kanye")).unwrap().id, "base");
    }

    #[test]
    fn unknown_voice_fails_under_reject_policy() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path(), UnknownVoicePolicy::Reject);

        match registry.resolve(Some("kanye")) {
            Err(NarrationError::UnknownVoice(id)) => assert_eq!(id, "kanye"),
            other => panic!("expected UnknownVoice, got {other:?}"),
        }
    }

    #[test]
    fn missing_model_file_is_named_in_error() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path(), UnknownVoicePolicy::Reject);
        let model = dir.path().join("juice-wrld.onnx");
        std::fs::remove_file(&model).unwrap();

        match registry.resolve(Some("juice_wrld")) {
            Err(NarrationError::ResourceMissing(path)) => assert_eq!(path, model),
            other => panic!("expected ResourceMissing, got {other:?}"),
        }
    }

    #[test]
    fn missing_shared_config_is_named_in_error() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path(), UnknownVoicePolicy::Reject);
        let config = dir.path().join("models_config.json");
        std::fs::remove_file(&config).unwrap();

        match registry.resolve(None) {
            Err(NarrationError::ResourceMissing(path)) => assert_eq!(path, config),
            other => panic!("expected ResourceMissing, got {other:?}"),
        }
    }

    #[test]
    fn directory_is_not_a_model_file() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path(), UnknownVoicePolicy::Reject);
        let model = dir.path().join("trump.onnx");
        std::fs::remove_file(&model).unwrap();
        std::fs::create_dir(&model).unwrap();

        assert!(matches!(
            registry.resolve(None),
            Err(NarrationError::ResourceMissing(_))
        ));
    }

    #[test]
    fn lists_voices_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path(), UnknownVoicePolicy::Reject);
        assert_eq!(registry.list_voices(), vec!["base", "juice_wrld"]);
        assert_eq!(registry.default_voice(), "base");
    }
}
