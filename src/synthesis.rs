//! One synthesis call per request, persisted as an artifact.
//!
//! The engine is the process-wide scarce resource (one model in memory,
//! possibly one GPU), so every call goes through a single mutex: requests
//! queue for the engine but write their artifacts independently.

use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

use crate::engines::EngineError;
use crate::error::NarrationError;
use crate::registry::VoiceProfile;
use crate::store::{ArtifactStore, AudioArtifact};
use crate::SynthesisEngine;

pub struct SynthesisOrchestrator<E> {
    engine: Mutex<E>,
    store: ArtifactStore,
}

impl<E: SynthesisEngine> SynthesisOrchestrator<E> {
    pub fn new(engine: E, store: ArtifactStore) -> Self {
        Self {
            engine: Mutex::new(engine),
            store,
        }
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut ArtifactStore {
        &mut self.store
    }

    /// Narrate `text` with an already-resolved voice and persist the audio.
    ///
    /// The engine is invoked exactly once with the full text. No retries
    /// happen here.
    pub fn synthesize(
        &self,
        text: &str,
        voice: &VoiceProfile,
        speed: f32,
    ) -> Result<AudioArtifact, NarrationError> {
        if text.trim().is_empty() {
            return Err(NarrationError::EmptyContent);
        }
        if !(speed.is_finite() && speed > 0.0) {
            return Err(NarrationError::InvalidSpeed(speed));
        }

        let start = Instant::now();
        let result = {
            let mut engine = self.lock_engine();
            let queued = start.elapsed();

            if engine.loaded_voice() != Some(voice.id.as_str()) {
                engine.load_model(voice)?;
            }

            log::info!(
                "Starting synthesis with voice '{}' at speed {speed} (queued {queued:.2?})",
                voice.id
            );
            engine.synthesize(text, speed)?
        };

        if result.samples.is_empty() {
            return Err(EngineError::Backend("synthesizer produced no audio".to_string()).into());
        }

        let artifact = self.store.persist(&result, &voice.id)?;
        log::info!(
            "Synthesis completed in {:.2?}: {} ({:.2}s of audio)",
            start.elapsed(),
            artifact.id,
            result.duration_secs()
        );
        Ok(artifact)
    }

    /// Take the engine back, e.g. to unload it on shutdown.
    pub fn into_engine(self) -> E {
        self.engine
            .into_inner()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn lock_engine(&self) -> MutexGuard<'_, E> {
        match self.engine.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                // A panic mid-call may have left a half-loaded model behind.
                log::warn!("Synthesis engine lock was poisoned, reloading model on next use");
                let mut guard = poisoned.into_inner();
                guard.unload_model();
                self.engine.clear_poison();
                guard
            }
        }
    }
}
