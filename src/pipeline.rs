//! Request coordinator: extraction → synthesis → timing → response.
//!
//! Stages run strictly in order on the caller's thread. A request either
//! completes with audio *and* timing, or fails with the stage that broke;
//! an artifact written for a request that later fails is deleted.

use std::fs::File;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::NarratorConfig;
use crate::error::{NarrationError, PipelineError, Stage};
use crate::extract::{DocumentExtractor, TextExtractor};
use crate::registry::ModelRegistry;
use crate::store::{ArtifactStore, AudioArtifact, Clock};
use crate::synthesis::SynthesisOrchestrator;
use crate::timing::{split_words, TimingEstimator, TimingSchedule};
use crate::SynthesisEngine;

/// One narration request, independent of transport.
#[derive(Debug, Clone)]
pub struct NarrationRequest {
    pub document: Vec<u8>,
    /// Original upload name; when set the document is kept in the store's documents folder.
    pub document_name: Option<String>,
    pub voice: Option<String>,
    pub speed: f32,
}

impl NarrationRequest {
    pub fn new(document: impl Into<Vec<u8>>) -> Self {
        Self {
            document: document.into(),
            document_name: None,
            voice: None,
            speed: 1.0,
        }
    }

    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = Some(voice.into());
        self
    }

    pub fn with_speed(mut self, speed: f32) -> Self {
        self.speed = speed;
        self
    }

    pub fn with_document_name(mut self, name: impl Into<String>) -> Self {
        self.document_name = Some(name.into());
        self
    }
}

/// What the client needs to play the audio and highlight along.
#[derive(Debug, Clone, Serialize)]
pub struct NarrationResponse {
    pub words: Vec<String>,
    pub word_timing_seconds: f64,
    pub audio_artifact_id: String,
    pub voice_id: String,
    pub timing: TimingSchedule,
    #[serde(skip)]
    pub artifact: AudioArtifact,
}

/// Lifecycle of one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Received,
    Extracted,
    Synthesized,
    TimingComputed,
    Completed,
    Failed(Stage),
}

impl PipelineState {
    pub fn is_terminal(self) -> bool {
        matches!(self, PipelineState::Completed | PipelineState::Failed(_))
    }

    /// The stage that moves a request out of this state.
    pub fn next_stage(self) -> Option<Stage> {
        match self {
            PipelineState::Received => Some(Stage::Extraction),
            PipelineState::Extracted => Some(Stage::Synthesis),
            PipelineState::Synthesized => Some(Stage::Timing),
            _ => None,
        }
    }

    /// State after the pending step succeeds. Terminal states stay put.
    pub fn advance(self) -> Self {
        match self {
            PipelineState::Received => PipelineState::Extracted,
            PipelineState::Extracted => PipelineState::Synthesized,
            PipelineState::Synthesized => PipelineState::TimingComputed,
            PipelineState::TimingComputed => PipelineState::Completed,
            terminal => terminal,
        }
    }

    /// State after `stage` fails. Terminal states stay put.
    pub fn fail(self, stage: Stage) -> Self {
        if self.is_terminal() {
            self
        } else {
            PipelineState::Failed(stage)
        }
    }
}

struct RequestRun {
    state: PipelineState,
    started: Instant,
    timeout: Option<Duration>,
}

impl RequestRun {
    fn new(timeout: Option<Duration>) -> Self {
        Self {
            state: PipelineState::Received,
            started: Instant::now(),
            timeout,
        }
    }

    fn deadline(&self) -> Option<Instant> {
        self.timeout.map(|t| self.started + t)
    }

    fn check_deadline(&self) -> Result<(), NarrationError> {
        match self.timeout {
            Some(timeout) if self.started.elapsed() >= timeout => {
                Err(NarrationError::TimedOut(timeout))
            }
            _ => Ok(()),
        }
    }

    /// Run one stage, moving to the next state or to `Failed(stage)`.
    ///
    /// The deadline is checked on entry and again once `run` returns, so a
    /// stage that overruns is the one reported. An output produced too late
    /// is handed to `discard`.
    fn stage<T>(
        &mut self,
        stage: Stage,
        run: impl FnOnce() -> Result<T, NarrationError>,
        discard: impl FnOnce(T),
    ) -> Result<T, PipelineError> {
        let value = match self.check_deadline().and_then(|()| run()) {
            Ok(value) => value,
            Err(cause) => return Err(self.failed(stage, cause)),
        };
        if let Err(cause) = self.check_deadline() {
            discard(value);
            return Err(self.failed(stage, cause));
        }
        self.transition(self.state.advance());
        Ok(value)
    }

    /// Final deadline check before handing back a result.
    fn complete(&mut self) -> Result<(), PipelineError> {
        match self.check_deadline() {
            Ok(()) => {
                self.transition(self.state.advance());
                Ok(())
            }
            Err(cause) => Err(self.failed(Stage::Timing, cause)),
        }
    }

    fn failed(&mut self, stage: Stage, cause: NarrationError) -> PipelineError {
        self.transition(self.state.fail(stage));
        let err = PipelineError::new(stage, cause);
        log::error!("Narration failed after {:.2?}: {err}", self.started.elapsed());
        err
    }

    fn transition(&mut self, next: PipelineState) {
        log::debug!("{:?} -> {:?}", self.state, next);
        self.state = next;
    }
}

/// Coordinates the narration stages for any number of concurrent requests.
///
/// Share it behind an `Arc`; the engine is the only state guarded by a lock.
pub struct NarrationPipeline<E> {
    registry: ModelRegistry,
    extractor: Box<dyn TextExtractor>,
    orchestrator: SynthesisOrchestrator<E>,
    estimator: TimingEstimator,
    synthesis_attempts: u32,
    retry_backoff: Duration,
    request_timeout: Option<Duration>,
}

impl<E: SynthesisEngine> NarrationPipeline<E> {
    /// Build the pipeline, creating the output directory if needed.
    ///
    /// The engine's accelerator setting follows `config.use_accelerator`.
    pub fn new(config: NarratorConfig, mut engine: E) -> Result<Self, NarrationError> {
        config.validate()?;
        let store = ArtifactStore::open_dir(&config.output_dir)?;
        engine.set_accelerator(config.use_accelerator);
        log::info!(
            "Narration pipeline ready: {} voices, default '{}', accelerator {}, output {}",
            config.voices.len(),
            config.default_voice,
            if config.use_accelerator { "on" } else { "off" },
            store.dir().display()
        );

        Ok(Self {
            registry: ModelRegistry::from_config(&config),
            extractor: Box::new(DocumentExtractor),
            orchestrator: SynthesisOrchestrator::new(engine, store),
            estimator: TimingEstimator::new(),
            synthesis_attempts: config.synthesis_attempts,
            retry_backoff: config.retry_backoff(),
            request_timeout: config.request_timeout(),
        })
    }

    /// Replace the default document extractor.
    pub fn with_extractor(mut self, extractor: impl TextExtractor + 'static) -> Self {
        self.extractor = Box::new(extractor);
        self
    }

    /// Replace the artifact timestamp source.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.orchestrator.store_mut().set_clock(clock);
        self
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn store(&self) -> &ArtifactStore {
        self.orchestrator.store()
    }

    /// Narrate one document.
    pub fn narrate(&self, request: NarrationRequest) -> Result<NarrationResponse, PipelineError> {
        let mut run = RequestRun::new(self.request_timeout);
        let deadline = run.deadline();

        let (text, words) = run.stage(Stage::Extraction, || self.extract(&request), drop)?;

        let artifact = run.stage(
            Stage::Synthesis,
            || self.synthesize(&text, request.voice.as_deref(), request.speed, deadline),
            |artifact| self.release(&artifact),
        )?;

        let timing = run
            .stage(
                Stage::Timing,
                || self.estimator.estimate(&artifact, words.len()),
                drop,
            )
            .and_then(|timing| run.complete().map(|()| timing))
            .map_err(|err| {
                self.release(&artifact);
                err
            })?;

        log::info!(
            "Total processing time: {:.2?} ({} words, {:.3}s per word)",
            run.started.elapsed(),
            timing.word_count,
            timing.per_word_seconds
        );

        Ok(NarrationResponse {
            words,
            word_timing_seconds: timing.per_word_seconds,
            audio_artifact_id: artifact.id.clone(),
            voice_id: artifact.voice_id.clone(),
            timing,
            artifact,
        })
    }

    /// Open a finished narration for inline playback.
    pub fn playback(&self, artifact_id: &str) -> Result<File, NarrationError> {
        self.store().open(artifact_id)
    }

    fn extract(&self, request: &NarrationRequest) -> Result<(String, Vec<String>), NarrationError> {
        let start = Instant::now();

        if let Some(name) = &request.document_name {
            let saved = self.store().save_document(name, &request.document)?;
            log::debug!("Saved upload to {}", saved.display());
        }

        let text = self.extractor.extract_text(&request.document)?;
        let words = split_words(&text);
        log::info!(
            "Text extraction completed in {:.2?} ({} words)",
            start.elapsed(),
            words.len()
        );

        if words.is_empty() {
            return Err(NarrationError::EmptyContent);
        }
        Ok((text, words))
    }

    /// Resolve the voice and synthesize, retrying transient engine failures
    /// with exponential backoff while attempts and time remain.
    fn synthesize(
        &self,
        text: &str,
        voice_id: Option<&str>,
        speed: f32,
        deadline: Option<Instant>,
    ) -> Result<AudioArtifact, NarrationError> {
        let voice = self.registry.resolve(voice_id)?;

        let mut attempt = 1;
        loop {
            match self.orchestrator.synthesize(text, voice, speed) {
                Err(err) if err.is_transient() && attempt < self.synthesis_attempts => {
                    let backoff = self
                        .retry_backoff
                        .saturating_mul(2u32.saturating_pow(attempt - 1));
                    let resume_at = Instant::now().checked_add(backoff);
                    if deadline.is_some_and(|d| resume_at.map_or(true, |t| t >= d)) {
                        return Err(err);
                    }
                    log::warn!(
                        "Synthesis attempt {attempt}/{} failed ({err}), retrying in {backoff:?}",
                        self.synthesis_attempts
                    );
                    std::thread::sleep(backoff);
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    fn release(&self, artifact: &AudioArtifact) {
        if let Err(e) = self.store().remove(artifact) {
            log::warn!("Failed to remove abandoned artifact {}: {e}", artifact.id);
        }
    }
}
