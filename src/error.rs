use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::engines::EngineError;
use crate::extract::ExtractError;

/// Errors raised by the narration stages.
#[derive(thiserror::Error, Debug)]
pub enum NarrationError {
    #[error("Model resource missing or unreadable: {}", .0.display())]
    ResourceMissing(PathBuf),
    #[error("Voice '{0}' is not recognized")]
    UnknownVoice(String),
    #[error("Text extraction failed: {0}")]
    ExtractionFailed(#[from] ExtractError),
    #[error("Document contains no readable words")]
    EmptyContent,
    #[error("Synthesis failed: {0}")]
    SynthesisFailed(#[from] EngineError),
    #[error("Timing requires at least one word")]
    InvalidWordCount,
    #[error("Audio artifact '{0}' not found")]
    ArtifactNotFound(String),
    #[error("Invalid speed {0}: must be a positive, finite multiplier")]
    InvalidSpeed(f32),
    #[error("WAV file error: {0}")]
    Audio(#[from] hound::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("Request exceeded its {0:?} deadline")]
    TimedOut(Duration),
}

impl NarrationError {
    /// True if a retry of the same synthesis call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, NarrationError::SynthesisFailed(e) if e.is_transient())
    }
}

/// A pipeline stage, each with its own failure domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Extraction,
    Synthesis,
    Timing,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Extraction => "extraction",
            Stage::Synthesis => "synthesis",
            Stage::Timing => "timing",
        };
        f.write_str(name)
    }
}

/// A failed narration request: the stage that failed and why.
#[derive(thiserror::Error, Debug)]
#[error("{stage} stage failed: {cause}")]
pub struct PipelineError {
    pub stage: Stage,
    #[source]
    pub cause: NarrationError,
}

impl PipelineError {
    pub fn new(stage: Stage, cause: NarrationError) -> Self {
        Self { stage, cause }
    }

    /// The message shown to the caller. Internal detail stays in the log.
    pub fn user_message(&self) -> String {
        match &self.cause {
            NarrationError::ResourceMissing(path) => {
                format!("Voice model is unavailable: {}", path.display())
            }
            NarrationError::UnknownVoice(id) => format!("Unknown voice '{id}'"),
            NarrationError::ExtractionFailed(_) => {
                "The document could not be read".to_string()
            }
            NarrationError::EmptyContent => "The document contains no readable text".to_string(),
            NarrationError::InvalidSpeed(speed) => {
                format!("Speed {speed} is invalid; use a positive multiplier")
            }
            NarrationError::TimedOut(_) => "The request took too long and was aborted".to_string(),
            NarrationError::ArtifactNotFound(id) => format!("Audio '{id}' not found"),
            _ => "Narration failed due to an internal error".to_string(),
        }
    }

    /// True if the failure was caused by the request rather than the server.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self.cause,
            NarrationError::UnknownVoice(_)
                | NarrationError::ExtractionFailed(_)
                | NarrationError::EmptyContent
                | NarrationError::InvalidSpeed(_)
                | NarrationError::ArtifactNotFound(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_error_names_stage_and_cause() {
        let err = PipelineError::new(Stage::Extraction, NarrationError::EmptyContent);
        assert_eq!(
            err.to_string(),
            "extraction stage failed: Document contains no readable words"
        );
        assert!(err.is_client_error());
    }

    #[test]
    fn missing_resource_message_names_path() {
        let err = PipelineError::new(
            Stage::Synthesis,
            NarrationError::ResourceMissing(PathBuf::from("/models/base.onnx")),
        );
        assert!(err.user_message().contains("/models/base.onnx"));
        assert!(!err.is_client_error());
    }

    #[test]
    fn only_transient_engine_failures_are_retryable() {
        let transient = NarrationError::SynthesisFailed(EngineError::Transient("busy".into()));
        let fatal = NarrationError::SynthesisFailed(EngineError::Backend("bad input".into()));
        assert!(transient.is_transient());
        assert!(!fatal.is_transient());
        assert!(!NarrationError::EmptyContent.is_transient());
    }
}
