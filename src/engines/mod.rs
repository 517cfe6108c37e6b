//! Speech synthesis engines.
//!
//! This module contains implementations of [`SynthesisEngine`](crate::SynthesisEngine).
//!
//! # Available Engines
//!
//! - [`command::CommandEngine`] - drives a Piper-compatible synthesizer executable

pub mod command;

pub use command::CommandEngine;

#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),
    #[error("Synthesizer executable '{0}' not found. Install it or point the engine at it.")]
    ExecutableNotFound(String),
    #[error("Model not loaded. Call load_model() first.")]
    ModelNotLoaded,
    #[error("Invalid model config: {0}")]
    Config(String),
    #[error("Synthesizer failed: {0}")]
    Backend(String),
    #[error("Synthesizer temporarily unavailable: {0}")]
    Transient(String),
}

impl EngineError {
    /// True for failures worth retrying (the backend was busy or killed).
    pub fn is_transient(&self) -> bool {
        match self {
            EngineError::Transient(_) => true,
            EngineError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::WouldBlock
                    | std::io::ErrorKind::TimedOut
            ),
            _ => false,
        }
    }
}
