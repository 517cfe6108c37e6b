//! Synthesis through an external Piper-compatible executable.
//!
//! The voice profile's model file is passed as `--model` and its shared
//! config as `--config`. Text is written to the process's stdin and raw
//! 16-bit little-endian mono PCM is read back from stdout (`--output_raw`).
//! The sample rate comes from the config file (`audio.sample_rate`).
//!
//! ```rust,no_run
//! use narrate_rs::engines::CommandEngine;
//! use narrate_rs::SynthesisEngine;
//! # fn run(voice: &narrate_rs::VoiceProfile) -> Result<(), Box<dyn std::error::Error>> {
//! let mut engine = CommandEngine::new().with_accelerator(true);
//! engine.load_model(voice)?;
//! let result = engine.synthesize("Hello, world!", 1.0)?;
//! println!("{:.2}s of audio", result.duration_secs());
//! # Ok(())
//! # }
//! ```

use std::borrow::Cow;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use super::EngineError;
use crate::registry::VoiceProfile;
use crate::{SynthesisEngine, SynthesisResult};

/// Used when the voice config does not declare `audio.sample_rate`.
pub const DEFAULT_SAMPLE_RATE: u32 = 22050;

#[derive(Debug, Clone)]
struct LoadedVoice {
    voice_id: String,
    model: PathBuf,
    config: PathBuf,
    sample_rate: u32,
}

/// Engine that shells out to a synthesizer once per request.
pub struct CommandEngine {
    program: PathBuf,
    leading_args: Vec<String>,
    use_accelerator: bool,
    voice: Option<LoadedVoice>,
}

impl Default for CommandEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandEngine {
    /// Use `piper` from PATH.
    pub fn new() -> Self {
        Self::with_command("piper", Vec::<String>::new())
    }

    /// Use an explicit program, with arguments placed before the voice flags
    /// (e.g. `python3` with `["-m", "piper"]`).
    pub fn with_command(
        program: impl Into<PathBuf>,
        leading_args: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            program: program.into(),
            leading_args: leading_args.into_iter().map(Into::into).collect(),
            use_accelerator: false,
            voice: None,
        }
    }

    /// Ask the synthesizer to run on the GPU (`--cuda`).
    pub fn with_accelerator(mut self, enabled: bool) -> Self {
        self.use_accelerator = enabled;
        self
    }

    fn voice_args(&self, voice: &LoadedVoice, speed: f32) -> Vec<String> {
        let mut args = self.leading_args.clone();
        args.extend([
            "--model".to_string(),
            voice.model.display().to_string(),
            "--config".to_string(),
            voice.config.display().to_string(),
            "--length_scale".to_string(),
            format!("{:.4}", 1.0 / speed),
            "--output_raw".to_string(),
        ]);
        if self.use_accelerator {
            args.push("--cuda".to_string());
        }
        args
    }

    fn run(&self, args: &[String], text: &str) -> Result<Vec<u8>, EngineError> {
        let mut child = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    EngineError::ExecutableNotFound(self.program.display().to_string())
                } else {
                    EngineError::Io(e)
                }
            })?;

        // Audio streams out while text streams in, so feed stdin from its own
        // thread to keep a full stdout pipe from stalling both sides.
        let writer = child.stdin.take().map(|mut stdin| {
            let payload = newline_terminated(text).into_owned();
            std::thread::spawn(move || stdin.write_all(payload.as_bytes()))
        });

        let output = child.wait_with_output()?;

        if let Some(handle) = writer {
            match handle.join() {
                Ok(Ok(())) => {}
                // A synthesizer that exits early closes stdin; its exit
                // status below is the more useful error.
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
                Ok(Err(e)) => return Err(EngineError::Io(e)),
                Err(_) => return Err(EngineError::Backend("stdin writer panicked".to_string())),
            }
        }

        if output.status.success() {
            return Ok(output.stdout);
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        match output.status.code() {
            Some(code) => Err(EngineError::Backend(format!(
                "{} exited with code {code}: {}",
                self.program.display(),
                stderr.trim()
            ))),
            None => Err(EngineError::Transient(format!(
                "{} was terminated by a signal",
                self.program.display()
            ))),
        }
    }
}

impl SynthesisEngine for CommandEngine {
    fn load_model(&mut self, voice: &VoiceProfile) -> Result<(), EngineError> {
        let sample_rate = read_sample_rate(&voice.shared_config_path)?;
        log::info!(
            "Loaded voice '{}' from {} ({} Hz)",
            voice.id,
            voice.model_artifact_path.display(),
            sample_rate
        );
        self.voice = Some(LoadedVoice {
            voice_id: voice.id.clone(),
            model: voice.model_artifact_path.clone(),
            config: voice.shared_config_path.clone(),
            sample_rate,
        });
        Ok(())
    }

    fn unload_model(&mut self) {
        self.voice = None;
    }

    fn loaded_voice(&self) -> Option<&str> {
        self.voice.as_ref().map(|v| v.voice_id.as_str())
    }

    fn set_accelerator(&mut self, enabled: bool) {
        self.use_accelerator = enabled;
    }

    fn synthesize(&mut self, text: &str, speed: f32) -> Result<SynthesisResult, EngineError> {
        let voice = self.voice.as_ref().ok_or(EngineError::ModelNotLoaded)?;
        let args = self.voice_args(voice, speed);
        let raw = self.run(&args, text)?;

        if raw.len() % 2 != 0 {
            log::warn!("Synthesizer emitted an odd number of PCM bytes, dropping the last one");
        }

        Ok(SynthesisResult {
            samples: pcm16_le_to_f32(&raw),
            sample_rate: voice.sample_rate,
        })
    }
}

/// Read `audio.sample_rate` from a voice config JSON file.
fn read_sample_rate(config_path: &Path) -> Result<u32, EngineError> {
    let content = std::fs::read_to_string(config_path)?;
    let json: serde_json::Value = serde_json::from_str(&content)
        .map_err(|e| EngineError::Config(format!("Failed to parse JSON: {e}")))?;

    match json.get("audio").and_then(|a| a.get("sample_rate")) {
        None => {
            log::warn!(
                "{} has no audio.sample_rate, assuming {DEFAULT_SAMPLE_RATE} Hz",
                config_path.display()
            );
            Ok(DEFAULT_SAMPLE_RATE)
        }
        Some(value) => value
            .as_u64()
            .and_then(|rate| u32::try_from(rate).ok())
            .filter(|&rate| rate > 0)
            .ok_or_else(|| EngineError::Config(format!("Invalid audio.sample_rate: {value}"))),
    }
}

fn pcm16_le_to_f32(raw: &[u8]) -> Vec<f32> {
    raw.chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
        .collect()
}

fn newline_terminated(text: &str) -> Cow<'_, str> {
    if text.ends_with('\n') {
        Cow::Borrowed(text)
    } else {
        Cow::Owned(format!("{text}\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(dir: &Path, config_json: &str) -> VoiceProfile {
        let model = dir.join("voice.onnx");
        let config = dir.join("voice.onnx.json");
        std::fs::write(&model, b"model").unwrap();
        std::fs::write(&config, config_json).unwrap();
        VoiceProfile {
            id: "base".to_string(),
            model_artifact_path: model,
            shared_config_path: config,
        }
    }

    fn shell_engine(script: &str) -> CommandEngine {
        CommandEngine::with_command("sh", ["-c", script, "piper"])
    }

    #[test]
    fn reads_sample_rate_from_voice_config() {
        let dir = tempfile::tempdir().unwrap();
        let voice = profile(dir.path(), r#"{"audio": {"sample_rate": 16000}}"#);
        assert_eq!(read_sample_rate(&voice.shared_config_path).unwrap(), 16000);
    }

    #[test]
    fn missing_sample_rate_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let voice = profile(dir.path(), r#"{"num_speakers": 1}"#);
        assert_eq!(
            read_sample_rate(&voice.shared_config_path).unwrap(),
            DEFAULT_SAMPLE_RATE
        );
    }

    #[test]
    fn malformed_voice_config_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let voice = profile(dir.path(), "not json");
        let mut engine = CommandEngine::new();
        assert!(matches!(
            engine.load_model(&voice),
            Err(EngineError::Config(_))
        ));
        assert_eq!(engine.loaded_voice(), None);
    }

    #[test]
    fn converts_pcm16_to_unit_floats() {
        let samples = pcm16_le_to_f32(&[0x00, 0x40, 0x00, 0xC0, 0xFF]);
        assert_eq!(samples, vec![0.5, -0.5]);
    }

    #[test]
    fn speed_maps_to_length_scale_and_accelerator_to_cuda() {
        let engine = CommandEngine::new().with_accelerator(true);
        let voice = LoadedVoice {
            voice_id: "base".to_string(),
            model: PathBuf::from("m.onnx"),
            config: PathBuf::from("m.onnx.json"),
            sample_rate: DEFAULT_SAMPLE_RATE,
        };
        let args = engine.voice_args(&voice, 2.0);
        let scale = args.iter().position(|a| a == "--length_scale").unwrap();
        assert_eq!(args[scale + 1], "0.5000");
        assert_eq!(args.last().map(String::as_str), Some("--cuda"));
    }

    #[test]
    fn accelerator_can_be_toggled_through_the_engine_trait() {
        let voice = LoadedVoice {
            voice_id: "base".to_string(),
            model: PathBuf::from("m.onnx"),
            config: PathBuf::from("m.onnx.json"),
            sample_rate: DEFAULT_SAMPLE_RATE,
        };
        let mut engine = CommandEngine::new();
        assert!(!engine.voice_args(&voice, 1.0).contains(&"--cuda".to_string()));

        engine.set_accelerator(true);
        assert!(engine.voice_args(&voice, 1.0).contains(&"--cuda".to_string()));
    }

    #[test]
    fn synthesize_requires_loaded_model() {
        let mut engine = CommandEngine::new();
        assert!(matches!(
            engine.synthesize("Hello", 1.0),
            Err(EngineError::ModelNotLoaded)
        ));
    }

    #[test]
    fn missing_executable_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let voice = profile(dir.path(), "{}");
        let mut engine =
            CommandEngine::with_command("narrate-rs-no-such-synth", Vec::<String>::new());
        engine.load_model(&voice).unwrap();
        assert!(matches!(
            engine.synthesize("Hello", 1.0),
            Err(EngineError::ExecutableNotFound(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn reads_raw_pcm_from_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let voice = profile(dir.path(), r#"{"audio": {"sample_rate": 2}}"#);
        let mut engine = shell_engine(r"cat > /dev/null; printf '\000\100\000\300'");
        engine.load_model(&voice).unwrap();

        let result = engine.synthesize("Hello world", 1.0).unwrap();
        assert_eq!(result.samples, vec![0.5, -0.5]);
        assert_eq!(result.sample_rate, 2);
        assert!((result.duration_secs() - 1.0).abs() < 1e-9);
    }

    #[cfg(unix)]
    #[test]
    fn nonzero_exit_is_a_backend_failure_with_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let voice = profile(dir.path(), "{}");
        let mut engine = shell_engine(r#"cat > /dev/null; echo "$@" >&2; exit 3"#);
        engine.load_model(&voice).unwrap();

        match engine.synthesize("Hello", 2.0) {
            Err(EngineError::Backend(msg)) => {
                assert!(msg.contains("code 3"), "{msg}");
                assert!(msg.contains("--length_scale 0.5000"), "{msg}");
            }
            other => panic!("expected backend failure, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn killed_synthesizer_is_transient() {
        let dir = tempfile::tempdir().unwrap();
        let voice = profile(dir.path(), "{}");
        let mut engine = shell_engine("kill -9 $$");
        engine.load_model(&voice).unwrap();

        let err = engine.synthesize("Hello", 1.0).unwrap_err();
        assert!(err.is_transient(), "{err:?}");
    }

    #[test]
    fn stdin_payload_is_newline_terminated() {
        assert_eq!(newline_terminated("Hello"), "Hello\n");
        assert_eq!(newline_terminated("Hello\n"), "Hello\n");
    }
}
