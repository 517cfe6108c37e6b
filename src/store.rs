//! Output directory for generated audio and uploaded documents.
//!
//! There is no index: a file existing in the directory is the only record
//! of an artifact. Artifact ids are file names of the form
//! `{epoch_seconds}_{voice_id}_{token}.wav`; the random token keeps two
//! same-voice requests in the same second from sharing a name.
//!
//! Uploaded documents live in the [`DOCUMENTS_DIR`] subdirectory, outside
//! the playback namespace, and never replace an existing file.

use std::fs::{self, File};
use std::path::{Component, Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::error::NarrationError;
use crate::SynthesisResult;

/// File extension of audio artifacts.
pub const AUDIO_EXTENSION: &str = "wav";

/// Subdirectory of the store holding uploaded source documents.
pub const DOCUMENTS_DIR: &str = "documents";

/// Source of creation timestamps.
pub type Clock = fn() -> SystemTime;

/// A persisted audio file produced by one synthesis call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AudioArtifact {
    /// File name inside the store; the playback key.
    pub id: String,
    pub file_path: PathBuf,
    pub created_at: SystemTime,
    pub voice_id: String,
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
    clock: Clock,
}

impl ArtifactStore {
    /// Use `dir` as the store, creating it if needed.
    pub fn open_dir(dir: impl Into<PathBuf>) -> Result<Self, NarrationError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            clock: SystemTime::now,
        })
    }

    /// Replace the timestamp source.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn set_clock(&mut self, clock: Clock) {
        self.clock = clock;
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write synthesized audio as a new artifact.
    ///
    /// The audio is written to a hidden partial file and renamed into place
    /// once finalized, so the returned path is never observed half-written.
    pub fn persist(
        &self,
        result: &SynthesisResult,
        voice_id: &str,
    ) -> Result<AudioArtifact, NarrationError> {
        let created_at = (self.clock)();
        let id = artifact_name(created_at, voice_id, &uuid::Uuid::new_v4().simple().to_string());
        let file_path = self.dir.join(&id);

        write_atomically(&file_path, |partial| result.write_wav(partial).map_err(Into::into))?;
        log::debug!("Persisted artifact {}", file_path.display());

        Ok(AudioArtifact {
            id,
            file_path,
            created_at,
            voice_id: voice_id.to_string(),
        })
    }

    /// Save an uploaded source document under its own file name.
    ///
    /// Only the final path component of `name` is used. If a document with
    /// that name is already stored, the new one gets a token prefix instead.
    pub fn save_document(&self, name: &str, bytes: &[u8]) -> Result<PathBuf, NarrationError> {
        let file_name = Path::new(name)
            .file_name()
            .and_then(|n| n.to_str())
            .filter(|n| !n.starts_with('.'))
            .unwrap_or("document");
        let documents = self.dir.join(DOCUMENTS_DIR);
        fs::create_dir_all(&documents)?;

        let path = documents.join(file_name);
        match write_new(&path, bytes) {
            Err(NarrationError::Io(e)) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let token = uuid::Uuid::new_v4().simple();
                let path = documents.join(format!("{token}_{file_name}"));
                write_new(&path, bytes)?;
                log::debug!("{file_name} already stored, saved upload as {}", path.display());
                Ok(path)
            }
            written => written.map(|()| path),
        }
    }

    /// Map an artifact id to its file, if it exists.
    pub fn resolve(&self, id: &str) -> Result<PathBuf, NarrationError> {
        if !is_artifact_name(id) {
            return Err(NarrationError::ArtifactNotFound(id.to_string()));
        }
        let path = self.dir.join(id);
        if path.is_file() {
            Ok(path)
        } else {
            Err(NarrationError::ArtifactNotFound(id.to_string()))
        }
    }

    /// Open an artifact for streaming playback.
    pub fn open(&self, id: &str) -> Result<File, NarrationError> {
        let path = self.resolve(id)?;
        File::open(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => NarrationError::ArtifactNotFound(id.to_string()),
            _ => NarrationError::Io(e),
        })
    }

    /// Delete an artifact. Already-missing files are not an error.
    pub fn remove(&self, artifact: &AudioArtifact) -> Result<(), NarrationError> {
        match fs::remove_file(&artifact.file_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn artifact_name(created_at: SystemTime, voice_id: &str, token: &str) -> String {
    let secs = created_at
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    format!("{secs}_{}_{token}.{AUDIO_EXTENSION}", sanitize(voice_id))
}

fn sanitize(voice_id: &str) -> String {
    let cleaned: String = voice_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "voice".to_string()
    } else {
        cleaned
    }
}

/// A single visible file name ending in the audio extension.
fn is_artifact_name(id: &str) -> bool {
    let path = Path::new(id);
    let mut components = path.components();
    let single = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    );
    single
        && !id.starts_with('.')
        && !id.contains(['/', '\\'])
        && path.extension().and_then(|e| e.to_str()) == Some(AUDIO_EXTENSION)
}

fn partial_path(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("artifact");
    path.with_file_name(format!(
        ".{file_name}.{}.partial",
        uuid::Uuid::new_v4().simple()
    ))
}

fn write_atomically(
    path: &Path,
    write: impl FnOnce(&Path) -> Result<(), NarrationError>,
) -> Result<(), NarrationError> {
    let partial = partial_path(path);
    let written = write(&partial).and_then(|()| fs::rename(&partial, path).map_err(Into::into));
    if written.is_err() {
        let _ = fs::remove_file(&partial);
    }
    written
}

/// Like [`write_atomically`], but fails with `AlreadyExists` instead of
/// replacing `path`.
fn write_new(path: &Path, bytes: &[u8]) -> Result<(), NarrationError> {
    let partial = partial_path(path);
    let written = fs::write(&partial, bytes).and_then(|()| fs::hard_link(&partial, path));
    let _ = fs::remove_file(&partial);
    written.map_err(Into::into)
}
