use super::types::{FrameAnnotations, HandoffRequest, InferenceResult};
use crate::error::AppError;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempPath;
use tracing::debug;

/// Reads and writes annotation artifacts.
///
/// Writes always go through a temporary file in the destination directory
/// followed by a rename, so a reader polling for the final name never sees a
/// partial file. Missing directories are reported, never created.
#[derive(Debug, Clone)]
pub struct AnnotationStore {
    temp_dir: PathBuf,
}

impl AnnotationStore {
    pub fn new(temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            temp_dir: temp_dir.into(),
        }
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    /// Loads one frame's annotations. Accepts the bare person mapping or an
    /// object carrying it under `annotations` or `persons`.
    pub fn load_annotations(path: &Path) -> Result<FrameAnnotations, AppError> {
        let value = Self::read_value(path)?;
        let annotations = match &value {
            Value::Object(fields) if fields.contains_key("frame") => fields
                .get("annotations")
                .or_else(|| fields.get("persons"))
                .ok_or_else(|| malformed(path, "missing `annotations` or `persons`"))?,
            _ => &value,
        };
        FrameAnnotations::from_value(annotations).map_err(|e| malformed(path, e.to_string()))
    }

    /// Picks a single frame out of an editor export document
    /// (`{"annotations": {"frame_<N>": {...}}}`). An unannotated frame is empty.
    pub fn load_export_frame(path: &Path, frame: u64) -> Result<FrameAnnotations, AppError> {
        let value = Self::read_value(path)?;
        let frames = value
            .get("annotations")
            .and_then(Value::as_object)
            .ok_or_else(|| malformed(path, "missing `annotations`"))?;
        match frames.get(&format!("frame_{}", frame)) {
            Some(annotations) => FrameAnnotations::from_value(annotations)
                .map_err(|e| malformed(path, e.nested(&format!("frame_{}", frame)).to_string())),
            None => Ok(FrameAnnotations::new()),
        }
    }

    /// Loads a `{frame, predictions}` artifact.
    pub fn load_result(path: &Path) -> Result<InferenceResult, AppError> {
        let value = Self::read_value(path)?;
        for field in ["frame", "predictions"] {
            if value.get(field).is_none() {
                return Err(malformed(path, format!("missing `{}`", field)));
            }
        }
        Self::decode(path, value)
    }

    pub fn load_request(path: &Path) -> Result<HandoffRequest, AppError> {
        let value = Self::read_value(path)?;
        if value.get("frame").is_none() {
            return Err(malformed(path, "missing `frame`"));
        }
        Self::decode(path, value)
    }

    /// Atomically replaces `path` with the JSON form of `data`.
    pub fn save<T: Serialize>(data: &T, path: &Path) -> Result<(), AppError> {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        if !dir.is_dir() {
            return Err(AppError::DirectoryNotFound(dir.to_path_buf()));
        }
        let mut staged = tempfile::Builder::new()
            .prefix(".staged_")
            .suffix(".tmp")
            .tempfile_in(dir)?;
        serde_json::to_writer_pretty(&mut staged, data).map_err(std::io::Error::from)?;
        staged.flush()?;
        staged.as_file().sync_all()?;
        staged.persist(path).map_err(|e| AppError::Io(e.error))?;
        debug!("Saved artifact {}", path.display());
        Ok(())
    }

    /// Writes annotations to a uniquely named file in the temp directory.
    /// The file is removed when the returned guard is dropped.
    pub fn scoped_artifact(
        &self,
        annotations: &FrameAnnotations,
    ) -> Result<ScopedArtifact, AppError> {
        if !self.temp_dir.is_dir() {
            return Err(AppError::DirectoryNotFound(self.temp_dir.clone()));
        }
        let mut file = tempfile::Builder::new()
            .prefix("annotations_")
            .suffix(".json")
            .tempfile_in(&self.temp_dir)?;
        serde_json::to_writer(&mut file, annotations).map_err(std::io::Error::from)?;
        file.flush()?;
        let path = file.into_temp_path();
        debug!("Created scoped artifact {}", path.display());
        Ok(ScopedArtifact { path })
    }

    fn read_value(path: &Path) -> Result<Value, AppError> {
        let bytes = std::fs::read(path)?;
        serde_json::from_slice(&bytes).map_err(|e| malformed(path, e.to_string()))
    }

    fn decode<T: DeserializeOwned>(path: &Path, value: Value) -> Result<T, AppError> {
        serde_json::from_value(value).map_err(|e| malformed(path, e.to_string()))
    }
}

/// A temporary annotation artifact that lives exactly as long as this guard.
#[derive(Debug)]
pub struct ScopedArtifact {
    path: TempPath,
}

impl ScopedArtifact {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn malformed(path: &Path, reason: impl Into<String>) -> AppError {
    AppError::MalformedInput {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}
