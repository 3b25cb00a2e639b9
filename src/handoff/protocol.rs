use crate::annotation::{AnnotationStore, HandoffRequest, InferenceResult};
use crate::error::AppError;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

const REQUEST_PREFIX: &str = "gt4frame_";
const RESPONSE_PREFIX: &str = "anno4frame_";
const ARTIFACT_SUFFIX: &str = ".json";

pub fn request_file_name(frame: u64) -> String {
    format!("{}{}{}", REQUEST_PREFIX, frame, ARTIFACT_SUFFIX)
}

pub fn response_file_name(frame: u64) -> String {
    format!("{}{}{}", RESPONSE_PREFIX, frame, ARTIFACT_SUFFIX)
}

/// Frame index of a `gt4frame_<N>.json` name.
pub fn parse_request_file_name(name: &str) -> Option<u64> {
    name.strip_prefix(REQUEST_PREFIX)?
        .strip_suffix(ARTIFACT_SUFFIX)?
        .parse()
        .ok()
}

/// What the shared directory says about one frame.
#[derive(Debug, Clone, PartialEq)]
pub enum HandoffState {
    /// Neither artifact exists.
    Idle,
    /// A request is waiting for the worker.
    Requested,
    /// A response exists but carries another frame's predictions.
    Stale { found: u64 },
    /// A response for this frame is visible.
    Completed(InferenceResult),
}

impl HandoffState {
    pub fn is_completed(&self) -> bool {
        matches!(self, HandoffState::Completed(_))
    }
}

/// The directory shared between the gateway and a handoff worker.
///
/// Both sides write through [`AnnotationStore::save`], so an artifact that is
/// visible under its final name is always complete.
#[derive(Debug, Clone)]
pub struct HandoffDirectory {
    root: PathBuf,
}

impl HandoffDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn request_path(&self, frame: u64) -> PathBuf {
        self.root.join(request_file_name(frame))
    }

    pub fn response_path(&self, frame: u64) -> PathBuf {
        self.root.join(response_file_name(frame))
    }

    pub fn write_request(&self, request: &HandoffRequest) -> Result<PathBuf, AppError> {
        let path = self.request_path(request.frame);
        AnnotationStore::save(request, &path)?;
        Ok(path)
    }

    pub fn write_response(&self, result: &InferenceResult) -> Result<PathBuf, AppError> {
        let path = self.response_path(result.frame);
        AnnotationStore::save(result, &path)?;
        Ok(path)
    }

    pub fn load_request(&self, frame: u64) -> Result<HandoffRequest, AppError> {
        AnnotationStore::load_request(&self.request_path(frame))
    }

    pub fn observe(&self, frame: u64) -> Result<HandoffState, AppError> {
        let response = self.response_path(frame);
        if response.exists() {
            let result = AnnotationStore::load_result(&response)?;
            if result.frame != frame {
                return Ok(HandoffState::Stale {
                    found: result.frame,
                });
            }
            return Ok(HandoffState::Completed(result));
        }
        if self.request_path(frame).exists() {
            Ok(HandoffState::Requested)
        } else {
            Ok(HandoffState::Idle)
        }
    }

    /// Removes a served request. Already gone is fine.
    pub fn remove_request(&self, frame: u64) -> Result<(), AppError> {
        remove_if_present(&self.request_path(frame))
    }

    /// Removes the response left from an earlier request for `frame`.
    pub fn remove_response(&self, frame: u64) -> Result<(), AppError> {
        remove_if_present(&self.response_path(frame))
    }

    /// Frames that have a request but no valid response, lowest first.
    pub fn pending_requests(&self) -> Result<Vec<u64>, AppError> {
        if !self.root.is_dir() {
            return Err(AppError::DirectoryNotFound(self.root.clone()));
        }
        let mut frames = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            let Some(frame) = entry.file_name().to_str().and_then(parse_request_file_name) else {
                continue;
            };
            match self.observe(frame) {
                Ok(HandoffState::Completed(_)) => {}
                // A broken response is redone, not left for the gateway to trip over.
                Ok(_) | Err(AppError::MalformedInput { .. }) => frames.push(frame),
                Err(e) => return Err(e),
            }
        }
        frames.sort_unstable();
        Ok(frames)
    }
}

fn remove_if_present(path: &Path) -> Result<(), AppError> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
        _ => Ok(()),
    }
}
