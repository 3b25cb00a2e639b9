use crate::annotation::{AnnotationStore, FrameAnnotations};
use crate::error::AppError;
use crate::propagation::{MotionHistory, PropagationEngine};
use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use tracing::{debug, warn};

/// One unit of work handed to an engine backend.
#[derive(Debug, Clone, Copy)]
pub struct EngineJob<'a> {
    pub video_reference: &'a str,
    pub frame_number: u64,
    /// Scoped artifact holding the caller's annotations, if any were sent.
    pub annotations_path: Option<&'a Path>,
}

impl EngineJob<'_> {
    /// The annotations behind `annotations_path`, or an empty frame.
    pub fn load_annotations(&self) -> Result<FrameAnnotations, AppError> {
        match self.annotations_path {
            Some(path) => AnnotationStore::load_annotations(path),
            None => Ok(FrameAnnotations::new()),
        }
    }
}

/// What an engine produced. Output that is not JSON is kept as text.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineOutput {
    Structured(Value),
    Raw(String),
}

impl EngineOutput {
    pub fn from_text(text: String) -> Self {
        match serde_json::from_str::<Value>(&text) {
            Ok(value) => EngineOutput::Structured(value),
            Err(_) => EngineOutput::Raw(text),
        }
    }
}

/// Where the gateway sends work. Implementations must report engine failures
/// as errors, never as an empty success.
#[async_trait]
pub trait EngineBackend: Send + Sync {
    async fn infer(&self, job: EngineJob<'_>) -> Result<EngineOutput, AppError>;
    fn name(&self) -> &'static str;
}

/// Runs the propagation engine inside the gateway's process.
#[derive(Clone)]
pub struct InProcessBackend {
    engine: PropagationEngine,
    history: Arc<MotionHistory>,
}

impl InProcessBackend {
    pub fn new(engine: PropagationEngine) -> Self {
        Self {
            engine,
            history: Arc::new(MotionHistory::new()),
        }
    }
}

#[async_trait]
impl EngineBackend for InProcessBackend {
    async fn infer(&self, job: EngineJob<'_>) -> Result<EngineOutput, AppError> {
        let annotations = job.load_annotations()?;
        let previous = self.history.before(job.video_reference, job.frame_number);
        let next =
            self.engine
                .propagate_with_history(job.frame_number, &annotations, previous.as_ref())?;
        self.history.record(job.video_reference, job.frame_number, &annotations);
        let result = self.engine.package(job.frame_number, &next);
        let value =
            serde_json::to_value(&result).map_err(|e| AppError::Propagation(e.to_string()))?;
        Ok(EngineOutput::Structured(value))
    }

    fn name(&self) -> &'static str {
        "in_process"
    }
}

/// Spawns an external inference program per request:
/// `<program> <args..> --video <v> --frame <n> [--annotations <path>]`.
#[derive(Debug, Clone)]
pub struct SubprocessBackend {
    program: String,
    args: Vec<String>,
}

impl SubprocessBackend {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

#[async_trait]
impl EngineBackend for SubprocessBackend {
    async fn infer(&self, job: EngineJob<'_>) -> Result<EngineOutput, AppError> {
        let mut command = tokio::process::Command::new(&self.program);
        command
            .args(&self.args)
            .arg("--video")
            .arg(job.video_reference)
            .arg("--frame")
            .arg(job.frame_number.to_string())
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(path) = job.annotations_path {
            command.arg("--annotations").arg(path);
        }

        debug!("Spawning inference program {}", self.program);
        let output = command.output().await?;
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            warn!(
                "Inference program exited with {}: {}",
                output.status,
                stderr.trim_end()
            );
            return Err(AppError::Engine { details: stderr });
        }
        if !stderr.is_empty() {
            debug!("Inference program stderr: {}", stderr.trim_end());
        }

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        Ok(EngineOutput::from_text(stdout))
    }

    fn name(&self) -> &'static str {
        "subprocess"
    }
}
