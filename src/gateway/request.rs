use crate::annotation::FrameAnnotations;
use crate::error::AppError;
use crate::propagation::PropagationEngine;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An editing client's request to propagate one frame's annotations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceRequest {
    #[serde(rename = "videoPath")]
    pub video_reference: String,
    #[serde(rename = "frameNumber")]
    pub frame_number: u64,
    #[serde(default)]
    pub annotations: Option<FrameAnnotations>,
}

impl InferenceRequest {
    pub fn new(video_reference: impl Into<String>, frame_number: u64) -> Self {
        Self {
            video_reference: video_reference.into(),
            frame_number,
            annotations: None,
        }
    }

    pub fn with_annotations(mut self, annotations: FrameAnnotations) -> Self {
        self.annotations = Some(annotations);
        self
    }

    /// Reads the inbound `{videoPath, frameNumber, annotations}` body, listing
    /// every offending field.
    pub fn from_json(body: &Value) -> Result<Self, AppError> {
        let Some(fields) = body.as_object() else {
            return Err(AppError::Validation(
                "request body: expected a JSON object".to_string(),
            ));
        };
        let mut problems = Vec::new();

        let video_reference = match fields.get("videoPath") {
            None | Some(Value::Null) => {
                problems.push("videoPath: required".to_string());
                None
            }
            Some(Value::String(path)) if path.trim().is_empty() => {
                problems.push("videoPath: must not be empty".to_string());
                None
            }
            Some(Value::String(path)) => Some(path.clone()),
            Some(_) => {
                problems.push("videoPath: expected a string".to_string());
                None
            }
        };

        let frame_number = match fields.get("frameNumber") {
            None | Some(Value::Null) => {
                problems.push("frameNumber: required".to_string());
                None
            }
            Some(Value::Number(n)) => match n.as_u64() {
                Some(frame) => Some(frame),
                None if n.as_i64().is_some() => {
                    problems.push("frameNumber: must be non-negative".to_string());
                    None
                }
                None => {
                    problems.push("frameNumber: expected an integer".to_string());
                    None
                }
            },
            Some(_) => {
                problems.push("frameNumber: expected an integer".to_string());
                None
            }
        };

        let annotations = match fields.get("annotations") {
            None | Some(Value::Null) => None,
            Some(value) => match FrameAnnotations::from_value(value) {
                Ok(annotations) => Some(annotations),
                Err(e) => {
                    problems.push(e.nested("annotations").to_string());
                    None
                }
            },
        };

        match (video_reference, frame_number) {
            (Some(video_reference), Some(frame_number)) if problems.is_empty() => Ok(Self {
                video_reference,
                frame_number,
                annotations,
            }),
            _ => Err(AppError::Validation(problems.join("; "))),
        }
    }

    /// Checks a request built in code rather than parsed from JSON.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.video_reference.trim().is_empty() {
            return Err(AppError::Validation(
                "videoPath: must not be empty".to_string(),
            ));
        }
        // NaN would be written to the artifact as `null`.
        if let Some(annotations) = &self.annotations {
            PropagationEngine::validate_input(annotations)?;
        }
        Ok(())
    }

    pub fn annotation_count(&self) -> usize {
        self.annotations.as_ref().map_or(0, FrameAnnotations::len)
    }
}
