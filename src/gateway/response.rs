use super::backend::EngineOutput;
use crate::annotation::InferenceResult;
use crate::error::{AppError, StatusClass};
use serde::{Serialize, Serializer};
use serde_json::{Value, json};

/// Payload of a successful response: parsed engine output, or its raw text.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum InferenceData {
    Structured(Value),
    Raw(String),
}

impl InferenceData {
    /// The payload as typed predictions, when it has that shape.
    pub fn as_result(&self) -> Option<InferenceResult> {
        match self {
            InferenceData::Structured(value) => serde_json::from_value(value.clone()).ok(),
            InferenceData::Raw(_) => None,
        }
    }
}

impl From<EngineOutput> for InferenceData {
    fn from(output: EngineOutput) -> Self {
        match output {
            EngineOutput::Structured(value) => InferenceData::Structured(value),
            EngineOutput::Raw(text) => InferenceData::Raw(text),
        }
    }
}

/// What the gateway hands back to the transport layer.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayResponse {
    Success(InferenceData),
    Failure {
        status: StatusClass,
        error: String,
        details: String,
    },
}

impl GatewayResponse {
    pub fn failure(err: &AppError) -> Self {
        GatewayResponse::Failure {
            status: err.status(),
            error: err.headline().to_string(),
            details: err.details(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, GatewayResponse::Success(_))
    }

    pub fn status_code(&self) -> u16 {
        match self {
            GatewayResponse::Success(_) => 200,
            GatewayResponse::Failure { status, .. } => status.code(),
        }
    }

    pub fn data(&self) -> Option<&InferenceData> {
        match self {
            GatewayResponse::Success(data) => Some(data),
            GatewayResponse::Failure { .. } => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            GatewayResponse::Success(data) => json!({"success": true, "data": data}),
            GatewayResponse::Failure { error, details, .. } => {
                json!({"error": error, "details": details})
            }
        }
    }
}

impl Serialize for GatewayResponse {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

/// Fixed acknowledgment returned by the liveness probe.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub message: &'static str,
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self {
            status: "OK",
            message: "Backend is running",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_serializes_with_flag_and_data() {
        let response = GatewayResponse::Success(InferenceData::Raw("plain text".to_string()));
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({"success": true, "data": "plain text"})
        );
        assert_eq!(response.status_code(), 200);
    }

    #[test]
    fn failure_serializes_error_and_details() {
        let response = GatewayResponse::failure(&AppError::Engine {
            details: "CUDA out of memory".to_string(),
        });
        assert_eq!(
            response.to_json(),
            json!({"error": "Inference failed", "details": "CUDA out of memory"})
        );
        assert_eq!(response.status_code(), 500);
    }

    #[test]
    fn structured_data_reads_back_as_result() {
        let data = InferenceData::Structured(json!({"frame": 2, "predictions": []}));
        assert_eq!(data.as_result(), Some(InferenceResult::new(2, Vec::new())));
        assert_eq!(InferenceData::Raw("x".to_string()).as_result(), None);
    }
}
