use super::backend::{EngineBackend, EngineJob};
use super::request::InferenceRequest;
use super::response::{GatewayResponse, HealthStatus, InferenceData};
use crate::annotation::AnnotationStore;
use crate::error::AppError;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::Service;
use tracing::{Instrument, error, info, info_span};
use uuid::Uuid;

/// Validates inference requests and runs them against an engine backend.
///
/// Every call yields a [`GatewayResponse`]; failures are reported as
/// structured errors, never as an empty success.
#[derive(Clone)]
pub struct RequestGateway {
    store: AnnotationStore,
    backend: Arc<dyn EngineBackend>,
}

impl RequestGateway {
    pub fn new(store: AnnotationStore, backend: Arc<dyn EngineBackend>) -> Self {
        Self { store, backend }
    }

    /// Liveness probe. No side effects.
    pub fn health(&self) -> HealthStatus {
        HealthStatus::default()
    }

    /// Entry point for a raw request body.
    pub async fn handle_json(&self, body: &Value) -> GatewayResponse {
        match InferenceRequest::from_json(body) {
            Ok(request) => self.handle(request).await,
            Err(e) => {
                info!("Rejected inference request: {}", e);
                GatewayResponse::failure(&e)
            }
        }
    }

    pub async fn handle(&self, request: InferenceRequest) -> GatewayResponse {
        let span = info_span!(
            "inference",
            request_id = %Uuid::new_v4(),
            frame = request.frame_number,
            backend = self.backend.name()
        );
        async move {
            info!(
                "Received inference request for {} ({} annotated persons)",
                request.video_reference,
                request.annotation_count()
            );
            match self.try_handle(&request).await {
                Ok(data) => GatewayResponse::Success(data),
                Err(e) => {
                    error!("Inference request failed: {}", e);
                    GatewayResponse::failure(&e)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn try_handle(&self, request: &InferenceRequest) -> Result<InferenceData, AppError> {
        request.validate()?;

        // Dropped at the end of this call on every path, removing the file.
        let artifact = match &request.annotations {
            Some(annotations) => Some(self.store.scoped_artifact(annotations)?),
            None => None,
        };
        let job = EngineJob {
            video_reference: &request.video_reference,
            frame_number: request.frame_number,
            annotations_path: artifact.as_ref().map(|a| a.path()),
        };
        let output = self.backend.infer(job).await?;
        Ok(output.into())
    }
}

impl Service<InferenceRequest> for RequestGateway {
    type Response = GatewayResponse;
    type Error = AppError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: InferenceRequest) -> Self::Future {
        let gateway = self.clone();
        Box::pin(async move { Ok(gateway.handle(request).await) })
    }
}
