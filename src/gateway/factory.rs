use super::backend::{EngineBackend, InProcessBackend, SubprocessBackend};
use super::request_gateway::RequestGateway;
use crate::annotation::AnnotationStore;
use crate::config::{BackendKind, Configuration};
use crate::error::AppError;
use crate::handoff::{HandoffBackend, HandoffDirectory, PollPolicy};
use crate::propagation::PropagationEngine;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Builds gateways and engines from a [`Configuration`].
pub struct GatewayFactory;

impl GatewayFactory {
    pub fn create_engine(config: &Configuration) -> PropagationEngine {
        PropagationEngine::new(config.strategy.build()).with_bbox_padding(config.bbox_padding)
    }

    /// Create a gateway wired to the configured backend
    pub fn create_gateway(config: &Configuration) -> Result<RequestGateway, AppError> {
        Self::create_gateway_with_cancellation(config, CancellationToken::new())
    }

    /// Like [`create_gateway`](Self::create_gateway); cancelling `cancel`
    /// aborts any handoff wait in progress.
    pub fn create_gateway_with_cancellation(
        config: &Configuration,
        cancel: CancellationToken,
    ) -> Result<RequestGateway, AppError> {
        config.validate().map_err(AppError::Configuration)?;

        if !config.temp_dir.is_dir() {
            return Err(AppError::DirectoryNotFound(config.temp_dir.clone()));
        }

        let backend: Arc<dyn EngineBackend> = match &config.backend {
            BackendKind::InProcess => Arc::new(InProcessBackend::new(Self::create_engine(config))),
            BackendKind::Subprocess { program, args } => {
                Arc::new(SubprocessBackend::new(program.clone(), args.clone()))
            }
            BackendKind::FileHandoff => {
                let dir = config.handoff_dir();
                if !dir.is_dir() {
                    return Err(AppError::DirectoryNotFound(dir));
                }
                Arc::new(
                    HandoffBackend::new(HandoffDirectory::new(dir))
                        .with_policy(PollPolicy {
                            interval: config.poll_interval(),
                            timeout: config.handoff_timeout(),
                            max_attempts: config.max_poll_attempts,
                        })
                        .with_cancellation(cancel),
                )
            }
        };

        info!("Created gateway with {} backend", backend.name());
        Ok(RequestGateway::new(
            AnnotationStore::new(config.temp_dir.clone()),
            backend,
        ))
    }
}
