use super::clock::{Clock, TokioClock};
use super::protocol::{HandoffDirectory, HandoffState};
use crate::annotation::{HandoffRequest, InferenceResult};
use crate::error::AppError;
use crate::gateway::backend::{EngineBackend, EngineJob, EngineOutput};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Fixed-interval polling limits for one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub timeout: Duration,
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(100),
            timeout: Duration::from_secs(30),
            max_attempts: 300,
        }
    }
}

/// Gateway side of the file handoff: publishes a request artifact and waits
/// for the worker's response artifact.
#[derive(Clone)]
pub struct HandoffBackend {
    directory: HandoffDirectory,
    clock: Arc<dyn Clock>,
    policy: PollPolicy,
    cancel: CancellationToken,
}

impl HandoffBackend {
    pub fn new(directory: HandoffDirectory) -> Self {
        Self {
            directory,
            clock: Arc::new(TokioClock::new()),
            policy: PollPolicy::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_policy(mut self, policy: PollPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn directory(&self) -> &HandoffDirectory {
        &self.directory
    }

    /// Publishes `request` and waits for its response under the configured policy.
    pub async fn submit(&self, request: &HandoffRequest) -> Result<InferenceResult, AppError> {
        // A response kept from an earlier request for this frame must not answer this one.
        self.directory.remove_response(request.frame)?;
        self.directory.write_request(request)?;
        debug!("Published handoff request for frame {}", request.frame);
        let result = self.wait_for(request.frame, self.policy.timeout).await?;
        self.directory.remove_request(request.frame)?;
        Ok(result)
    }

    /// Polls for frame `frame` until it completes, `deadline` elapses, the
    /// attempt budget runs out, or the backend is cancelled.
    #[instrument(skip(self), fields(interval = ?self.policy.interval))]
    pub async fn wait_for(
        &self,
        frame: u64,
        deadline: Duration,
    ) -> Result<InferenceResult, AppError> {
        let started = self.clock.elapsed();
        let mut attempts = 0u32;
        loop {
            if self.cancel.is_cancelled() {
                return Err(AppError::Cancelled(frame));
            }

            let state = self.directory.observe(frame)?;
            if let HandoffState::Completed(result) = state {
                info!("Frame {} completed after {} polls", frame, attempts + 1);
                return Ok(result);
            }

            attempts += 1;
            let waited = self.clock.elapsed().saturating_sub(started);
            if attempts >= self.policy.max_attempts || waited >= deadline {
                return Err(match state {
                    HandoffState::Stale { found } => {
                        warn!(
                            "Rejecting stale response for frame {} (holds frame {})",
                            frame, found
                        );
                        AppError::StaleArtifact {
                            expected: frame,
                            found,
                        }
                    }
                    _ => {
                        warn!("No response for frame {} after {:?}", frame, waited);
                        AppError::Timeout { frame, waited }
                    }
                });
            }

            tokio::select! {
                _ = self.cancel.cancelled() => return Err(AppError::Cancelled(frame)),
                _ = self.clock.sleep(self.policy.interval) => {}
            }
        }
    }
}

#[async_trait]
impl EngineBackend for HandoffBackend {
    async fn infer(&self, job: EngineJob<'_>) -> Result<EngineOutput, AppError> {
        let request = HandoffRequest {
            frame: job.frame_number,
            video_reference: job.video_reference.to_string(),
            requested_at: Utc::now(),
            annotations: job.load_annotations()?,
        };
        let result = self.submit(&request).await?;
        let value =
            serde_json::to_value(&result).map_err(|e| AppError::Propagation(e.to_string()))?;
        Ok(EngineOutput::Structured(value))
    }

    fn name(&self) -> &'static str {
        "file_handoff"
    }
}
