use crate::{
    config::Configuration,
    error::AppError,
    gateway::GatewayFactory,
    handoff::{HandoffDirectory, HandoffWorker},
};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Owns the background handoff worker and stops it on drop.
pub struct Coordinator {
    worker_task: tokio::task::JoinHandle<Result<(), AppError>>,
    cancel_token: CancellationToken,
}

impl Coordinator {
    fn new(configuration: Configuration) -> Self {
        let cancel_token = CancellationToken::new();

        Self {
            worker_task: Self::start_worker_task(configuration, cancel_token.clone()),
            cancel_token,
        }
    }

    fn start_worker_task(
        configuration: Configuration,
        cancel_token: CancellationToken,
    ) -> tokio::task::JoinHandle<Result<(), AppError>> {
        let worker = HandoffWorker::new(
            HandoffDirectory::new(configuration.handoff_dir()),
            GatewayFactory::create_engine(&configuration),
        )
        .with_scan_interval(configuration.worker_scan_interval());
        tokio::spawn(async move {
            let result = worker.run(cancel_token).await;
            if let Err(e) = &result {
                tracing::error!("Handoff worker error: {}", e);
            }
            result
        })
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Signals the worker and waits for it to finish its current scan.
    pub async fn shutdown(mut self) -> Result<(), AppError> {
        self.cancel_token.cancel();
        let task = &mut self.worker_task;
        task.await
            .map_err(|e| AppError::Worker(e.to_string()))?
    }

    pub fn stop(&self) {
        self.cancel_token.cancel();
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.stop();
    }
}

pub struct CoordinatorBuilder {
    configuration: Configuration,
}

impl CoordinatorBuilder {
    pub fn new(configuration: Configuration) -> Self {
        Self { configuration }
    }

    // Sets the shared handoff directory, this will override the default configuration.
    pub fn handoff_dir(mut self, handoff_dir: PathBuf) -> Self {
        self.configuration.handoff_dir = Some(handoff_dir);
        self
    }

    // Overrides the configured worker scan interval.
    pub fn scan_interval(mut self, scan_interval: Duration) -> Self {
        self.configuration.worker_scan_interval_ms = scan_interval.as_millis() as u64;
        self
    }

    pub fn build(self) -> Result<Coordinator, AppError> {
        self.configuration
            .validate()
            .map_err(AppError::Configuration)?;
        let handoff_dir = self.configuration.handoff_dir();
        if !handoff_dir.is_dir() {
            return Err(AppError::DirectoryNotFound(handoff_dir));
        }
        Ok(Coordinator::new(self.configuration))
    }
}
