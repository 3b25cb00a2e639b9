use super::protocol::HandoffDirectory;
use crate::error::AppError;
use crate::propagation::{MotionHistory, PropagationEngine};
use std::collections::HashMap;
use std::time::{Duration, SystemTime};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Engine side of the file handoff. Watches the shared directory and answers
/// every request artifact that has no valid response yet.
pub struct HandoffWorker {
    directory: HandoffDirectory,
    engine: PropagationEngine,
    scan_interval: Duration,
    // Request mtimes that failed; retried only once the request is rewritten.
    failed: HashMap<u64, Option<SystemTime>>,
    history: MotionHistory,
}

impl HandoffWorker {
    pub fn new(directory: HandoffDirectory, engine: PropagationEngine) -> Self {
        Self {
            directory,
            engine,
            scan_interval: Duration::from_millis(200),
            failed: HashMap::new(),
            history: MotionHistory::new(),
        }
    }

    pub fn with_scan_interval(mut self, scan_interval: Duration) -> Self {
        self.scan_interval = scan_interval;
        self
    }

    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), AppError> {
        info!(
            "Handoff worker watching {} with strategy {}",
            self.directory.root().display(),
            self.engine.strategy_name()
        );
        loop {
            self.process_pending()?;
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.scan_interval) => {}
            }
        }
        info!("Handoff worker stopped");
        Ok(())
    }

    /// Answers every pending request once. Returns the frames answered.
    pub fn process_pending(&mut self) -> Result<Vec<u64>, AppError> {
        let mut answered = Vec::new();
        let pending = self.directory.pending_requests()?;
        self.failed.retain(|frame, _| pending.contains(frame));
        for frame in pending {
            let stamp = self.request_mtime(frame);
            if self.failed.get(&frame) == Some(&stamp) {
                continue;
            }
            match self.answer(frame) {
                Ok(()) => {
                    self.failed.remove(&frame);
                    answered.push(frame);
                }
                Err(e @ (AppError::MalformedInput { .. } | AppError::Propagation(_))) => {
                    error!("Cannot answer request for frame {}: {}", frame, e);
                    self.failed.insert(frame, stamp);
                }
                Err(AppError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!("Request for frame {} vanished before it was read", frame);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(answered)
    }

    fn answer(&self, frame: u64) -> Result<(), AppError> {
        let request = self.directory.load_request(frame)?;
        // The preceding frame's request, or the last one answered, is the
        // caller's record of where each person was before.
        let previous = frame
            .checked_sub(1)
            .and_then(|prev| self.directory.load_request(prev).ok())
            .filter(|r| r.video_reference == request.video_reference)
            .map(|r| r.annotations)
            .or_else(|| self.history.before(&request.video_reference, frame));
        let next = self
            .engine
            .propagate_with_history(frame, &request.annotations, previous.as_ref())?;
        let result = self.engine.package(frame, &next);
        self.directory.write_response(&result)?;
        self.history.record(&request.video_reference, frame, &request.annotations);
        debug!(
            "Answered frame {} for {} with {} predictions",
            frame,
            request.video_reference,
            result.predictions.len()
        );
        Ok(())
    }

    fn request_mtime(&self, frame: u64) -> Option<SystemTime> {
        std::fs::metadata(self.directory.request_path(frame))
            .and_then(|m| m.modified())
            .ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::{
        FrameAnnotations, HandoffRequest, InferenceResult, Keypoint, PersonAnnotation,
    };
    use crate::handoff::client::{HandoffBackend, PollPolicy};
    use crate::handoff::protocol::HandoffState;
    use crate::propagation::{ConstantVelocity, Identity, NoisePerturbation};
    use chrono::Utc;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn request(frame: u64, x: f32) -> HandoffRequest {
        HandoffRequest {
            frame,
            video_reference: "v.mp4".to_string(),
            requested_at: Utc::now(),
            annotations: FrameAnnotations::new().with_person(
                "p0",
                PersonAnnotation::new()
                    .with_keypoint("nose", Keypoint::new(x, 50.0).with_confidence(0.9)),
            ),
        }
    }

    #[test]
    fn answers_pending_requests_once() {
        let dir = tempdir().unwrap();
        let directory = HandoffDirectory::new(dir.path());
        directory.write_request(&request(0, 100.0)).unwrap();
        directory.write_request(&request(1, 100.0)).unwrap();

        let mut worker = HandoffWorker::new(
            directory.clone(),
            PropagationEngine::new(Arc::new(NoisePerturbation::seeded(10.0, 9))),
        );
        assert_eq!(worker.process_pending().unwrap(), vec![0, 1]);
        assert!(worker.process_pending().unwrap().is_empty());

        match directory.observe(1).unwrap() {
            HandoffState::Completed(result) => {
                let nose = result.predictions[0].keypoints.get("nose").unwrap();
                assert!((90.0..=110.0).contains(&nose.x));
                assert_eq!(nose.confidence, Some(0.9));
            }
            other => panic!("unexpected state: {other:?}"),
        }
    }

    #[test]
    fn previous_request_feeds_motion_history() {
        let dir = tempdir().unwrap();
        let directory = HandoffDirectory::new(dir.path());
        directory.write_request(&request(4, 90.0)).unwrap();
        directory.write_request(&request(5, 100.0)).unwrap();

        let engine = PropagationEngine::new(Arc::new(ConstantVelocity));
        let mut worker = HandoffWorker::new(directory.clone(), engine);
        worker.process_pending().unwrap();

        match directory.observe(5).unwrap() {
            HandoffState::Completed(result) => {
                assert_eq!(result.predictions[0].keypoints.get("nose").unwrap().x, 110.0);
            }
            other => panic!("unexpected state: {other:?}"),
        }
    }

    #[test]
    fn malformed_request_is_skipped_until_rewritten() {
        let dir = tempdir().unwrap();
        let directory = HandoffDirectory::new(dir.path());
        std::fs::write(directory.request_path(3), "garbage").unwrap();

        let mut worker =
            HandoffWorker::new(directory.clone(), PropagationEngine::new(Arc::new(Identity)));
        assert!(worker.process_pending().unwrap().is_empty());
        assert_eq!(directory.observe(3).unwrap(), HandoffState::Requested);
    }

    #[tokio::test]
    async fn gateway_and_worker_complete_a_round_trip() {
        let dir = tempdir().unwrap();
        let directory = HandoffDirectory::new(dir.path());
        let cancel = CancellationToken::new();

        let worker_task = spawn_worker(&directory, Arc::new(Identity), &cancel);

        let backend = HandoffBackend::new(directory.clone()).with_policy(PollPolicy {
            interval: Duration::from_millis(5),
            timeout: Duration::from_secs(5),
            max_attempts: 10_000,
        });
        let result = backend.submit(&request(6, 42.0)).await.unwrap();
        assert_eq!(result.frame, 6);
        assert_eq!(result.predictions[0].keypoints.get("nose").unwrap().x, 42.0);
        assert!(!directory.request_path(6).exists());
        assert!(directory.response_path(6).exists());

        cancel.cancel();
        worker_task.await.unwrap().unwrap();
    }

    fn spawn_worker(
        directory: &HandoffDirectory,
        strategy: Arc<dyn crate::propagation::PropagationStrategy>,
        cancel: &CancellationToken,
    ) -> tokio::task::JoinHandle<Result<(), AppError>> {
        let worker = HandoffWorker::new(directory.clone(), PropagationEngine::new(strategy))
            .with_scan_interval(Duration::from_millis(5));
        tokio::spawn(worker.run(cancel.clone()))
    }

    fn quick_backend(directory: &HandoffDirectory) -> HandoffBackend {
        HandoffBackend::new(directory.clone()).with_policy(PollPolicy {
            interval: Duration::from_millis(5),
            timeout: Duration::from_secs(5),
            max_attempts: 10_000,
        })
    }

    fn nose_x(result: &InferenceResult) -> f32 {
        result.predictions[0].keypoints.get("nose").unwrap().x
    }

    #[tokio::test]
    async fn repeated_frame_is_answered_from_the_new_annotations() {
        let dir = tempdir().unwrap();
        let directory = HandoffDirectory::new(dir.path());
        let cancel = CancellationToken::new();
        let worker_task = spawn_worker(&directory, Arc::new(Identity), &cancel);
        let backend = quick_backend(&directory);

        let first = backend.submit(&request(4, 100.0)).await.unwrap();
        let second = backend.submit(&request(4, 300.0)).await.unwrap();
        assert_eq!(nose_x(&first), 100.0);
        assert_eq!(nose_x(&second), 300.0);

        cancel.cancel();
        worker_task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn consecutive_submissions_carry_motion_history() {
        let dir = tempdir().unwrap();
        let directory = HandoffDirectory::new(dir.path());
        let cancel = CancellationToken::new();
        let worker_task = spawn_worker(&directory, Arc::new(ConstantVelocity), &cancel);
        let backend = quick_backend(&directory);

        backend.submit(&request(4, 90.0)).await.unwrap();
        let next = backend.submit(&request(5, 100.0)).await.unwrap();
        assert_eq!(nose_x(&next), 110.0);

        cancel.cancel();
        worker_task.await.unwrap().unwrap();
    }

    #[test]
    fn failures_are_forgotten_once_the_request_is_gone() {
        let dir = tempdir().unwrap();
        let directory = HandoffDirectory::new(dir.path());
        std::fs::write(directory.request_path(3), "garbage").unwrap();

        let mut worker =
            HandoffWorker::new(directory.clone(), PropagationEngine::new(Arc::new(Identity)));
        worker.process_pending().unwrap();
        assert!(worker.failed.contains_key(&3));

        directory.remove_request(3).unwrap();
        worker.process_pending().unwrap();
        assert!(worker.failed.is_empty());
    }
}
