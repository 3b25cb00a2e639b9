use super::strategy::{PropagationContext, PropagationStrategy};
use crate::annotation::{
    DEFAULT_BBOX_PADDING, FrameAnnotations, InferenceResult, Keypoint, PersonAnnotation,
};
use crate::error::AppError;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Moves annotations of frame `N` to frame `N + 1` with a pluggable strategy.
///
/// The engine holds no state between calls. Every person in the input gets an
/// output entry under the same id with exactly the same keypoint labels.
#[derive(Clone)]
pub struct PropagationEngine {
    strategy: Arc<dyn PropagationStrategy>,
    bbox_padding: f32,
}

impl PropagationEngine {
    pub fn new(strategy: Arc<dyn PropagationStrategy>) -> Self {
        Self {
            strategy,
            bbox_padding: DEFAULT_BBOX_PADDING,
        }
    }

    pub fn with_bbox_padding(mut self, bbox_padding: f32) -> Self {
        self.bbox_padding = bbox_padding;
        self
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    pub fn propagate(
        &self,
        frame_index: u64,
        current: &FrameAnnotations,
    ) -> Result<FrameAnnotations, AppError> {
        self.propagate_with_history(frame_index, current, None)
    }

    /// Same as [`propagate`](Self::propagate), with the caller's view of the
    /// preceding frame for strategies that track motion.
    #[instrument(
        skip(self, current, previous),
        fields(strategy = self.strategy.name(), persons = current.len())
    )]
    pub fn propagate_with_history(
        &self,
        frame_index: u64,
        current: &FrameAnnotations,
        previous: Option<&FrameAnnotations>,
    ) -> Result<FrameAnnotations, AppError> {
        Self::validate_input(current)?;

        let mut next = FrameAnnotations::new();
        for (person_id, person) in current.iter() {
            let mut moved = PersonAnnotation::new();
            for (label, keypoint) in person.iter() {
                let context = PropagationContext {
                    frame_index,
                    person_id,
                    label,
                    previous,
                };
                let displaced = self.strategy.displace(&context, keypoint);
                check_keypoint(person_id, label, &displaced).map_err(|reason| {
                    AppError::Propagation(format!(
                        "strategy `{}` produced {}",
                        self.strategy.name(),
                        reason
                    ))
                })?;
                moved.insert(label, displaced);
            }
            next.insert(person_id, moved);
        }

        debug!("Propagated {} persons from frame {}", next.len(), frame_index);
        Ok(next)
    }

    /// Propagates and packages the result as the frame's predictions.
    pub fn predict(
        &self,
        frame_index: u64,
        current: &FrameAnnotations,
    ) -> Result<InferenceResult, AppError> {
        let next = self.propagate(frame_index, current)?;
        Ok(self.package(frame_index, &next))
    }

    /// Rejects non-finite coordinates and confidences outside `[0, 1]`.
    pub fn validate_input(frame: &FrameAnnotations) -> Result<(), AppError> {
        for (person_id, person) in frame.iter() {
            for (label, keypoint) in person.iter() {
                check_keypoint(person_id, label, keypoint).map_err(AppError::Propagation)?;
            }
        }
        Ok(())
    }

    /// Wraps propagated annotations as predictions with derived boxes.
    pub fn package(&self, frame_index: u64, propagated: &FrameAnnotations) -> InferenceResult {
        InferenceResult::from_annotations(frame_index, propagated, self.bbox_padding)
    }
}

fn check_keypoint(person_id: &str, label: &str, keypoint: &Keypoint) -> Result<(), String> {
    if !keypoint.x.is_finite() || !keypoint.y.is_finite() {
        return Err(format!("{}.{}: non-finite coordinate", person_id, label));
    }
    if let Some(confidence) = keypoint.confidence {
        if !(0.0..=1.0).contains(&confidence) {
            return Err(format!("{}.{}.confidence: outside [0, 1]", person_id, label));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::COCO_KEYPOINTS;
    use crate::propagation::strategy::{
        ConstantVelocity, Identity, NoisePerturbation, ScaledDisplacement,
    };

    fn skeleton(base_x: f32, base_y: f32) -> PersonAnnotation {
        COCO_KEYPOINTS
            .iter()
            .enumerate()
            .map(|(i, label)| {
                (
                    label.to_string(),
                    Keypoint::new(base_x + i as f32 * 3.0, base_y + i as f32 * 7.0)
                        .with_confidence(0.8),
                )
            })
            .collect()
    }

    fn two_people() -> FrameAnnotations {
        FrameAnnotations::new()
            .with_person("person_0", skeleton(300.0, 200.0))
            .with_person(
                "person_1",
                PersonAnnotation::new().with_keypoint("nose", Keypoint::new(500.0, 250.0)),
            )
    }

    #[test]
    fn preserves_persons_and_labels() {
        let engine = PropagationEngine::new(Arc::new(NoisePerturbation::seeded(10.0, 3)));
        let current = two_people();
        let next = engine.propagate(0, &current).unwrap();

        assert_eq!(
            next.person_ids().collect::<Vec<_>>(),
            current.person_ids().collect::<Vec<_>>()
        );
        for (id, person) in current.iter() {
            let moved = next.get(id).unwrap();
            assert_eq!(
                moved.labels().collect::<Vec<_>>(),
                person.labels().collect::<Vec<_>>()
            );
            for (label, kp) in person.iter() {
                let out = moved.get(label).unwrap();
                assert!((out.x - kp.x).abs() <= 10.0);
                assert!((out.y - kp.y).abs() <= 10.0);
                assert_eq!(out.confidence, kp.confidence);
            }
        }
    }

    #[test]
    fn empty_frame_propagates_to_empty_frame() {
        let engine = PropagationEngine::new(Arc::new(Identity));
        assert!(engine.propagate(5, &FrameAnnotations::new()).unwrap().is_empty());
    }

    #[test]
    fn person_without_keypoints_keeps_an_empty_entry() {
        let engine = PropagationEngine::new(Arc::new(Identity));
        let current = FrameAnnotations::new().with_person("ghost", PersonAnnotation::new());
        let next = engine.propagate(0, &current).unwrap();
        assert!(next.get("ghost").unwrap().is_empty());
    }

    #[test]
    fn non_finite_input_fails_fast() {
        let engine = PropagationEngine::new(Arc::new(Identity));
        let current = FrameAnnotations::new().with_person(
            "p0",
            PersonAnnotation::new().with_keypoint("nose", Keypoint::new(f32::NAN, 1.0)),
        );
        match engine.propagate(0, &current).unwrap_err() {
            AppError::Propagation(reason) => assert!(reason.contains("p0.nose")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn overflowing_strategy_output_is_rejected() {
        let engine = PropagationEngine::new(Arc::new(ScaledDisplacement::new(2.0)));
        let current = FrameAnnotations::new().with_person(
            "p0",
            PersonAnnotation::new().with_keypoint("nose", Keypoint::new(f32::MAX, 0.0)),
        );
        assert!(matches!(
            engine.propagate(0, &current),
            Err(AppError::Propagation(_))
        ));
    }

    #[test]
    fn history_drives_constant_velocity_and_tolerates_new_persons() {
        let engine = PropagationEngine::new(Arc::new(ConstantVelocity));
        let previous = FrameAnnotations::new().with_person(
            "p0",
            PersonAnnotation::new().with_keypoint("nose", Keypoint::new(95.0, 50.0)),
        );
        let current = FrameAnnotations::new()
            .with_person(
                "p0",
                PersonAnnotation::new().with_keypoint("nose", Keypoint::new(100.0, 50.0)),
            )
            .with_person(
                "p9",
                PersonAnnotation::new().with_keypoint("nose", Keypoint::new(10.0, 10.0)),
            );
        let next = engine
            .propagate_with_history(1, &current, Some(&previous))
            .unwrap();
        assert_eq!(next.get("p0").unwrap().get("nose").unwrap().x, 105.0);
        assert_eq!(next.get("p9").unwrap().get("nose").unwrap().x, 10.0);
    }

    #[test]
    fn predict_derives_bbox_and_keeps_person_order() {
        let engine = PropagationEngine::new(Arc::new(Identity)).with_bbox_padding(10.0);
        let result = engine.predict(4, &two_people()).unwrap();
        assert_eq!(result.frame, 4);
        assert_eq!(result.predictions[0].person_id, "person_0");
        assert_eq!(result.predictions[1].bbox, [490.0, 240.0, 20.0, 20.0]);
        assert!((result.predictions[0].confidence - 0.8).abs() < 1e-4);
    }
}
