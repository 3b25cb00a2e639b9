use crate::annotation::FrameAnnotations;
use std::sync::Mutex;

/// The last frame a caller handed to the engine, kept so that the next frame
/// of the same video can be propagated with its predecessor as history.
#[derive(Debug, Default)]
pub struct MotionHistory {
    last: Mutex<Option<Entry>>,
}

#[derive(Debug)]
struct Entry {
    video_reference: String,
    frame: u64,
    annotations: FrameAnnotations,
}

impl MotionHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Annotations recorded for `frame - 1` of the same video, if any.
    pub fn before(&self, video_reference: &str, frame: u64) -> Option<FrameAnnotations> {
        let last = self.last.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        last.as_ref()
            .filter(|e| e.video_reference == video_reference)
            .filter(|e| e.frame.checked_add(1) == Some(frame))
            .map(|e| e.annotations.clone())
    }

    pub fn record(&self, video_reference: &str, frame: u64, annotations: &FrameAnnotations) {
        let mut last = self.last.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *last = Some(Entry {
            video_reference: video_reference.to_string(),
            frame,
            annotations: annotations.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::{Keypoint, PersonAnnotation};

    fn frame(x: f32) -> FrameAnnotations {
        FrameAnnotations::new()
            .with_person("p0", PersonAnnotation::new().with_keypoint("nose", Keypoint::new(x, 0.0)))
    }

    #[test]
    fn only_the_directly_preceding_frame_counts() {
        let history = MotionHistory::new();
        assert!(history.before("v.mp4", 1).is_none());

        history.record("v.mp4", 4, &frame(90.0));
        assert_eq!(history.before("v.mp4", 5), Some(frame(90.0)));
        assert!(history.before("v.mp4", 6).is_none());
        assert!(history.before("v.mp4", 4).is_none());
        assert!(history.before("other.mp4", 5).is_none());
    }

    #[test]
    fn later_records_replace_earlier_ones() {
        let history = MotionHistory::new();
        history.record("v.mp4", 4, &frame(90.0));
        history.record("v.mp4", 5, &frame(100.0));
        assert!(history.before("v.mp4", 5).is_none());
        assert_eq!(history.before("v.mp4", 6), Some(frame(100.0)));
    }
}
