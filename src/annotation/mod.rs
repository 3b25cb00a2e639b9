pub mod store;
pub mod types;

pub use store::{AnnotationStore, ScopedArtifact};
pub use types::{
    COCO_KEYPOINTS, DEFAULT_BBOX_PADDING, FrameAnnotations, HandoffRequest, InferenceResult,
    Keypoint, PersonAnnotation, Prediction, ShapeError,
};
