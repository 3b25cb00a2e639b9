pub mod annotation;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod gateway;
pub mod handoff;
pub mod propagation;

pub use annotation::{
    AnnotationStore, FrameAnnotations, InferenceResult, Keypoint, PersonAnnotation, Prediction,
};
pub use config::Configuration;
pub use coordinator::{Coordinator, CoordinatorBuilder};
pub use error::{AppError, StatusClass};
pub use gateway::{GatewayFactory, GatewayResponse, InferenceRequest, RequestGateway};
pub use handoff::{HandoffBackend, HandoffDirectory, HandoffWorker};
pub use propagation::{PropagationEngine, PropagationStrategy};
