pub mod engine;
pub mod history;
pub mod strategy;

pub use engine::PropagationEngine;
pub use history::MotionHistory;
pub use strategy::{
    ConstantVelocity, Identity, MAX_NOISE_BOUND, NoisePerturbation, PropagationContext,
    PropagationStrategy, ScaledDisplacement,
};
