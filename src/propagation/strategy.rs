use crate::annotation::{FrameAnnotations, Keypoint};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Mutex;

/// Largest per-axis offset the reference noise strategy may apply.
pub const MAX_NOISE_BOUND: f32 = 10.0;

/// Where a keypoint sits while it is being propagated.
#[derive(Debug, Clone, Copy)]
pub struct PropagationContext<'a> {
    pub frame_index: u64,
    pub person_id: &'a str,
    pub label: &'a str,
    /// Caller-owned annotations of the frame before `frame_index`, if tracked.
    pub previous: Option<&'a FrameAnnotations>,
}

impl<'a> PropagationContext<'a> {
    fn previous_keypoint(&self) -> Option<&'a Keypoint> {
        self.previous?.get(self.person_id)?.get(self.label)
    }
}

/// Displacement model used by the propagation engine.
///
/// Implementations move one keypoint at a time and must not touch the
/// confidence unless they compute a replacement for it.
pub trait PropagationStrategy: Send + Sync {
    fn displace(&self, context: &PropagationContext<'_>, keypoint: &Keypoint) -> Keypoint;
    fn name(&self) -> &'static str;
}

/// Reference mock: independent uniform offset in `[-bound, bound]` per axis.
pub struct NoisePerturbation {
    bound: f32,
    rng: Mutex<StdRng>,
}

impl NoisePerturbation {
    pub fn new(bound: f32) -> Self {
        Self::with_rng(bound, StdRng::from_os_rng())
    }

    /// Reproducible variant for tests and replays.
    pub fn seeded(bound: f32, seed: u64) -> Self {
        Self::with_rng(bound, StdRng::seed_from_u64(seed))
    }

    fn with_rng(bound: f32, rng: StdRng) -> Self {
        Self {
            bound: bound.clamp(0.0, MAX_NOISE_BOUND),
            rng: Mutex::new(rng),
        }
    }

    pub fn bound(&self) -> f32 {
        self.bound
    }
}

impl Default for NoisePerturbation {
    fn default() -> Self {
        Self::new(MAX_NOISE_BOUND)
    }
}

impl PropagationStrategy for NoisePerturbation {
    fn displace(&self, _context: &PropagationContext<'_>, keypoint: &Keypoint) -> Keypoint {
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let dx = rng.random_range(-self.bound..=self.bound);
        let dy = rng.random_range(-self.bound..=self.bound);
        keypoint.moved_to(keypoint.x + dx, keypoint.y + dy)
    }

    fn name(&self) -> &'static str {
        "noise"
    }
}

/// Leaves every keypoint where it is.
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl PropagationStrategy for Identity {
    fn displace(&self, _context: &PropagationContext<'_>, keypoint: &Keypoint) -> Keypoint {
        *keypoint
    }

    fn name(&self) -> &'static str {
        "identity"
    }
}

/// `x' = x + factor * x`, the scaled variant of the mock backend.
#[derive(Debug, Clone, Copy)]
pub struct ScaledDisplacement {
    factor: f32,
}

impl ScaledDisplacement {
    pub fn new(factor: f32) -> Self {
        Self { factor }
    }
}

impl Default for ScaledDisplacement {
    fn default() -> Self {
        Self::new(2.0)
    }
}

impl PropagationStrategy for ScaledDisplacement {
    fn displace(&self, _context: &PropagationContext<'_>, keypoint: &Keypoint) -> Keypoint {
        keypoint.moved_to(
            keypoint.x + self.factor * keypoint.x,
            keypoint.y + self.factor * keypoint.y,
        )
    }

    fn name(&self) -> &'static str {
        "scaled"
    }
}

/// Linear extrapolation from the previous frame: `x' = x + (x - x_prev)`.
///
/// Keypoints without history (new persons, first frame) stay in place.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConstantVelocity;

impl PropagationStrategy for ConstantVelocity {
    fn displace(&self, context: &PropagationContext<'_>, keypoint: &Keypoint) -> Keypoint {
        match context.previous_keypoint() {
            Some(prev) => keypoint.moved_to(
                keypoint.x + (keypoint.x - prev.x),
                keypoint.y + (keypoint.y - prev.y),
            ),
            None => *keypoint,
        }
    }

    fn name(&self) -> &'static str {
        "constant_velocity"
    }
}
