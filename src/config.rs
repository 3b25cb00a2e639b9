use crate::error::AppError;
use crate::propagation::{
    ConstantVelocity, Identity, MAX_NOISE_BOUND, NoisePerturbation, PropagationStrategy,
    ScaledDisplacement,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::Level;

/// Environment variable prefix, e.g. `PROPAGATE__POLL_INTERVAL_MS=50`.
pub const ENV_PREFIX: &str = "PROPAGATE";

/// Subdirectory of the data root shared with the handoff worker.
pub const HANDOFF_DIR_NAME: &str = "TempAnnoFile";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    pub data_root: PathBuf,
    /// Where scoped annotation artifacts are written for the duration of a call.
    pub temp_dir: PathBuf,
    /// Defaults to `<data_root>/TempAnnoFile`.
    pub handoff_dir: Option<PathBuf>,
    pub backend: BackendKind,
    pub strategy: StrategyKind,
    pub bbox_padding: f32,
    pub poll_interval_ms: u64,
    pub handoff_timeout_ms: u64,
    pub max_poll_attempts: u32,
    pub worker_scan_interval_ms: u64,
    pub log_level: String,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("."),
            temp_dir: std::env::temp_dir(),
            handoff_dir: None,
            backend: BackendKind::InProcess,
            strategy: StrategyKind::default(),
            bbox_padding: 10.0,
            poll_interval_ms: 100,
            handoff_timeout_ms: 30_000,
            max_poll_attempts: 300,
            worker_scan_interval_ms: 200,
            log_level: "info".to_string(),
        }
    }
}

/// How the gateway reaches the propagation engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendKind {
    /// Call the engine directly inside this process
    InProcess,
    /// Spawn an external inference program per request
    Subprocess { program: String, args: Vec<String> },
    /// Exchange artifacts with a separate worker through the handoff directory
    FileHandoff,
}

/// Displacement model used by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StrategyKind {
    Noise { bound: f32, seed: Option<u64> },
    Identity,
    Scaled { factor: f32 },
    ConstantVelocity,
}

impl Default for StrategyKind {
    fn default() -> Self {
        StrategyKind::Noise {
            bound: MAX_NOISE_BOUND,
            seed: None,
        }
    }
}

impl StrategyKind {
    pub fn build(&self) -> Arc<dyn PropagationStrategy> {
        match self {
            StrategyKind::Noise {
                bound,
                seed: Some(seed),
            } => Arc::new(NoisePerturbation::seeded(*bound, *seed)),
            StrategyKind::Noise { bound, seed: None } => Arc::new(NoisePerturbation::new(*bound)),
            StrategyKind::Identity => Arc::new(Identity),
            StrategyKind::Scaled { factor } => Arc::new(ScaledDisplacement::new(*factor)),
            StrategyKind::ConstantVelocity => Arc::new(ConstantVelocity),
        }
    }
}

impl Configuration {
    /// Layers an optional config file and `PROPAGATE__*` variables over the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, AppError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let configuration: Configuration = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        configuration.validate().map_err(AppError::Configuration)?;
        Ok(configuration)
    }

    pub fn handoff_dir(&self) -> PathBuf {
        self.handoff_dir
            .clone()
            .unwrap_or_else(|| self.data_root.join(HANDOFF_DIR_NAME))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn handoff_timeout(&self) -> Duration {
        Duration::from_millis(self.handoff_timeout_ms)
    }

    pub fn worker_scan_interval(&self) -> Duration {
        Duration::from_millis(self.worker_scan_interval_ms)
    }

    pub fn log_level(&self) -> Level {
        self.log_level.parse().unwrap_or(Level::INFO)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        if self.poll_interval_ms == 0 {
            return Err("Poll interval must be greater than 0".to_string());
        }

        if self.handoff_timeout_ms == 0 {
            return Err("Handoff timeout must be greater than 0".to_string());
        }

        if self.max_poll_attempts == 0 {
            return Err("Max poll attempts must be greater than 0".to_string());
        }

        if self.worker_scan_interval_ms == 0 {
            return Err("Worker scan interval must be greater than 0".to_string());
        }

        if !self.bbox_padding.is_finite() || self.bbox_padding < 0.0 {
            return Err("Bounding box padding must be a non-negative number".to_string());
        }

        if self.log_level.parse::<Level>().is_err() {
            return Err(format!("Unknown log level `{}`", self.log_level));
        }

        match &self.strategy {
            StrategyKind::Noise { bound, .. } => {
                if !(0.0..=MAX_NOISE_BOUND).contains(bound) {
                    return Err(format!(
                        "Noise bound must be between 0 and {}",
                        MAX_NOISE_BOUND
                    ));
                }
            }
            StrategyKind::Scaled { factor } => {
                if !factor.is_finite() {
                    return Err("Scale factor must be finite".to_string());
                }
            }
            _ => {}
        }

        if let BackendKind::Subprocess { program, .. } = &self.backend {
            if program.trim().is_empty() {
                return Err("Subprocess backend needs a program".to_string());
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let configuration = Configuration::default();
        assert!(configuration.validate().is_ok());
        assert_eq!(
            configuration.handoff_dir(),
            PathBuf::from(".").join(HANDOFF_DIR_NAME)
        );
        assert_eq!(configuration.log_level(), Level::INFO);
    }

    #[test]
    fn rejects_noise_bound_above_ten() {
        let configuration = Configuration {
            strategy: StrategyKind::Noise {
                bound: 12.0,
                seed: None,
            },
            ..Configuration::default()
        };
        assert!(configuration.validate().is_err());
    }

    #[test]
    fn rejects_zero_poll_interval() {
        let configuration = Configuration {
            poll_interval_ms: 0,
            ..Configuration::default()
        };
        assert_eq!(
            configuration.validate().unwrap_err(),
            "Poll interval must be greater than 0"
        );
    }

    #[test]
    fn loads_file_over_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
data_root = "/srv/annotator"
poll_interval_ms = 25

[backend]
kind = "subprocess"
program = "python3"
args = ["scripts/inference.py"]

[strategy]
kind = "scaled"
factor = 2.0
"#
        )
        .unwrap();

        let configuration = Configuration::load(Some(file.path())).unwrap();
        assert_eq!(configuration.poll_interval(), Duration::from_millis(25));
        assert_eq!(
            configuration.handoff_dir(),
            PathBuf::from("/srv/annotator/TempAnnoFile")
        );
        assert_eq!(
            configuration.backend,
            BackendKind::Subprocess {
                program: "python3".to_string(),
                args: vec!["scripts/inference.py".to_string()],
            }
        );
        assert_eq!(configuration.strategy, StrategyKind::Scaled { factor: 2.0 });
        assert_eq!(configuration.handoff_timeout_ms, 30_000);
    }

    #[test]
    fn strategy_kind_builds_matching_strategy() {
        assert_eq!(StrategyKind::Identity.build().name(), "identity");
        assert_eq!(StrategyKind::default().build().name(), "noise");
        assert_eq!(
            StrategyKind::ConstantVelocity.build().name(),
            "constant_velocity"
        );
    }
}
