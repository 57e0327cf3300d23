//! Harness configuration.
//!
//! Values are layered: defaults, then an optional JSON file, then
//! `SCENE_STRESS_*` environment variables, then command-line flags.
//!
//! | Variable | Field |
//! |----------|-------|
//! | `SCENE_STRESS_INTENSITY` | [`HarnessConfig::intensity`] |
//! | `SCENE_STRESS_THREADS` | [`HarnessConfig::threads`] |
//! | `SCENE_STRESS_SEED` | [`HarnessConfig::seed_base`] |

use std::path::Path;

use crate::error::{Error, ErrorKind};
use crate::mutation::MutationConfig;
use crate::oracle::RayOracleConfig;

/// Environment variable overriding the intensity.
pub const ENV_INTENSITY: &str = "SCENE_STRESS_INTENSITY";
/// Environment variable overriding the thread count.
pub const ENV_THREADS: &str = "SCENE_STRESS_THREADS";
/// Environment variable overriding the first scene index.
pub const ENV_SEED: &str = "SCENE_STRESS_SEED";

/// Problems loading a configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("cannot read {path}: {source}")]
    Io {
        /// File path.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The file is not valid JSON for this schema.
    #[error("cannot parse {path}: {source}")]
    Parse {
        /// File path.
        path: String,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },
    /// An environment variable holds an unparsable value.
    #[error("{var}={value} is not valid")]
    Env {
        /// Variable name.
        var: &'static str,
        /// Raw value.
        value: String,
    },
    /// A value is out of range.
    #[error("{0}")]
    Invalid(String),
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Self::new(ErrorKind::Config).with_message(e.to_string()).with_source(e)
    }
}

/// Every knob of a harness run.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Multiplies every scenario's base scene count.
    pub intensity: f64,
    /// Worker threads for threaded scenarios; `None` uses the available
    /// parallelism.
    pub threads: Option<usize>,
    /// Iterations per regression task.
    pub scenes_per_task: usize,
    /// Base scene count of regression scenarios.
    pub base_regression_scenes: usize,
    /// Base scene count of the garbage geometry scenario.
    pub garbage_scenes: usize,
    /// First scene index; every seed derives from scene indices.
    pub seed_base: u64,
    /// Mutation knobs.
    pub mutation: MutationConfig,
    /// Ray oracle batch shape.
    pub oracle: RayOracleConfig,
    /// Build devices with back-face culling.
    pub backface_culling: bool,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            intensity: 1.0,
            threads: None,
            scenes_per_task: 5,
            base_regression_scenes: 30,
            garbage_scenes: 1000,
            seed_base: 0,
            mutation: MutationConfig::default(),
            oracle: RayOracleConfig::default(),
            backface_culling: false,
        }
    }
}

fn parse_env<T: std::str::FromStr>(var: &'static str) -> Result<Option<T>, ConfigError> {
    match std::env::var(var) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Env { var, value }),
        Err(_) => Ok(None),
    }
}

impl HarnessConfig {
    /// Defaults with the environment applied.
    pub fn from_env() -> crate::Result<Self> {
        Self::default().with_env()
    }

    /// Loads a JSON file; missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> crate::Result<Self> {
        let path = path.as_ref();
        let display = path.display().to_string();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: display.clone(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: display,
            source,
        })?;
        tracing::debug!(path = %path.display(), "loaded harness config");
        Ok(config)
    }

    /// Overlays the `SCENE_STRESS_*` variables.
    pub fn with_env(mut self) -> crate::Result<Self> {
        if let Some(intensity) = parse_env(ENV_INTENSITY)? {
            self.intensity = intensity;
        }
        if let Some(threads) = parse_env(ENV_THREADS)? {
            self.threads = Some(threads);
        }
        if let Some(seed) = parse_env(ENV_SEED)? {
            self.seed_base = seed;
        }
        Ok(self)
    }

    /// Sets the intensity.
    #[must_use]
    pub const fn with_intensity(mut self, intensity: f64) -> Self {
        self.intensity = intensity;
        self
    }

    /// Sets the thread count.
    #[must_use]
    pub const fn with_threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads);
        self
    }

    /// Sets the first scene index.
    #[must_use]
    pub const fn with_seed_base(mut self, seed: u64) -> Self {
        self.seed_base = seed;
        self
    }

    /// Sets the mutation knobs.
    #[must_use]
    pub const fn with_mutation(mut self, mutation: MutationConfig) -> Self {
        self.mutation = mutation;
        self
    }

    /// Sets the ray oracle batch shape.
    #[must_use]
    pub const fn with_oracle(mut self, oracle: RayOracleConfig) -> Self {
        self.oracle = oracle;
        self
    }

    /// Sets the base scene counts of the regression and garbage scenarios.
    #[must_use]
    pub const fn with_scene_counts(mut self, regression: usize, garbage: usize) -> Self {
        self.base_regression_scenes = regression;
        self.garbage_scenes = garbage;
        self
    }

    /// Rejects values no scenario can run with.
    pub fn validate(&self) -> crate::Result<()> {
        if !self.intensity.is_finite() || self.intensity < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "intensity must be finite and non-negative, got {}",
                self.intensity
            ))
            .into());
        }
        if self.threads == Some(0) {
            return Err(ConfigError::Invalid("threads must be at least 1".into()).into());
        }
        if self.scenes_per_task == 0 {
            return Err(ConfigError::Invalid("scenes_per_task must be at least 1".into()).into());
        }
        if self.oracle.rays_per_batch == 0 || !self.oracle.extent.is_finite() {
            return Err(ConfigError::Invalid("oracle batch must be non-empty and finite".into()).into());
        }
        self.mutation.validate()
    }

    /// Worker threads for threaded scenarios.
    #[must_use]
    pub fn thread_count(&self) -> usize {
        self.threads
            .unwrap_or_else(|| std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get))
            .max(1)
    }

    /// `base` scaled by the intensity, rounded up so that a positive
    /// intensity never scales a scenario down to zero scenes.
    #[must_use]
    #[allow(clippy::cast_precision_loss, clippy::cast_sign_loss)]
    pub fn scaled(&self, base: usize) -> usize {
        (base as f64 * self.intensity).ceil() as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_validate() {
        let config = HarnessConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.scaled(30), 30);
        assert!(config.thread_count() >= 1);
    }

    #[test]
    fn intensity_scales_up() {
        let config = HarnessConfig::default().with_intensity(0.1);
        assert_eq!(config.scaled(30), 3);
        assert_eq!(config.scaled(1000), 100);
        assert_eq!(HarnessConfig::default().with_intensity(0.0).scaled(30), 0);
        assert_eq!(HarnessConfig::default().with_intensity(0.05).scaled(30), 2);
        assert_eq!(HarnessConfig::default().with_intensity(0.01).scaled(30), 1);
    }

    #[test]
    fn invalid_values_are_config_errors() {
        let bad = HarnessConfig::default().with_intensity(f64::NAN);
        assert_eq!(bad.validate().unwrap_err().kind(), ErrorKind::Config);
        let bad = HarnessConfig::default().with_threads(0);
        assert!(bad.validate().is_err());
        let bad = HarnessConfig {
            scenes_per_task: 0,
            ..HarnessConfig::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn json_file_fills_missing_fields() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(file, r#"{{"intensity": 0.5, "threads": 3, "mutation": {{"slot_count": 8}}}}"#).expect("write");
        let config = HarnessConfig::from_json_file(file.path()).expect("load");
        assert!((config.intensity - 0.5).abs() < f64::EPSILON);
        assert_eq!(config.threads, Some(3));
        assert_eq!(config.mutation.slot_count, 8);
        assert_eq!(config.mutation.dynamic_steps, 40);
        assert_eq!(config.scenes_per_task, 5);
    }

    #[test]
    fn environment_overlays_defaults() {
        let _guard = crate::test_utils::env_lock();
        std::env::set_var(ENV_INTENSITY, "0.25");
        std::env::set_var(ENV_THREADS, "6");
        std::env::set_var(ENV_SEED, "42");
        let config = HarnessConfig::from_env();
        std::env::set_var(ENV_THREADS, "many");
        let bad = HarnessConfig::from_env();
        for var in [ENV_INTENSITY, ENV_THREADS, ENV_SEED] {
            std::env::remove_var(var);
        }

        let config = config.expect("env config");
        assert!((config.intensity - 0.25).abs() < f64::EPSILON);
        assert_eq!(config.threads, Some(6));
        assert_eq!(config.seed_base, 42);
        let err = bad.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert!(err.to_string().contains("SCENE_STRESS_THREADS=many"));
    }

    #[test]
    fn unreadable_and_malformed_files() {
        let err = HarnessConfig::from_json_file("/nonexistent/scene-stress.json").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(file, "{{ not json").expect("write");
        let err = HarnessConfig::from_json_file(file.path()).unwrap_err();
        assert!(err.to_string().contains("cannot parse"));
    }
}
