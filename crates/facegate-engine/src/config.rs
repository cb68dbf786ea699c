use crate::engine::Thresholds;
use facegate_core::LocalizerParams;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

const CONFIG_FILE_VAR: &str = "FACEGATE_CONFIG";
const DEFAULT_CASCADE_PATH: &str =
    "/usr/share/opencv4/haarcascades/haarcascade_frontalface_default.xml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid value {value:?} for {key}")]
    InvalidEnv { key: &'static str, value: String },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Engine configuration: defaults, then an optional TOML file named by
/// `FACEGATE_CONFIG`, then `FACEGATE_*` environment variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Directory holding one `<name>.npy` descriptor per identity.
    pub store_dir: PathBuf,
    /// OpenCV Haar cascade XML for frontal faces.
    pub cascade_path: PathBuf,
    /// Minimum similarity accepted by authenticate.
    pub auth_threshold: f32,
    /// Similarity above which an enrollment counts as a duplicate face.
    pub duplicate_threshold: f32,
    /// Detector pyramid step.
    pub scale_factor: f64,
    /// Detector neighbor votes required per face.
    pub min_neighbors: usize,
    /// Smallest face edge in pixels.
    pub min_face_size: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self::defaults_from(&|key| std::env::var(key).ok())
    }
}

impl Config {
    /// Load from the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with(|key| std::env::var(key).ok())
    }

    /// Load using `lookup` in place of the process environment.
    pub fn load_with<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match lookup(CONFIG_FILE_VAR) {
            Some(path) => Self::from_file(path)?,
            None => Self::defaults_from(&lookup),
        };
        config.apply_env(&lookup)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML file. Missing keys keep their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&text).map_err(|source| ConfigError::Toml {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    fn defaults_from(lookup: &dyn Fn(&str) -> Option<String>) -> Self {
        let data_dir = lookup("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                let home = lookup("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("facegate");

        let thresholds = Thresholds::default();
        let params = LocalizerParams::default();
        Self {
            store_dir: data_dir.join("face_embeddings"),
            cascade_path: PathBuf::from(DEFAULT_CASCADE_PATH),
            auth_threshold: thresholds.auth,
            duplicate_threshold: thresholds.duplicate,
            scale_factor: params.scale_factor,
            min_neighbors: params.min_neighbors,
            min_face_size: params.min_size,
        }
    }

    fn apply_env(&mut self, lookup: &dyn Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(dir) = lookup("FACEGATE_STORE_DIR") {
            self.store_dir = PathBuf::from(dir);
        }
        if let Some(path) = lookup("FACEGATE_CASCADE_PATH") {
            self.cascade_path = PathBuf::from(path);
        }
        env_parse(lookup, "FACEGATE_AUTH_THRESHOLD", &mut self.auth_threshold)?;
        env_parse(lookup, "FACEGATE_DUPLICATE_THRESHOLD", &mut self.duplicate_threshold)?;
        env_parse(lookup, "FACEGATE_SCALE_FACTOR", &mut self.scale_factor)?;
        env_parse(lookup, "FACEGATE_MIN_NEIGHBORS", &mut self.min_neighbors)?;
        env_parse(lookup, "FACEGATE_MIN_FACE_SIZE", &mut self.min_face_size)?;
        Ok(())
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (key, value) in [
            ("auth_threshold", self.auth_threshold),
            ("duplicate_threshold", self.duplicate_threshold),
        ] {
            if !(-1.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid(format!(
                    "{key} must be within [-1, 1], got {value}"
                )));
            }
        }
        if !(self.scale_factor > 1.0 && self.scale_factor.is_finite()) {
            return Err(ConfigError::Invalid(format!(
                "scale_factor must be greater than 1, got {}",
                self.scale_factor
            )));
        }
        if self.min_face_size == 0 {
            return Err(ConfigError::Invalid("min_face_size must be positive".into()));
        }
        if self.duplicate_threshold <= self.auth_threshold {
            tracing::warn!(
                auth = self.auth_threshold,
                duplicate = self.duplicate_threshold,
                "duplicate threshold is not above auth threshold"
            );
        }
        Ok(())
    }

    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            auth: self.auth_threshold,
            duplicate: self.duplicate_threshold,
        }
    }

    pub fn localizer_params(&self) -> LocalizerParams {
        LocalizerParams {
            scale_factor: self.scale_factor,
            min_neighbors: self.min_neighbors,
            min_size: self.min_face_size,
        }
    }
}

fn env_parse<T: std::str::FromStr>(
    lookup: &dyn Fn(&str) -> Option<String>,
    key: &'static str,
    slot: &mut T,
) -> Result<(), ConfigError> {
    if let Some(value) = lookup(key) {
        *slot = value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidEnv { key, value })?;
    }
    Ok(())
}
