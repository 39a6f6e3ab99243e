use serde::Deserialize;
use std::path::{Component, Path, PathBuf};

use crate::error::ConfigError;

pub const DEFAULT_NAME: &str = "hotword_pocketsphinx";
pub const DEFAULT_ACOUSTIC_MODEL: &str = "/usr/share/pocketsphinx/model/en-us/en-us/";
pub const DEFAULT_DICTIONARY: &str = "/usr/share/pocketsphinx/model/en-us/cmudict-en-us.dict";
pub const DEFAULT_THRESHOLD: f64 = 1e-40;
pub const DEFAULT_SAMPLE_RATE: u32 = 16000;
pub const DEFAULT_BUFFER_SIZE: usize = 2048;
pub const DEFAULT_SCORE_THRESHOLD: f32 = 0.5;

/// Looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "hotword.toml";
/// Environment overrides, e.g. `HOTWORD_HOTWORD`, `HOTWORD_BRIDGE__LOCAL_PORT`.
pub const ENV_PREFIX: &str = "HOTWORD";

// Recommended keyphrase likelihood range
const THRESHOLD_RECOMMENDED_MIN: f64 = 1e-50;
const THRESHOLD_RECOMMENDED_MAX: f64 = 1e-5;

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct HotwordConfig {
    /// Logical name carried by detection events
    #[serde(default = "default_name")]
    pub name: String,

    /// Word or phrase to listen for
    pub hotword: String,

    // Keyword spotter model files
    #[serde(default = "default_acoustic_model")]
    pub acoustic_model: PathBuf,
    #[serde(default = "default_dictionary")]
    pub dictionary: PathBuf,

    /// Keyphrase likelihood threshold, lower values trade misses for false positives
    #[serde(default = "default_threshold")]
    pub threshold: f64,

    /// Minimum score for spotters that report a normalized score instead of a likelihood
    #[serde(default = "default_score_threshold")]
    pub score_threshold: f32,

    /// Capture device name, `None` selects the system default
    #[serde(default)]
    pub audio_device: Option<String>,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    /// Bytes handed to the decoder per read
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    #[serde(default)]
    pub bridge: BridgeConfig,
}

/// Local UDP control surface used by the host process.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct BridgeConfig {
    #[serde(default = "default_bridge_local_port")]
    pub local_port: u16,
    #[serde(default = "default_bridge_remote_addr")]
    pub remote_addr: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            local_port: default_bridge_local_port(),
            remote_addr: default_bridge_remote_addr(),
        }
    }
}

fn default_name() -> String {
    DEFAULT_NAME.to_string()
}

fn default_acoustic_model() -> PathBuf {
    PathBuf::from(DEFAULT_ACOUSTIC_MODEL)
}

fn default_dictionary() -> PathBuf {
    PathBuf::from(DEFAULT_DICTIONARY)
}

fn default_threshold() -> f64 {
    DEFAULT_THRESHOLD
}

fn default_score_threshold() -> f32 {
    DEFAULT_SCORE_THRESHOLD
}

fn default_sample_rate() -> u32 {
    DEFAULT_SAMPLE_RATE
}

fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}

fn default_bridge_local_port() -> u16 {
    5680
}

fn default_bridge_remote_addr() -> String {
    "127.0.0.1:5681".to_string()
}

impl HotwordConfig {
    /// Configuration with every optional key at its default.
    pub fn new(hotword: impl Into<String>) -> Self {
        Self {
            name: default_name(),
            hotword: hotword.into(),
            acoustic_model: default_acoustic_model(),
            dictionary: default_dictionary(),
            threshold: default_threshold(),
            score_threshold: default_score_threshold(),
            audio_device: None,
            sample_rate: default_sample_rate(),
            buffer_size: default_buffer_size(),
            bridge: BridgeConfig::default(),
        }
    }

    /// Load from an optional TOML file layered under `HOTWORD_*` environment variables.
    ///
    /// An explicit `path` must exist; without one, `hotword.toml` in the working
    /// directory is read if present.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_env(path, environment())
    }

    pub(crate) fn load_with_env(
        path: Option<&Path>,
        env: config::Environment,
    ) -> Result<Self, ConfigError> {
        let file = match path {
            Some(p) => config::File::from(p).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };
        let settings = config::Config::builder()
            .add_source(file)
            .add_source(env)
            .build()?;
        Self::from_settings(settings)
    }

    /// Parse a TOML document, without environment overrides.
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()?;
        Self::from_settings(settings)
    }

    fn from_settings(settings: config::Config) -> Result<Self, ConfigError> {
        let mut cfg: HotwordConfig = settings.try_deserialize()?;
        cfg.acoustic_model = expand_home(&cfg.acoustic_model);
        cfg.dictionary = expand_home(&cfg.dictionary);
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::invalid("name", "must not be empty"));
        }
        if self.hotword.trim().is_empty() {
            return Err(ConfigError::invalid("hotword", "must not be empty"));
        }
        if !(self.threshold > 0.0 && self.threshold < 1.0) {
            return Err(ConfigError::invalid(
                "threshold",
                format!("{} is outside (0, 1)", self.threshold),
            ));
        }
        if !(THRESHOLD_RECOMMENDED_MIN..=THRESHOLD_RECOMMENDED_MAX).contains(&self.threshold) {
            log::warn!(
                "threshold {} is outside the recommended range {}..{}",
                self.threshold,
                THRESHOLD_RECOMMENDED_MIN,
                THRESHOLD_RECOMMENDED_MAX
            );
        }
        if !(self.score_threshold > 0.0 && self.score_threshold <= 1.0) {
            return Err(ConfigError::invalid(
                "score_threshold",
                format!("{} is outside (0, 1]", self.score_threshold),
            ));
        }
        if self.sample_rate == 0 {
            return Err(ConfigError::invalid("sample_rate", "must be positive"));
        }
        if self.buffer_size == 0 {
            return Err(ConfigError::invalid("buffer_size", "must be positive"));
        }
        // Frames carry S16LE samples
        if self.buffer_size % 2 != 0 {
            return Err(ConfigError::invalid(
                "buffer_size",
                "must hold whole 16-bit samples (even byte count)",
            ));
        }
        Ok(())
    }

    /// Key under which the listening status is published.
    pub fn entity_id(&self) -> String {
        format!("{}.decoder", self.name)
    }
}

fn environment() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

/// Replace a leading `~` with the user's home directory.
fn expand_home(path: &Path) -> PathBuf {
    let mut components = path.components();
    match components.next() {
        Some(Component::Normal(first)) if first == "~" => match dirs::home_dir() {
            Some(home) => home.join(components.as_path()),
            None => path.to_path_buf(),
        },
        _ => path.to_path_buf(),
    }
}
