//! Simulator configuration
//!
//! Resolution order: `SIM_CONFIG_PATH`, then `simulator/config/simulator.toml`
//! searched upward from the working directory, then the built-in example.
//! `SIM_*` environment variables override individual fields afterwards.
//! A `.env` file (`SIM_ENV_FILE`, or the nearest one upward) is loaded first.

use serde::{Deserialize, Serialize};
use shared_types::EVENT_CHANNEL_PREFIX;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::actions::{ActionSettings, ExecutionMode};

const BUILTIN_CONFIG_TOML: &str = include_str!("../config/simulator.example.toml");
const DEFAULT_CONFIG_PATH: &str = "simulator/config/simulator.toml";
const ENV_FILE_NAME: &str = ".env";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum TransportKind {
    #[default]
    Stdio,
    Replay,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TransportConfig {
    pub kind: TransportKind,
    pub replay_path: Option<PathBuf>,
    pub replay_batch_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::Stdio,
            replay_path: None,
            replay_batch_size: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Empty until resolved; see [`SimulatorConfig::ensure_stream_id`]
    pub stream_id: String,
    pub source_uid: String,
    pub mode: ExecutionMode,
    pub strict: bool,
    pub tick_interval_ms: u64,
    pub receive_timeout_ms: u64,
    pub motion_duration_ms: i64,
    pub utterance_ms_per_char: i64,
    pub create_pipeline: bool,
    pub history_path: Option<PathBuf>,
    pub transport: TransportConfig,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            stream_id: String::new(),
            source_uid: "umim_tui_app".to_string(),
            mode: ExecutionMode::Active,
            strict: true,
            tick_interval_ms: 100,
            receive_timeout_ms: 200,
            motion_duration_ms: 2000,
            utterance_ms_per_char: 25,
            create_pipeline: false,
            history_path: None,
            transport: TransportConfig::default(),
        }
    }
}

impl SimulatorConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Event channel of this stream
    pub fn channel_id(&self) -> String {
        format!("{EVENT_CHANNEL_PREFIX}{}", self.stream_id)
    }

    pub fn ensure_stream_id(&mut self) {
        if self.stream_id.trim().is_empty() {
            self.stream_id = uuid::Uuid::new_v4().to_string();
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    pub fn action_settings(&self) -> ActionSettings {
        ActionSettings {
            mode: self.mode,
            motion_duration: chrono::Duration::milliseconds(self.motion_duration_ms),
            utterance_char_interval: chrono::Duration::milliseconds(self.utterance_ms_per_char),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "tick_interval_ms must be positive".to_string(),
            ));
        }
        if self.motion_duration_ms < 0 || self.utterance_ms_per_char < 0 {
            return Err(ConfigError::Invalid(
                "durations must not be negative".to_string(),
            ));
        }
        if self.transport.kind == TransportKind::Replay && self.transport.replay_path.is_none() {
            return Err(ConfigError::Invalid(
                "replay transport requires transport.replay_path".to_string(),
            ));
        }
        Ok(())
    }

    /// Apply `SIM_*` overrides; unparsable values are logged and ignored
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(stream_id) = get("SIM_STREAM_ID") {
            self.stream_id = stream_id;
        }
        if let Some(mode) = get("SIM_MODE") {
            override_parsed("SIM_MODE", &mode, &mut self.mode);
        }
        if let Some(value) = get("SIM_TICK_INTERVAL_MS") {
            override_parsed("SIM_TICK_INTERVAL_MS", &value, &mut self.tick_interval_ms);
        }
        if let Some(value) = get("SIM_RECEIVE_TIMEOUT_MS") {
            override_parsed(
                "SIM_RECEIVE_TIMEOUT_MS",
                &value,
                &mut self.receive_timeout_ms,
            );
        }
        if let Some(value) = get("SIM_TRANSPORT") {
            override_parsed("SIM_TRANSPORT", &value, &mut self.transport.kind);
        }
        if let Some(path) = get("SIM_REPLAY_PATH") {
            self.transport.replay_path = Some(PathBuf::from(path));
        }
        if let Some(path) = get("SIM_HISTORY_PATH") {
            self.history_path = Some(PathBuf::from(path));
        }
        if let Some(value) = get("SIM_CREATE_PIPELINE") {
            override_parsed("SIM_CREATE_PIPELINE", &value, &mut self.create_pipeline);
        }
    }
}

fn override_parsed<T: std::str::FromStr>(key: &str, value: &str, target: &mut T)
where
    T::Err: std::fmt::Display,
{
    match value.trim().parse::<T>() {
        Ok(parsed) => *target = parsed,
        Err(err) => {
            tracing::warn!(key = %key, value = %value, error = %err, "Ignoring invalid override")
        }
    }
}

/// Load `SIM_ENV_FILE` or the nearest `.env` into the process environment
///
/// Variables already set in the process win over the file. Returns the file
/// that was loaded, if any.
pub fn load_env_file() -> Option<PathBuf> {
    let path = match path_from_env("SIM_ENV_FILE") {
        Some(path) => path,
        None => {
            let cwd = match std::env::current_dir() {
                Ok(dir) => dir,
                Err(err) => {
                    tracing::warn!(error = %err, "No working directory to search for .env");
                    return None;
                }
            };
            let Some(path) = find_upward(&cwd, ENV_FILE_NAME) else {
                tracing::debug!(cwd = %cwd.display(), "No .env file above working directory");
                return None;
            };
            path
        }
    };

    match dotenvy::from_path(&path) {
        Ok(()) => {
            tracing::info!(path = %path.display(), "Loaded environment file");
            Some(path)
        }
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "Failed to load environment file");
            None
        }
    }
}

/// Load configuration the way the binary does, never failing
pub fn load_config() -> SimulatorConfig {
    let default_path = || {
        std::env::current_dir()
            .ok()
            .and_then(|cwd| find_upward(&cwd, DEFAULT_CONFIG_PATH))
    };

    let mut config = match path_from_env("SIM_CONFIG_PATH").or_else(default_path) {
        Some(path) => load_config_file(&path),
        None => built_in_config(),
    };

    config.apply_overrides(|key| std::env::var(key).ok());
    config.ensure_stream_id();
    config
}

fn load_config_file(path: &Path) -> SimulatorConfig {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "Failed to read simulator config; using built-in defaults"
            );
            return built_in_config();
        }
    };

    SimulatorConfig::from_toml_str(&content).unwrap_or_else(|err| {
        tracing::warn!(
            path = %path.display(),
            error = %err,
            "Failed to parse simulator config; using built-in defaults"
        );
        built_in_config()
    })
}

fn built_in_config() -> SimulatorConfig {
    SimulatorConfig::from_toml_str(BUILTIN_CONFIG_TOML).unwrap_or_else(|err| {
        tracing::error!(error = %err, "Failed to parse built-in simulator config");
        SimulatorConfig::default()
    })
}

fn path_from_env(key: &str) -> Option<PathBuf> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .map(PathBuf::from)
}

/// First `relative_path` file found in `start` or one of its ancestors
pub fn find_upward(start: &Path, relative_path: &str) -> Option<PathBuf> {
    let mut current = start.to_path_buf();
    loop {
        let candidate = current.join(relative_path);
        if candidate.is_file() {
            return Some(candidate);
        }
        if !current.pop() {
            return None;
        }
    }
}
