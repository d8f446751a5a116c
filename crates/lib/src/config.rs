//! # Pipeline Configuration
//!
//! Model and backend selection for the pipeline steps, with a layered
//! resolution order: per-call overrides win over a config file named at call
//! time, which wins over the configuration the pipeline was built with,
//! which wins over the packaged defaults. Legacy key names are mapped to
//! their canonical forms once, at load time.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;
use tracing::info;

/// Conventional config file name looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = "imagemeta.json";

const PACKAGED_CONFIG: &str = include_str!("default_config.json");

/// Legacy config keys and the canonical names they map to. Applied once at
/// load time; a canonical key present in the same file always wins.
const ALIASES: [(&str, &str); 3] = [
    ("ac_model", "caption_model"),
    ("meta_text_model", "metadata_text_model"),
    ("meta_vision_model", "metadata_vision_model"),
];

/// A custom error type for configuration issues.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config from {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config from {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Unrecognized backend '{0}', expected one of: openrouter, local, ollama")]
    UnknownBackend(String),
}

/// The closed set of model-serving backends.
///
/// Backend identifiers are parsed exactly once, at the configuration
/// boundary; business logic only ever matches on this enum. An unrecognized
/// identifier is a configuration error, never a silent fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    OpenRouter,
    Local,
    Ollama,
}

impl FromStr for Backend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openrouter" => Ok(Self::OpenRouter),
            "local" => Ok(Self::Local),
            "ollama" => Ok(Self::Ollama),
            _ => Err(ConfigError::UnknownBackend(s.to_string())),
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::OpenRouter => "openrouter",
            Self::Local => "local",
            Self::Ollama => "ollama",
        };
        write!(f, "{name}")
    }
}

/// Fully-resolved settings for one pipeline invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Model for the alt-text/caption step.
    pub caption_model: String,
    /// Model for text-only metadata extraction (mode "double").
    pub metadata_text_model: String,
    /// Model for vision-grounded metadata extraction (mode "triple").
    pub metadata_vision_model: String,
    pub caption_backend: Backend,
    pub metadata_vision_backend: Backend,
    /// Model id loaded by the local inference backend.
    pub local_vlm_id: String,
    pub ollama_host: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            caption_model: "google/gemini-2.5-pro".to_string(),
            metadata_text_model: "google/gemini-2.5-pro".to_string(),
            metadata_vision_model: "google/gemini-2.5-pro".to_string(),
            caption_backend: Backend::OpenRouter,
            metadata_vision_backend: Backend::OpenRouter,
            local_vlm_id: "Qwen/Qwen2-VL-2B-Instruct".to_string(),
            ollama_host: "http://localhost:11434".to_string(),
        }
    }
}

/// A sparse configuration layer, as read from a file or supplied per call.
/// Backend values stay as strings here and are validated during overlay.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PartialConfig {
    pub caption_model: Option<String>,
    pub metadata_text_model: Option<String>,
    pub metadata_vision_model: Option<String>,
    pub caption_backend: Option<String>,
    pub metadata_vision_backend: Option<String>,
    pub local_vlm_id: Option<String>,
    pub ollama_host: Option<String>,
}

impl PipelineConfig {
    /// Loads configuration with the standard resolution order: an explicit
    /// path (which must be readable), then `imagemeta.json` in the current
    /// directory, then the packaged defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            info!("Loading pipeline config from {}", path.display());
            return Self::from_file(path);
        }
        let cwd_file = Path::new(CONFIG_FILE_NAME);
        if cwd_file.exists() {
            info!("Loading pipeline config from ./{CONFIG_FILE_NAME}");
            return Self::from_file(cwd_file);
        }
        let partial = parse_partial(PACKAGED_CONFIG).map_err(|source| ConfigError::Parse {
            path: "<packaged default>".to_string(),
            source,
        })?;
        Self::default().overlay(&partial)
    }

    /// Loads a config file and overlays it onto the hardcoded defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let partial = read_partial(path)?;
        Self::default().overlay(&partial)
    }

    /// Returns a copy of `self` with every key present in `partial` applied
    /// on top. Backend strings are validated here.
    pub fn overlay(&self, partial: &PartialConfig) -> Result<Self, ConfigError> {
        let mut merged = self.clone();
        if let Some(v) = &partial.caption_model {
            merged.caption_model = v.clone();
        }
        if let Some(v) = &partial.metadata_text_model {
            merged.metadata_text_model = v.clone();
        }
        if let Some(v) = &partial.metadata_vision_model {
            merged.metadata_vision_model = v.clone();
        }
        if let Some(v) = &partial.caption_backend {
            merged.caption_backend = v.parse()?;
        }
        if let Some(v) = &partial.metadata_vision_backend {
            merged.metadata_vision_backend = v.parse()?;
        }
        if let Some(v) = &partial.local_vlm_id {
            merged.local_vlm_id = v.clone();
        }
        if let Some(v) = &partial.ollama_host {
            merged.ollama_host = v.clone();
        }
        Ok(merged)
    }
}

/// Reads a sparse config layer from a JSON file, applying the legacy alias
/// table. An unreadable or unparsable file is an error, not a fallback.
pub fn read_partial(path: &Path) -> Result<PartialConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    parse_partial(&text).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}

fn parse_partial(text: &str) -> Result<PartialConfig, serde_json::Error> {
    let mut value: Value = serde_json::from_str(text)?;
    if let Value::Object(map) = &mut value {
        apply_aliases(map);
    }
    serde_json::from_value(value)
}

fn apply_aliases(map: &mut Map<String, Value>) {
    for (alias, canonical) in ALIASES {
        if let Some(v) = map.remove(alias) {
            map.entry(canonical.to_string()).or_insert(v);
        }
    }
}
