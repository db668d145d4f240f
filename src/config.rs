use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::errors::{GroundingError, GroundingResult};
use crate::perception::box_validator::MIN_BOX_EDGE_PX;
use crate::perception::hierarchy::MIN_MERGE_IOU;
use crate::perception::preprocess::{MAX_DIMENSION, MAX_IMAGE_BYTES};

pub const CONFIG_FILE_NAME: &str = "grounding.toml";

pub const DEFAULT_GOOGLE_MODEL: &str = "models/gemini-flash-latest";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub backend: BackendConfig,
}

/// Thresholds of the normalization engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_max_image_bytes")]
    pub max_image_bytes: usize,
    #[serde(default = "default_max_dimension")]
    pub max_dimension: u32,
    /// Boxes thinner than this (either side, after clamping) are dropped.
    #[serde(default = "default_min_box_edge_px")]
    pub min_box_edge_px: f64,
    /// A visual element adopts a hierarchy node only above this IoU.
    #[serde(default = "default_min_merge_iou")]
    pub min_merge_iou: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_image_bytes: MAX_IMAGE_BYTES,
            max_dimension: MAX_DIMENSION,
            min_box_edge_px: MIN_BOX_EDGE_PX,
            min_merge_iou: MIN_MERGE_IOU,
        }
    }
}

fn default_max_image_bytes() -> usize {
    MAX_IMAGE_BYTES
}

fn default_max_dimension() -> u32 {
    MAX_DIMENSION
}

fn default_min_box_edge_px() -> f64 {
    MIN_BOX_EDGE_PX
}

fn default_min_merge_iou() -> f64 {
    MIN_MERGE_IOU
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    #[default]
    Google,
    Openai,
}

impl std::str::FromStr for ProviderKind {
    type Err = GroundingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "google" => Ok(ProviderKind::Google),
            "openai" => Ok(ProviderKind::Openai),
            other => Err(GroundingError::Config(format!(
                "Invalid GROUNDING_PROVIDER: {other}. Must be 'google' or 'openai'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default)]
    pub provider: ProviderKind,
    /// Falls back to the `API_KEY` environment variable.
    #[serde(default)]
    pub api_key: Option<String>,
    /// OpenAI-compatible endpoint root (e.g. a local server). Defaults to the
    /// provider's public endpoint.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Overrides the provider's default model.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            api_key: None,
            base_url: None,
            model: None,
            timeout_secs: default_timeout_secs(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl BackendConfig {
    pub fn model_or_default(&self) -> String {
        match self.model.as_deref().filter(|m| !m.is_empty()) {
            Some(m) => m.to_string(),
            None => match self.provider {
                ProviderKind::Google => DEFAULT_GOOGLE_MODEL.to_string(),
                ProviderKind::Openai => DEFAULT_OPENAI_MODEL.to_string(),
            },
        }
    }
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_max_attempts() -> u32 {
    3
}

fn resolve_config_path() -> Option<PathBuf> {
    if let Ok(exe) = std::env::current_exe() {
        if let Some(parent) = exe.parent() {
            let candidate = parent.join(CONFIG_FILE_NAME);
            if candidate.exists() {
                tracing::debug!(path = %candidate.display(), "config found next to executable");
                return Some(candidate);
            }
        }
    }

    let candidate = std::env::current_dir().ok()?.join(CONFIG_FILE_NAME);
    if candidate.exists() {
        tracing::debug!(path = %candidate.display(), "config found in working directory");
        return Some(candidate);
    }
    None
}

/// Load `grounding.toml` (defaults when absent), then apply `.env` and the
/// process environment on top.
pub fn load_config() -> GroundingResult<AppConfig> {
    // A missing .env is normal.
    let _ = dotenvy::dotenv();

    let mut config = match resolve_config_path() {
        Some(path) => {
            let content = std::fs::read_to_string(&path)?;
            let config: AppConfig = toml::from_str(&content)?;
            tracing::info!(path = %path.display(), "config loaded");
            config
        }
        None => {
            tracing::info!("no {CONFIG_FILE_NAME} found, using defaults");
            AppConfig::default()
        }
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    tracing::info!(
        provider = ?config.backend.provider,
        model = %config.backend.model_or_default(),
        "backend configured"
    );
    Ok(config)
}

/// Environment variables: `GROUNDING_PROVIDER`, `API_KEY`, `BASE_URL`,
/// `MODEL_NAME`. Empty values are ignored.
pub fn apply_env_overrides<F>(config: &mut AppConfig, lookup: F) -> GroundingResult<()>
where
    F: Fn(&str) -> Option<String>,
{
    let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(provider) = var("GROUNDING_PROVIDER") {
        config.backend.provider = provider.parse()?;
    }
    if let Some(key) = var("API_KEY") {
        config.backend.api_key = Some(key);
    }
    if let Some(url) = var("BASE_URL") {
        config.backend.base_url = Some(url);
    }
    if let Some(model) = var("MODEL_NAME") {
        config.backend.model = Some(model);
    }
    Ok(())
}

pub fn parse_config(content: &str) -> GroundingResult<AppConfig> {
    Ok(toml::from_str(content)?)
}
