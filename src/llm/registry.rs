use std::sync::Arc;
use std::time::Duration;

use crate::config::{BackendConfig, ProviderKind};
use crate::errors::{GroundingError, GroundingResult};
use crate::llm::provider::VisionBackend;
use crate::llm::providers::gemini::GeminiBackend;
use crate::llm::providers::openai_compatible::OpenAiCompatibleBackend;
use crate::llm::types::CallConfig;

/// Local OpenAI-compatible servers usually ignore the key but still expect
/// the header.
const PLACEHOLDER_API_KEY: &str = "not-needed";

/// Build the configured vision backend.
pub fn backend_from_config(config: &BackendConfig) -> GroundingResult<Arc<dyn VisionBackend>> {
    let call = CallConfig::deterministic(config.model_or_default());
    let timeout = Duration::from_secs(config.timeout_secs);
    let api_key = config.api_key.clone().filter(|k| !k.trim().is_empty());

    let backend: Arc<dyn VisionBackend> = match config.provider {
        ProviderKind::Google => {
            let api_key = api_key.ok_or_else(|| {
                GroundingError::Config("API_KEY is required for the google provider".into())
            })?;
            Arc::new(GeminiBackend::new(
                "google".into(),
                api_key,
                call,
                timeout,
                config.max_attempts,
            )?)
        }
        ProviderKind::Openai => Arc::new(OpenAiCompatibleBackend::new(
            "openai".into(),
            config.base_url.as_deref(),
            api_key.unwrap_or_else(|| PLACEHOLDER_API_KEY.to_string()),
            call,
            timeout,
            config.max_attempts,
        )?),
    };

    tracing::info!(backend = backend.name(), family = ?backend.family(), "vision backend ready");
    Ok(backend)
}
