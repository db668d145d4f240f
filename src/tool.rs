/// Tool-call surface for automation agents: a base64 screenshot in, a
/// grounded element list out.
use std::sync::Arc;

use tracing::Instrument;

use crate::config::AppConfig;
use crate::errors::{GroundingError, GroundingResult};
use crate::llm::prompt::GROUNDING_PROMPT;
use crate::llm::provider::VisionBackend;
use crate::llm::registry::backend_from_config;
use crate::perception::pipeline::Normalizer;
use crate::perception::preprocess::{decode_base64, decode_image};
use crate::perception::types::NormalizeResult;

pub struct GroundingTool {
    backend: Arc<dyn VisionBackend>,
    normalizer: Normalizer,
}

impl GroundingTool {
    pub fn new(backend: Arc<dyn VisionBackend>, normalizer: Normalizer) -> Self {
        Self { backend, normalizer }
    }

    pub fn from_config(config: &AppConfig) -> GroundingResult<Self> {
        let backend = backend_from_config(&config.backend)?;
        Ok(Self::new(backend, Normalizer::new(config.engine.clone())))
    }

    pub async fn analyze_screenshot(&self, image_base64: &str) -> GroundingResult<NormalizeResult> {
        self.analyze_screenshot_with_hierarchy(image_base64, None).await
    }

    /// Like [`analyze_screenshot`](Self::analyze_screenshot), merging the
    /// device's UI hierarchy dump when one is supplied.
    pub async fn analyze_screenshot_with_hierarchy(
        &self,
        image_base64: &str,
        hierarchy_xml: Option<&str>,
    ) -> GroundingResult<NormalizeResult> {
        let request_id = uuid::Uuid::new_v4();
        let span = tracing::info_span!(
            "analyze_screenshot",
            %request_id,
            backend = self.backend.name(),
            with_hierarchy = hierarchy_xml.is_some()
        );
        self.analyze(image_base64, hierarchy_xml).instrument(span).await
    }

    async fn analyze(
        &self,
        image_base64: &str,
        hierarchy_xml: Option<&str>,
    ) -> GroundingResult<NormalizeResult> {
        let bytes = decode_base64(image_base64)?;
        let image = decode_image(&bytes, &self.normalizer.image_limits())?;
        let png = image.to_png()?;
        tracing::debug!(
            width = image.width,
            height = image.height,
            format = ?image.format,
            png_bytes = png.len(),
            "screenshot prepared"
        );

        let response = self
            .backend
            .describe(&png, GROUNDING_PROMPT)
            .await
            .map_err(as_provider_error)?;

        Ok(self.normalizer.normalize_with_dimensions(
            image.width,
            image.height,
            &response,
            self.backend.family(),
            hierarchy_xml,
        ))
    }

    /// [`analyze_screenshot`](Self::analyze_screenshot) rendered as the JSON
    /// text returned to the calling agent.
    pub async fn analyze_screenshot_json(&self, image_base64: &str) -> String {
        render(self.analyze_screenshot(image_base64).await)
    }

    pub async fn analyze_screenshot_with_hierarchy_json(
        &self,
        image_base64: &str,
        hierarchy_xml: Option<&str>,
    ) -> String {
        render(
            self.analyze_screenshot_with_hierarchy(image_base64, hierarchy_xml)
                .await,
        )
    }
}

/// Anything the backend raises other than a configuration problem is
/// reported as a provider failure.
fn as_provider_error(e: GroundingError) -> GroundingError {
    match e {
        GroundingError::Config(_) | GroundingError::Backend(_) | GroundingError::Http(_) => e,
        other => GroundingError::Backend(other.to_string()),
    }
}

/// Error envelope: `{"error": <code>, "message": <text>}`.
pub fn error_envelope(e: &GroundingError) -> serde_json::Value {
    serde_json::json!({
        "error": e.code(),
        "message": e.to_string(),
    })
}

fn render(result: GroundingResult<NormalizeResult>) -> String {
    let value = match result {
        Ok(result) => serde_json::to_value(&result).map_err(GroundingError::from),
        Err(e) => Err(e),
    };
    let value = value.unwrap_or_else(|e| {
        tracing::error!(code = e.code(), error = %e, "grounding request failed");
        error_envelope(&e)
    });
    serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string())
}
