use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;

use crate::errors::{GroundingError, GroundingResult};
use crate::llm::prompt::gemini_response_schema;
use crate::llm::provider::{with_retry, VisionBackend};
use crate::llm::types::CallConfig;
use crate::perception::types::ProviderFamily;

pub const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Google Gemini `generateContent` backend with schema-constrained JSON output.
pub struct GeminiBackend {
    id: String,
    endpoint: String,
    api_key: String,
    call: CallConfig,
    max_attempts: u32,
    client: reqwest::Client,
}

impl GeminiBackend {
    pub fn new(
        id: String,
        api_key: String,
        call: CallConfig,
        timeout: Duration,
        max_attempts: u32,
    ) -> GroundingResult<Self> {
        if api_key.trim().is_empty() {
            return Err(GroundingError::Config(
                "API_KEY is required for the google provider".into(),
            ));
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let endpoint = generate_endpoint(&call.model);
        tracing::info!(backend = %id, model = %call.model, "initialized Gemini backend");
        Ok(Self {
            id,
            endpoint,
            api_key,
            call,
            max_attempts,
            client,
        })
    }

    pub fn model(&self) -> &str {
        &self.call.model
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn request_body(&self, image_png: &[u8], prompt: &str) -> serde_json::Value {
        let b64 = base64::engine::general_purpose::STANDARD.encode(image_png);
        serde_json::json!({
            "contents": [{
                "role": "user",
                "parts": [
                    {"inline_data": {"mime_type": "image/png", "data": b64}},
                    {"text": prompt},
                ],
            }],
            "generationConfig": {
                "responseMimeType": "application/json",
                "responseSchema": gemini_response_schema(),
                "temperature": self.call.temperature,
                "maxOutputTokens": self.call.max_tokens,
            },
        })
    }

    async fn send_once(&self, body: &serde_json::Value) -> GroundingResult<String> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let err_body = response.text().await.unwrap_or_default();
            return Err(GroundingError::Backend(format!("{status}: {err_body}")));
        }

        let json: serde_json::Value = response.json().await?;
        extract_candidate_text(&json)
    }
}

#[async_trait]
impl VisionBackend for GeminiBackend {
    fn name(&self) -> &str {
        &self.id
    }

    fn family(&self) -> ProviderFamily {
        ProviderFamily::NativeStructured
    }

    async fn describe(&self, image_png: &[u8], prompt: &str) -> GroundingResult<String> {
        let body = self.request_body(image_png, prompt);
        tracing::debug!(
            backend = %self.id,
            model = %self.call.model,
            image_bytes = image_png.len(),
            "sending vision request"
        );
        let (this, body) = (self, &body);
        let content = with_retry(&self.id, self.max_attempts, Duration::from_secs(1), move || {
            this.send_once(body)
        })
        .await?;
        tracing::info!(backend = %self.id, content_len = content.len(), "vision response received");
        Ok(content)
    }
}

/// Model ids are accepted with or without the `models/` prefix.
fn generate_endpoint(model: &str) -> String {
    let model = model.trim().trim_start_matches('/');
    if model.starts_with("models/") {
        format!("{GEMINI_API_BASE}/{model}:generateContent")
    } else {
        format!("{GEMINI_API_BASE}/models/{model}:generateContent")
    }
}

fn extract_candidate_text(json: &serde_json::Value) -> GroundingResult<String> {
    if let Some(reason) = json["promptFeedback"]["blockReason"].as_str() {
        return Err(GroundingError::Backend(format!("Prompt blocked: {reason}")));
    }

    let candidate = &json["candidates"][0];
    let text: String = candidate["content"]["parts"]
        .as_array()
        .map(|parts| parts.iter().filter_map(|p| p["text"].as_str()).collect())
        .unwrap_or_default();

    if text.trim().is_empty() {
        let reason = candidate["finishReason"].as_str().unwrap_or("no candidates");
        return Err(GroundingError::Backend(format!(
            "Empty response from model ({reason})"
        )));
    }
    Ok(text)
}
