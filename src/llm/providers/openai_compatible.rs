use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;

use crate::errors::{GroundingError, GroundingResult};
use crate::llm::prompt::json_instruction;
use crate::llm::provider::{with_retry, VisionBackend};
use crate::llm::types::{CallConfig, ChatMessage};
use crate::perception::types::ProviderFamily;

pub const DEFAULT_OPENAI_BASE: &str = "https://api.openai.com/v1";

/// OpenAI chat-completions backend. Also covers local and third-party
/// servers speaking the same protocol, which is why its output is treated as
/// permissive text rather than strict JSON.
pub struct OpenAiCompatibleBackend {
    id: String,
    endpoint: String,
    api_key: String,
    call: CallConfig,
    max_attempts: u32,
    client: reqwest::Client,
}

impl OpenAiCompatibleBackend {
    pub fn new(
        id: String,
        base_url: Option<&str>,
        api_key: String,
        call: CallConfig,
        timeout: Duration,
        max_attempts: u32,
    ) -> GroundingResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        tracing::info!(
            backend = %id,
            model = %call.model,
            endpoint = base_url.unwrap_or("default OpenAI endpoint"),
            "initialized OpenAI-compatible backend"
        );
        Ok(Self {
            id,
            endpoint: completions_endpoint(base_url.unwrap_or(DEFAULT_OPENAI_BASE)),
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
        let message = ChatMessage::user_with_image(format!("{prompt}\n{}", json_instruction()), &b64);
        serde_json::json!({
            "model": self.call.model,
            "messages": [message],
            "response_format": {"type": "json_object"},
            "temperature": self.call.temperature,
            "max_tokens": self.call.max_tokens,
        })
    }

    async fn send_once(&self, body: &serde_json::Value) -> GroundingResult<String> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let err_body = response.text().await.unwrap_or_default();
            return Err(GroundingError::Backend(format!("{status}: {err_body}")));
        }

        let json: serde_json::Value = response.json().await?;
        extract_message_content(&json)
    }
}

#[async_trait]
impl VisionBackend for OpenAiCompatibleBackend {
    fn name(&self) -> &str {
        &self.id
    }

    fn family(&self) -> ProviderFamily {
        ProviderFamily::PermissiveText
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

/// Accepts either an API root (`…/v1`) or the full completions URL.
fn completions_endpoint(base: &str) -> String {
    let base = base.trim_end_matches('/');
    if base.ends_with("/chat/completions") {
        base.to_string()
    } else {
        format!("{base}/chat/completions")
    }
}

fn extract_message_content(json: &serde_json::Value) -> GroundingResult<String> {
    let content = json["choices"][0]["message"]["content"].as_str().unwrap_or("");
    if content.trim().is_empty() {
        return Err(GroundingError::Backend("Empty response from model".into()));
    }
    Ok(content.to_string())
}
