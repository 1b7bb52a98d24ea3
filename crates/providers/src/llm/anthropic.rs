//! Anthropic-native Messages API adapter.
//!
//! System messages go in the top-level `system` field, `max_tokens` is
//! mandatory, and streaming uses typed SSE events rather than raw deltas.

use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::json;

use es_domain::config::{LlmProviderConfig, ModelPricing};
use es_domain::error::{Error, Result};

use crate::llm::sse::{sse_data, LineBuffer};
use crate::traits::{
    BoxStream, ChatRequest, ChatResponse, LlmProvider, Role, StreamChunk,
};
use crate::util::{from_reqwest, resolve_key_env, vendor_status_error};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct AnthropicProvider {
    name: String,
    base_url: String,
    api_key: String,
    model: String,
    pricing: ModelPricing,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn from_config(cfg: &LlmProviderConfig, model_id: Option<&str>) -> Result<Self> {
        let api_key = resolve_key_env(&cfg.key_env)?;
        let model = model_id
            .map(str::to_string)
            .or_else(|| cfg.default_model.clone())
            .or_else(|| cfg.models.keys().next().cloned())
            .ok_or_else(|| {
                Error::Config(format!("provider {} declares no models", cfg.name))
            })?;
        let pricing = cfg.models.get(&model).copied().unwrap_or_default();
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .map_err(from_reqwest)?;
        Ok(Self {
            name: cfg.name.clone(),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
            pricing,
            client,
        })
    }

    fn authed_post(&self, url: &str) -> reqwest::RequestBuilder {
        self.client
            .post(url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
    }

    fn build_body(&self, req: &ChatRequest, stream: bool) -> serde_json::Value {
        // Separate out system messages.
        let mut system_parts: Vec<&str> = Vec::new();
        let mut api_messages: Vec<serde_json::Value> = Vec::new();
        for msg in &req.messages {
            match msg.role {
                Role::System => system_parts.push(&msg.content),
                Role::User => api_messages.push(json!({"role": "user", "content": msg.content})),
                Role::Assistant => {
                    api_messages.push(json!({"role": "assistant", "content": msg.content}));
                }
            }
        }

        let mut body = json!({
            "model": req.model.clone().unwrap_or_else(|| self.model.clone()),
            "messages": api_messages,
            "max_tokens": req.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "stream": stream,
        });
        if !system_parts.is_empty() {
            body["system"] = json!(system_parts.join("\n\n"));
        }
        if let Some(t) = req.temperature {
            body["temperature"] = json!(t);
        }
        body
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Deserialize)]
struct MessagesResponse {
    model: Option<String>,
    #[serde(default)]
    content: Vec<ContentBlock>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    input_tokens: Option<u32>,
    output_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct StreamEvent {
    #[serde(rename = "type")]
    kind: String,
    delta: Option<StreamDelta>,
    usage: Option<Usage>,
    message: Option<StreamMessage>,
}

#[derive(Deserialize)]
struct StreamDelta {
    text: Option<String>,
}

#[derive(Deserialize)]
struct StreamMessage {
    usage: Option<Usage>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LlmProvider impl
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl LlmProvider for AnthropicProvider {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse> {
        let url = format!("{}/v1/messages", self.base_url);
        let resp = self
            .authed_post(&url)
            .json(&self.build_body(&req, false))
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status().as_u16();
        let body = resp.text().await.map_err(from_reqwest)?;
        if status != 200 {
            return Err(vendor_status_error(&self.name, status, &body));
        }

        let wire: MessagesResponse =
            serde_json::from_str(&body).map_err(|e| Error::VendorUnavailable {
                provider: self.name.clone(),
                message: format!("unparseable messages response: {e}"),
            })?;

        let content = wire
            .content
            .iter()
            .filter(|b| b.kind == "text")
            .filter_map(|b| b.text.as_deref())
            .collect::<Vec<_>>()
            .join("");

        Ok(ChatResponse {
            content,
            model: wire.model.unwrap_or_else(|| self.model.clone()),
            input_tokens: wire.usage.as_ref().and_then(|u| u.input_tokens),
            output_tokens: wire.usage.as_ref().and_then(|u| u.output_tokens),
        })
    }

    async fn chat_stream(
        &self,
        req: ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamChunk>>> {
        let url = format!("{}/v1/messages", self.base_url);
        let resp = self
            .authed_post(&url)
            .json(&self.build_body(&req, true))
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status().as_u16();
        if status != 200 {
            let body = resp.text().await.unwrap_or_default();
            return Err(vendor_status_error(&self.name, status, &body));
        }

        let mut bytes = resp.bytes_stream();
        let stream = async_stream::try_stream! {
            let mut lines = LineBuffer::default();
            let mut input_tokens: Option<u32> = None;
            let mut output_tokens: Option<u32> = None;
            while let Some(chunk) = bytes.next().await {
                let chunk = chunk.map_err(from_reqwest)?;
                lines.push(&chunk);
                while let Some(line) = lines.next_line() {
                    let Some(data) = sse_data(&line) else { continue };
                    let Ok(event) = serde_json::from_str::<StreamEvent>(data) else {
                        continue;
                    };
                    match event.kind.as_str() {
                        "message_start" => {
                            if let Some(u) = event.message.and_then(|m| m.usage) {
                                input_tokens = u.input_tokens;
                            }
                        }
                        "content_block_delta" => {
                            if let Some(text) = event.delta.and_then(|d| d.text) {
                                if !text.is_empty() {
                                    yield StreamChunk::Token(text);
                                }
                            }
                        }
                        "message_delta" => {
                            if let Some(u) = event.usage {
                                output_tokens = u.output_tokens.or(output_tokens);
                            }
                        }
                        "message_stop" => {
                            yield StreamChunk::Done { input_tokens, output_tokens };
                            return;
                        }
                        _ => {}
                    }
                }
            }
        };
        Ok(Box::pin(stream))
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn estimate_cost(&self, input_tokens: u32, output_tokens: u32) -> f64 {
        self.pricing.estimate_cost(input_tokens, output_tokens)
    }

    fn provider_name(&self) -> &str {
        &self.name
    }
}
