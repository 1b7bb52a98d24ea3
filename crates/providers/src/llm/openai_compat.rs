//! OpenAI-compatible chat completions adapter.
//!
//! Covers every vendor that speaks the `/v1/chat/completions` wire format.
//! Each instance is bound to one model at instantiation; pricing for that
//! model comes from the provider's declared model table.

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

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    model: String,
    pricing: ModelPricing,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Build an instance bound to `model_id`, or the provider's default
    /// model when `None`.
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

    fn build_body(&self, req: &ChatRequest, stream: bool) -> serde_json::Value {
        let messages: Vec<serde_json::Value> = req
            .messages
            .iter()
            .map(|m| {
                json!({
                    "role": match m.role {
                        Role::System => "system",
                        Role::User => "user",
                        Role::Assistant => "assistant",
                    },
                    "content": m.content,
                })
            })
            .collect();

        let mut body = json!({
            "model": req.model.clone().unwrap_or_else(|| self.model.clone()),
            "messages": messages,
            "stream": stream,
        });
        if let Some(t) = req.temperature {
            body["temperature"] = json!(t);
        }
        if let Some(m) = req.max_tokens {
            body["max_tokens"] = json!(m);
        }
        body
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Deserialize)]
struct CompletionResponse {
    model: Option<String>,
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct StreamFrame {
    choices: Vec<StreamChoice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: Delta,
}

#[derive(Deserialize)]
struct Delta {
    content: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LlmProvider impl
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl LlmProvider for OpenAiCompatProvider {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&self.build_body(&req, false))
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status().as_u16();
        let body = resp.text().await.map_err(from_reqwest)?;
        if status != 200 {
            return Err(vendor_status_error(&self.name, status, &body));
        }

        let wire: CompletionResponse =
            serde_json::from_str(&body).map_err(|e| Error::VendorUnavailable {
                provider: self.name.clone(),
                message: format!("unparseable completion response: {e}"),
            })?;

        let content = wire
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();

        Ok(ChatResponse {
            content,
            model: wire.model.unwrap_or_else(|| self.model.clone()),
            input_tokens: wire.usage.as_ref().and_then(|u| u.prompt_tokens),
            output_tokens: wire.usage.as_ref().and_then(|u| u.completion_tokens),
        })
    }

    async fn chat_stream(
        &self,
        req: ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamChunk>>> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
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
            let mut usage: Option<(Option<u32>, Option<u32>)> = None;
            while let Some(chunk) = bytes.next().await {
                let chunk = chunk.map_err(from_reqwest)?;
                lines.push(&chunk);
                while let Some(line) = lines.next_line() {
                    let Some(data) = sse_data(&line) else { continue };
                    if data == "[DONE]" {
                        let (input, output) = usage.unwrap_or((None, None));
                        yield StreamChunk::Done { input_tokens: input, output_tokens: output };
                        return;
                    }
                    if let Ok(frame) = serde_json::from_str::<StreamFrame>(data) {
                        if let Some(u) = frame.usage {
                            usage = Some((u.prompt_tokens, u.completion_tokens));
                        }
                        if let Some(text) = frame
                            .choices
                            .first()
                            .and_then(|c| c.delta.content.clone())
                        {
                            if !text.is_empty() {
                                yield StreamChunk::Token(text);
                            }
                        }
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_response_parses() {
        let wire: CompletionResponse = serde_json::from_str(
            r#"{
                "model": "gpt-4o-mini",
                "choices": [{"message": {"role": "assistant", "content": "hello"}}],
                "usage": {"prompt_tokens": 12, "completion_tokens": 3}
            }"#,
        )
        .unwrap();
        assert_eq!(wire.choices[0].message.content.as_deref(), Some("hello"));
        assert_eq!(wire.usage.unwrap().prompt_tokens, Some(12));
    }

    #[test]
    fn stream_frame_parses_delta() {
        let frame: StreamFrame =
            serde_json::from_str(r#"{"choices":[{"delta":{"content":"to"}}]}"#).unwrap();
        assert_eq!(frame.choices[0].delta.content.as_deref(), Some("to"));
    }
}
