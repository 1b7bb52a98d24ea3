use std::path::PathBuf;
use std::pin::Pin;
use std::time::Duration;

use es_domain::error::Result;
use es_domain::service::AsrVariant;
use es_domain::transcript::NewSegment;

/// A boxed async stream, used for LLM streaming responses.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ASR
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A transcription request against a locally available canonical audio file.
#[derive(Debug, Clone)]
pub struct AsrRequest {
    pub audio_path: PathBuf,
    /// Language hint (`auto` means vendor detection).
    pub language: Option<String>,
    pub diarization: bool,
    /// Quota lane this call is charged against.
    pub variant: AsrVariant,
}

/// The result of a transcription call.
#[derive(Debug, Clone)]
pub struct AsrResponse {
    pub segments: Vec<NewSegment>,
    /// Seconds of audio the vendor actually consumed. This is what gets
    /// committed against the quota lane.
    pub duration_seconds: f64,
    /// Detected language, when the vendor reports one.
    pub language: Option<String>,
}

/// Trait every ASR adapter must implement.
///
/// Implementations translate between our internal types and the wire format
/// of each vendor's HTTP API.
#[async_trait::async_trait]
pub trait AsrProvider: Send + Sync {
    /// Transcribe a local audio file and wait for the full result.
    async fn transcribe(&self, req: AsrRequest) -> Result<AsrResponse>;

    /// A unique identifier for this provider instance.
    fn provider_name(&self) -> &str;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// A provider-agnostic chat completion request.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    /// Sampling temperature. `None` lets the provider choose.
    pub temperature: Option<f32>,
    /// Maximum tokens in the response. `None` lets the provider choose.
    pub max_tokens: Option<u32>,
    /// Model identifier override. When `None`, the instance's bound model
    /// is used.
    pub model: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub model: String,
    pub input_tokens: Option<u32>,
    pub output_tokens: Option<u32>,
}

/// A chunk of streamed completion text.
#[derive(Debug, Clone)]
pub enum StreamChunk {
    Token(String),
    Done {
        input_tokens: Option<u32>,
        output_tokens: Option<u32>,
    },
}

/// Trait every LLM adapter must implement.
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    /// Send a chat completion request and wait for the full response.
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse>;

    /// Single-prompt convenience over [`Self::chat`].
    async fn generate(&self, prompt: &str, max_tokens: Option<u32>) -> Result<String> {
        let resp = self
            .chat(ChatRequest {
                messages: vec![ChatMessage::user(prompt)],
                max_tokens,
                ..Default::default()
            })
            .await?;
        Ok(resp.content)
    }

    /// Send a chat completion request and return a stream of chunks.
    async fn chat_stream(&self, req: ChatRequest) -> Result<BoxStream<'static, Result<StreamChunk>>>;

    /// The model this instance is bound to.
    fn model_name(&self) -> &str;

    /// Estimated cost in USD for the given token counts on the bound model.
    fn estimate_cost(&self, input_tokens: u32, output_tokens: u32) -> f64;

    fn provider_name(&self) -> &str;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Object storage
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Trait every object-store adapter must implement.
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put_object(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<()>;

    async fn get_object(&self, key: &str) -> Result<Vec<u8>>;

    /// A (possibly presigned) GET URL valid for `ttl`.
    async fn object_url(&self, key: &str, ttl: Duration) -> Result<String>;

    /// A presigned PUT URL valid for `ttl`.
    async fn presign_put(&self, key: &str, ttl: Duration, content_type: &str) -> Result<String>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Whether an object already exists at `key` (used for instant upload).
    async fn exists(&self, key: &str) -> Result<bool>;

    fn provider_name(&self) -> &str;
}

/// A bound client returned by registry instantiation.
#[derive(Clone)]
pub enum ServiceClient {
    Asr(std::sync::Arc<dyn AsrProvider>),
    Llm(std::sync::Arc<dyn LlmProvider>),
    Storage(std::sync::Arc<dyn ObjectStore>),
}

impl std::fmt::Debug for ServiceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceClient::Asr(p) => f.debug_tuple("Asr").field(&p.provider_name()).finish(),
            ServiceClient::Llm(p) => f.debug_tuple("Llm").field(&p.provider_name()).finish(),
            ServiceClient::Storage(p) => f.debug_tuple("Storage").field(&p.provider_name()).finish(),
        }
    }
}

impl ServiceClient {
    pub fn as_asr(&self) -> Option<std::sync::Arc<dyn AsrProvider>> {
        match self {
            ServiceClient::Asr(p) => Some(p.clone()),
            _ => None,
        }
    }

    pub fn as_llm(&self) -> Option<std::sync::Arc<dyn LlmProvider>> {
        match self {
            ServiceClient::Llm(p) => Some(p.clone()),
            _ => None,
        }
    }

    pub fn as_storage(&self) -> Option<std::sync::Arc<dyn ObjectStore>> {
        match self {
            ServiceClient::Storage(p) => Some(p.clone()),
            _ => None,
        }
    }
}
