//! LLM vendor adapters.

mod anthropic;
mod openai_compat;
mod sse;

pub use anthropic::AnthropicProvider;
pub use openai_compat::OpenAiCompatProvider;
