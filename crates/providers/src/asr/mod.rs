//! ASR vendor adapters.

mod deepgram;
mod whisper_api;

pub use deepgram::DeepgramProvider;
pub use whisper_api::WhisperApiProvider;
