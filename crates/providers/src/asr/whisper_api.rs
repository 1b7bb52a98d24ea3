//! OpenAI-compatible Whisper transcription adapter.
//!
//! Speaks the `/v1/audio/transcriptions` multipart endpoint with
//! `verbose_json` output, which carries per-segment timings, average log
//! probabilities, and (when requested) word-level timestamps. The endpoint
//! does not diarize, so `speaker_id` is always `None` here.

use serde::Deserialize;

use es_domain::config::AsrProviderConfig;
use es_domain::error::{Error, Result};
use es_domain::transcript::{NewSegment, WordTiming};

use crate::traits::{AsrProvider, AsrRequest, AsrResponse};
use crate::util::{from_reqwest, resolve_key_env, vendor_status_error};

const DEFAULT_MODEL: &str = "whisper-1";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct WhisperApiProvider {
    name: String,
    base_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl WhisperApiProvider {
    pub fn from_config(cfg: &AsrProviderConfig) -> Result<Self> {
        let api_key = resolve_key_env(&cfg.key_env)?;
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(1800))
            .build()
            .map_err(from_reqwest)?;
        Ok(Self {
            name: cfg.name.clone(),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: cfg.model.clone().unwrap_or_else(|| DEFAULT_MODEL.into()),
            client,
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Deserialize)]
struct VerboseResponse {
    duration: Option<f64>,
    language: Option<String>,
    #[serde(default)]
    segments: Vec<WireSegment>,
    #[serde(default)]
    words: Vec<WireWord>,
}

#[derive(Deserialize)]
struct WireSegment {
    start: f64,
    end: f64,
    text: String,
    avg_logprob: Option<f64>,
}

#[derive(Deserialize)]
struct WireWord {
    word: String,
    start: f64,
    end: f64,
}

/// Whisper reports an average log probability per segment; `exp` of it is a
/// usable confidence proxy in `[0,1]`.
fn confidence_from_logprob(avg_logprob: Option<f64>) -> Option<f64> {
    avg_logprob.map(|lp| lp.exp().clamp(0.0, 1.0))
}

fn convert(resp: VerboseResponse) -> AsrResponse {
    let segments = resp
        .segments
        .iter()
        .map(|seg| {
            // Attach the words that fall inside this segment's time span.
            let words: Vec<WordTiming> = resp
                .words
                .iter()
                .filter(|w| w.start >= seg.start && w.end <= seg.end + 1e-6)
                .map(|w| WordTiming {
                    word: w.word.clone(),
                    start: w.start,
                    end: w.end,
                    confidence: None,
                })
                .collect();
            NewSegment {
                speaker_id: None,
                start_time: seg.start,
                end_time: seg.end,
                content: seg.text.trim().to_string(),
                confidence: confidence_from_logprob(seg.avg_logprob),
                words: if words.is_empty() { None } else { Some(words) },
            }
        })
        .collect();

    let duration = resp
        .duration
        .or_else(|| resp.segments.last().map(|s| s.end))
        .unwrap_or(0.0);

    AsrResponse {
        segments,
        duration_seconds: duration,
        language: resp.language,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// AsrProvider impl
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl AsrProvider for WhisperApiProvider {
    async fn transcribe(&self, req: AsrRequest) -> Result<AsrResponse> {
        let bytes = tokio::fs::read(&req.audio_path).await?;
        let file_name = req
            .audio_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio.wav".into());

        let mut form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(bytes).file_name(file_name),
            )
            .text("model", self.model.clone())
            .text("response_format", "verbose_json")
            .text("timestamp_granularities[]", "segment")
            .text("timestamp_granularities[]", "word");

        if let Some(ref lang) = req.language {
            if lang != "auto" {
                form = form.text("language", lang.clone());
            }
        }

        let url = format!("{}/v1/audio/transcriptions", self.base_url);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status().as_u16();
        let body = resp.text().await.map_err(from_reqwest)?;
        if status != 200 {
            return Err(vendor_status_error(&self.name, status, &body));
        }

        let wire: VerboseResponse = serde_json::from_str(&body).map_err(|e| {
            Error::VendorUnavailable {
                provider: self.name.clone(),
                message: format!("unparseable transcription response: {e}"),
            }
        })?;
        Ok(convert(wire))
    }

    fn provider_name(&self) -> &str {
        &self.name
    }
}
