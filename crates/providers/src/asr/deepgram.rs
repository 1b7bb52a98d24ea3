//! Deepgram-style prerecorded transcription adapter.
//!
//! Posts raw audio bytes to the `/v1/listen` endpoint with `utterances`
//! enabled. Utterances carry speaker labels when diarization is on, which is
//! what the transcript processor's same-speaker merging feeds on.

use serde::Deserialize;

use es_domain::config::AsrProviderConfig;
use es_domain::error::{Error, Result};
use es_domain::transcript::{NewSegment, WordTiming};

use crate::traits::{AsrProvider, AsrRequest, AsrResponse};
use crate::util::{from_reqwest, resolve_key_env, vendor_status_error};

const DEFAULT_MODEL: &str = "nova-2";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct DeepgramProvider {
    name: String,
    base_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl DeepgramProvider {
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
struct ListenResponse {
    metadata: Option<Metadata>,
    results: Option<Results>,
}

#[derive(Deserialize)]
struct Metadata {
    duration: Option<f64>,
}

#[derive(Deserialize)]
struct Results {
    #[serde(default)]
    utterances: Vec<Utterance>,
    #[serde(default)]
    channels: Vec<Channel>,
}

#[derive(Deserialize)]
struct Utterance {
    start: f64,
    end: f64,
    transcript: String,
    confidence: Option<f64>,
    speaker: Option<u32>,
    #[serde(default)]
    words: Vec<WireWord>,
}

#[derive(Deserialize)]
struct Channel {
    #[serde(default)]
    alternatives: Vec<Alternative>,
}

#[derive(Deserialize)]
struct Alternative {
    transcript: String,
    confidence: Option<f64>,
    #[serde(default)]
    words: Vec<WireWord>,
}

#[derive(Deserialize)]
struct WireWord {
    word: String,
    start: f64,
    end: f64,
    confidence: Option<f64>,
}

fn words_of(words: &[WireWord]) -> Option<Vec<WordTiming>> {
    if words.is_empty() {
        return None;
    }
    Some(
        words
            .iter()
            .map(|w| WordTiming {
                word: w.word.clone(),
                start: w.start,
                end: w.end,
                confidence: w.confidence,
            })
            .collect(),
    )
}

fn convert(resp: ListenResponse, diarization: bool) -> AsrResponse {
    let duration = resp
        .metadata
        .as_ref()
        .and_then(|m| m.duration)
        .unwrap_or(0.0);

    let results = match resp.results {
        Some(r) => r,
        None => {
            return AsrResponse {
                segments: vec![],
                duration_seconds: duration,
                language: None,
            }
        }
    };

    let segments: Vec<NewSegment> = if !results.utterances.is_empty() {
        results
            .utterances
            .iter()
            .map(|u| NewSegment {
                speaker_id: if diarization {
                    u.speaker.map(|s| format!("speaker_{s}"))
                } else {
                    None
                },
                start_time: u.start,
                end_time: u.end,
                content: u.transcript.trim().to_string(),
                confidence: u.confidence,
                words: words_of(&u.words),
            })
            .collect()
    } else {
        // No utterances: fall back to one segment per channel alternative.
        results
            .channels
            .iter()
            .flat_map(|c| c.alternatives.first())
            .map(|a| NewSegment {
                speaker_id: None,
                start_time: 0.0,
                end_time: duration,
                content: a.transcript.trim().to_string(),
                confidence: a.confidence,
                words: words_of(&a.words),
            })
            .collect()
    };

    AsrResponse {
        segments,
        duration_seconds: duration,
        language: None,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// AsrProvider impl
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl AsrProvider for DeepgramProvider {
    async fn transcribe(&self, req: AsrRequest) -> Result<AsrResponse> {
        let bytes = tokio::fs::read(&req.audio_path).await?;

        let mut url = format!(
            "{}/v1/listen?model={}&utterances=true&punctuate=true",
            self.base_url, self.model
        );
        if req.diarization {
            url.push_str("&diarize=true");
        }
        if let Some(ref lang) = req.language {
            if lang != "auto" {
                url.push_str(&format!("&language={lang}"));
            }
        }

        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Token {}", self.api_key))
            .header("Content-Type", "audio/wav")
            .body(bytes)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status().as_u16();
        let body = resp.text().await.map_err(from_reqwest)?;
        if status != 200 {
            return Err(vendor_status_error(&self.name, status, &body));
        }

        let wire: ListenResponse =
            serde_json::from_str(&body).map_err(|e| Error::VendorUnavailable {
                provider: self.name.clone(),
                message: format!("unparseable listen response: {e}"),
            })?;
        Ok(convert(wire, req.diarization))
    }

    fn provider_name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UTTERANCE_BODY: &str = r#"{
        "metadata": {"duration": 125.5},
        "results": {
            "utterances": [
                {"start": 0.0, "end": 4.0, "transcript": "hello everyone",
                 "confidence": 0.98, "speaker": 0,
                 "words": [{"word": "hello", "start": 0.0, "end": 0.5, "confidence": 0.99}]},
                {"start": 4.2, "end": 9.0, "transcript": "thanks for joining",
                 "confidence": 0.91, "speaker": 1, "words": []}
            ],
            "channels": []
        }
    }"#;

    #[test]
    fn utterances_become_speaker_tagged_segments() {
        let wire: ListenResponse = serde_json::from_str(UTTERANCE_BODY).unwrap();
        let resp = convert(wire, true);
        assert_eq!(resp.duration_seconds, 125.5);
        assert_eq!(resp.segments.len(), 2);
        assert_eq!(resp.segments[0].speaker_id.as_deref(), Some("speaker_0"));
        assert_eq!(resp.segments[1].speaker_id.as_deref(), Some("speaker_1"));
        assert_eq!(resp.segments[0].words.as_ref().unwrap().len(), 1);
        assert!(resp.segments[1].words.is_none());
    }

    #[test]
    fn diarization_off_drops_speaker_tags() {
        let wire: ListenResponse = serde_json::from_str(UTTERANCE_BODY).unwrap();
        let resp = convert(wire, false);
        assert!(resp.segments.iter().all(|s| s.speaker_id.is_none()));
    }

    #[test]
    fn channel_fallback_when_no_utterances() {
        let wire: ListenResponse = serde_json::from_str(
            r#"{
                "metadata": {"duration": 10.0},
                "results": {
                    "utterances": [],
                    "channels": [{"alternatives": [
                        {"transcript": "flat transcript", "confidence": 0.8, "words": []}
                    ]}]
                }
            }"#,
        )
        .unwrap();
        let resp = convert(wire, true);
        assert_eq!(resp.segments.len(), 1);
        assert_eq!(resp.segments[0].content, "flat transcript");
        assert_eq!(resp.segments[0].end_time, 10.0);
    }
}
