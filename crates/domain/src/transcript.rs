use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Word-level timing, vendor-conditional. Consumers must tolerate its
/// absence on the parent segment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WordTiming {
    pub word: String,
    pub start: f64,
    pub end: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

/// One transcript segment as returned by an ASR vendor.
///
/// Immutable once written; an edit sets `is_edited` and preserves the
/// original text in `original_content`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub id: i64,
    pub task_id: Uuid,
    /// Opaque vendor speaker tag; `None` when diarization is off.
    pub speaker_id: Option<String>,
    pub start_time: f64,
    pub end_time: f64,
    pub content: String,
    /// Vendor confidence in `[0,1]`, when reported.
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub words: Option<Vec<WordTiming>>,
    pub is_edited: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_content: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A freshly transcribed segment, before persistence assigns row ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSegment {
    pub speaker_id: Option<String>,
    pub start_time: f64,
    pub end_time: f64,
    pub content: String,
    pub confidence: Option<f64>,
    pub words: Option<Vec<WordTiming>>,
}
