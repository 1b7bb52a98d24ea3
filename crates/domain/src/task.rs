//! The task and stage model.
//!
//! A [`Task`] is one unit of pipeline work. It travels through the ordered
//! stages in [`StageType::canonical_order`]; each attempt of each stage is
//! recorded as a [`TaskStage`] row. Observable status and the bounded
//! progress percentage are derived from stage activity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::service::AsrVariant;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Task status
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Client-observable task status.
///
/// `Extracting` covers the download/transcode/upload stages; the remaining
/// values map one-to-one onto pipeline phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Extracting,
    Transcribing,
    Summarizing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Extracting => "extracting",
            TaskStatus::Transcribing => "transcribing",
            TaskStatus::Summarizing => "summarizing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "extracting" => Some(Self::Extracting),
            "transcribing" => Some(Self::Transcribing),
            "summarizing" => Some(Self::Summarizing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// The progress band `[lo, hi]` owned by this status.
    pub fn progress_band(self) -> (u8, u8) {
        match self {
            TaskStatus::Pending => (0, 0),
            TaskStatus::Extracting => (0, 20),
            TaskStatus::Transcribing => (20, 70),
            TaskStatus::Summarizing => (70, 99),
            TaskStatus::Completed => (100, 100),
            TaskStatus::Failed => (0, 100),
        }
    }

    /// Map an in-band fraction `[0,1]` onto the task-level percentage.
    pub fn progress_at(self, fraction: f32) -> u8 {
        let (lo, hi) = self.progress_band();
        let f = fraction.clamp(0.0, 1.0);
        lo + ((hi - lo) as f32 * f).round() as u8
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stages
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A named step in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageType {
    Resolve,
    Download,
    Transcode,
    UploadStorage,
    Transcribe,
    Summarize,
    /// Independently triggered visualization pipeline; never part of the
    /// canonical audio order.
    Visualize,
}

impl StageType {
    pub fn as_str(self) -> &'static str {
        match self {
            StageType::Resolve => "resolve",
            StageType::Download => "download",
            StageType::Transcode => "transcode",
            StageType::UploadStorage => "upload_storage",
            StageType::Transcribe => "transcribe",
            StageType::Summarize => "summarize",
            StageType::Visualize => "visualize",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "resolve" => Some(Self::Resolve),
            "download" => Some(Self::Download),
            "transcode" => Some(Self::Transcode),
            "upload_storage" => Some(Self::UploadStorage),
            "transcribe" => Some(Self::Transcribe),
            "summarize" => Some(Self::Summarize),
            "visualize" => Some(Self::Visualize),
            _ => None,
        }
    }

    /// Canonical stage order for an audio task. `resolve` only runs for
    /// remote-URL sources.
    pub fn canonical_order(source: SourceType) -> &'static [StageType] {
        match source {
            SourceType::Url => &[
                StageType::Resolve,
                StageType::Download,
                StageType::Transcode,
                StageType::UploadStorage,
                StageType::Transcribe,
                StageType::Summarize,
            ],
            SourceType::Upload => &[
                StageType::Download,
                StageType::Transcode,
                StageType::UploadStorage,
                StageType::Transcribe,
                StageType::Summarize,
            ],
        }
    }

    /// The observable status while this stage is running.
    pub fn task_status(self) -> TaskStatus {
        match self {
            StageType::Resolve
            | StageType::Download
            | StageType::Transcode
            | StageType::UploadStorage => TaskStatus::Extracting,
            StageType::Transcribe => TaskStatus::Transcribing,
            StageType::Summarize | StageType::Visualize => TaskStatus::Summarizing,
        }
    }

    /// Per-stage vendor-call deadline.
    pub fn deadline(self) -> std::time::Duration {
        use std::time::Duration;
        match self {
            StageType::Resolve => Duration::from_secs(30),
            StageType::Download => Duration::from_secs(600),
            StageType::Transcode => Duration::from_secs(600),
            StageType::UploadStorage => Duration::from_secs(300),
            StageType::Transcribe => Duration::from_secs(1800),
            StageType::Summarize | StageType::Visualize => Duration::from_secs(300),
        }
    }
}

impl std::fmt::Display for StageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of one stage attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl StageStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StageStatus::Pending => "pending",
            StageStatus::Running => "running",
            StageStatus::Completed => "completed",
            StageStatus::Failed => "failed",
            StageStatus::Skipped => "skipped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }
}

/// One persisted record per stage attempt.
///
/// Only one row per (task, stage_type) has `is_active = true`; a retry
/// archives the stale row and inserts a fresh one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStage {
    pub id: i64,
    pub task_id: Uuid,
    pub stage_type: StageType,
    pub status: StageStatus,
    /// Unique per attempt; side-effecting operations dedupe on it.
    pub attempt_id: Uuid,
    pub is_active: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Task
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Where the media comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Upload,
    Url,
}

impl SourceType {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceType::Upload => "upload",
            SourceType::Url => "url",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "upload" => Some(Self::Upload),
            "url" => Some(Self::Url),
            _ => None,
        }
    }
}

/// Per-task processing options supplied at creation.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TaskOptions {
    /// ASR language hint: `auto`, `zh`, or `en`.
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub enable_speaker_diarization: bool,
    /// Template family: meeting, learning, interview, lecture, podcast,
    /// video, general.
    #[serde(default)]
    pub summary_style: Option<String>,
    /// Quota lane preference for ASR.
    #[serde(default)]
    pub asr_variant: Option<AsrVariant>,
    /// Pin a specific ASR provider. Selection fails rather than substitute.
    #[serde(default)]
    pub asr_provider: Option<String>,
    /// Pin a specific LLM provider.
    #[serde(default)]
    pub llm_provider: Option<String>,
    /// LLM model override.
    #[serde(default)]
    pub model_id: Option<String>,
}

/// One unit of pipeline work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub user_id: String,
    pub title: Option<String>,
    pub source_type: SourceType,
    /// Object key for uploaded sources.
    pub file_key: Option<String>,
    /// SHA-256 of the uploaded content, for dedup.
    pub content_hash: Option<String>,
    /// Remote URL for `url` sources.
    pub source_url: Option<String>,
    pub options: TaskOptions,
    pub status: TaskStatus,
    /// Bounded percentage, monotone while non-terminal.
    pub progress: u8,
    pub duration_seconds: Option<f64>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_order_skips_resolve_for_uploads() {
        let upload = StageType::canonical_order(SourceType::Upload);
        assert_eq!(upload.first(), Some(&StageType::Download));
        let url = StageType::canonical_order(SourceType::Url);
        assert_eq!(url.first(), Some(&StageType::Resolve));
        assert_eq!(&url[1..], upload);
    }

    #[test]
    fn progress_bands_cover_the_documented_ranges() {
        assert_eq!(TaskStatus::Pending.progress_band(), (0, 0));
        assert_eq!(TaskStatus::Extracting.progress_band(), (0, 20));
        assert_eq!(TaskStatus::Transcribing.progress_band(), (20, 70));
        assert_eq!(TaskStatus::Summarizing.progress_band(), (70, 99));
        assert_eq!(TaskStatus::Completed.progress_band(), (100, 100));
    }

    #[test]
    fn progress_at_is_linear_within_the_band() {
        assert_eq!(TaskStatus::Transcribing.progress_at(0.0), 20);
        assert_eq!(TaskStatus::Transcribing.progress_at(0.5), 45);
        assert_eq!(TaskStatus::Transcribing.progress_at(1.0), 70);
        // Out-of-range fractions clamp instead of escaping the band.
        assert_eq!(TaskStatus::Transcribing.progress_at(2.0), 70);
        assert_eq!(TaskStatus::Transcribing.progress_at(-1.0), 20);
    }

    #[test]
    fn stage_status_mapping_matches_bands() {
        assert_eq!(StageType::Download.task_status(), TaskStatus::Extracting);
        assert_eq!(StageType::UploadStorage.task_status(), TaskStatus::Extracting);
        assert_eq!(StageType::Transcribe.task_status(), TaskStatus::Transcribing);
        assert_eq!(StageType::Summarize.task_status(), TaskStatus::Summarizing);
    }

    #[test]
    fn terminal_statuses() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(!TaskStatus::Transcribing.is_terminal());
    }

    #[test]
    fn stage_type_round_trips_through_str() {
        for s in [
            StageType::Resolve,
            StageType::Download,
            StageType::Transcode,
            StageType::UploadStorage,
            StageType::Transcribe,
            StageType::Summarize,
            StageType::Visualize,
        ] {
            assert_eq!(StageType::parse(s.as_str()), Some(s));
        }
    }
}
