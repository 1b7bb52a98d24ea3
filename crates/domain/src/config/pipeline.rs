use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pipeline / worker tier
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Number of parallel pipeline workers. One task runs on one worker.
    #[serde(default = "d_workers")]
    pub workers: usize,
    /// Download size ceiling in megabytes.
    #[serde(default = "d_download_limit")]
    pub download_limit_mb: u64,
    /// Scratch directory for downloads and transcodes.
    #[serde(default = "d_tmp")]
    pub tmp_dir: String,
    /// ffmpeg binary used by the transcode stage.
    #[serde(default = "d_ffmpeg")]
    pub ffmpeg_bin: String,
    /// Target sample rate for normalized audio.
    #[serde(default = "d_sample_rate")]
    pub sample_rate: u32,
    /// Queue poll interval when idle, milliseconds.
    #[serde(default = "d_poll_ms")]
    pub queue_poll_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: d_workers(),
            download_limit_mb: d_download_limit(),
            tmp_dir: d_tmp(),
            ffmpeg_bin: d_ffmpeg(),
            sample_rate: d_sample_rate(),
            queue_poll_ms: d_poll_ms(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Retry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "d_base_delay")]
    pub base_delay_ms: u64,
    #[serde(default = "d_factor")]
    pub factor: f64,
    #[serde(default = "d_attempts")]
    pub max_attempts: u32,
    /// Jitter drawn uniformly from `[0, jitter_ratio * delay]`.
    #[serde(default = "d_jitter")]
    pub jitter_ratio: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: d_base_delay(),
            factor: d_factor(),
            max_attempts: d_attempts(),
            jitter_ratio: d_jitter(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Circuit breaker
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures before the circuit opens.
    #[serde(default = "d_threshold")]
    pub failure_threshold: u32,
    /// Open-state cooldown before a half-open probe is allowed.
    #[serde(default = "d_cooldown")]
    pub cooldown_secs: u64,
    /// Cooldown doubles on repeated failure, up to this cap.
    #[serde(default = "d_max_cooldown")]
    pub max_cooldown_secs: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: d_threshold(),
            cooldown_secs: d_cooldown(),
            max_cooldown_secs: d_max_cooldown(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Health monitor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Multiplier applied per consecutive failure.
    #[serde(default = "d_decay")]
    pub failure_decay: f64,
    /// Additive recovery per success, capped at 1.0.
    #[serde(default = "d_recovery")]
    pub success_step: f64,
    /// Active probe interval in seconds. 0 disables probing (passive only).
    #[serde(default)]
    pub probe_interval_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            failure_decay: d_decay(),
            success_step: d_recovery(),
            probe_interval_secs: 0,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Summary generator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummarizeConfig {
    /// Provider substituted when transcript quality is classified low.
    #[serde(default)]
    pub premium_provider: Option<String>,
    #[serde(default)]
    pub premium_model: Option<String>,
    /// Transcripts longer than this (chars) get chapter segmentation first.
    #[serde(default = "d_chapter_threshold")]
    pub chapter_threshold_chars: usize,
    /// Mermaid renderer binary. When absent or failing, visual summaries
    /// keep their diagram source and skip the image.
    #[serde(default = "d_mmdc")]
    pub mermaid_bin: String,
    /// Prompt catalog version stamped onto generated summaries.
    #[serde(default = "d_prompt_version")]
    pub prompt_version: String,
}

impl Default for SummarizeConfig {
    fn default() -> Self {
        Self {
            premium_provider: None,
            premium_model: None,
            chapter_threshold_chars: d_chapter_threshold(),
            mermaid_bin: d_mmdc(),
            prompt_version: d_prompt_version(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_workers() -> usize {
    4
}
fn d_download_limit() -> u64 {
    500
}
fn d_tmp() -> String {
    "./data/tmp".into()
}
fn d_ffmpeg() -> String {
    "ffmpeg".into()
}
fn d_sample_rate() -> u32 {
    16_000
}
fn d_poll_ms() -> u64 {
    1000
}
fn d_base_delay() -> u64 {
    500
}
fn d_factor() -> f64 {
    2.0
}
fn d_attempts() -> u32 {
    3
}
fn d_jitter() -> f64 {
    0.3
}
fn d_threshold() -> u32 {
    5
}
fn d_cooldown() -> u64 {
    60
}
fn d_max_cooldown() -> u64 {
    600
}
fn d_decay() -> f64 {
    0.5
}
fn d_recovery() -> f64 {
    0.2
}
fn d_chapter_threshold() -> usize {
    2000
}
fn d_mmdc() -> String {
    "mmdc".into()
}
fn d_prompt_version() -> String {
    "v1".into()
}
