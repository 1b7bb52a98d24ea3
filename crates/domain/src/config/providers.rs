use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ASR providers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AsrConfig {
    /// Registered ASR providers (data-driven: adding a vendor = adding config).
    #[serde(default)]
    pub providers: Vec<AsrProviderConfig>,
}

/// Adapter kind for an ASR provider entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AsrKind {
    /// OpenAI-compatible `/v1/audio/transcriptions` endpoint.
    WhisperApi,
    /// Deepgram-style prerecorded endpoint.
    Deepgram,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsrProviderConfig {
    pub name: String,
    pub kind: AsrKind,
    pub base_url: String,
    /// Environment variable holding the API key. The registry only
    /// discovers providers whose variable is set.
    pub key_env: String,
    #[serde(default = "d_display")]
    pub display_name: String,
    /// Quota lanes this provider supports.
    #[serde(default = "d_variants")]
    pub variants: Vec<String>,
    /// Estimated vendor price per audio minute, USD.
    #[serde(default)]
    pub cost_per_minute: f64,
    /// Free-tier allocation per month, in seconds. Zero = no free tier.
    #[serde(default)]
    pub free_tier_seconds: i64,
    #[serde(default)]
    pub model: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM providers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LlmConfig {
    #[serde(default)]
    pub providers: Vec<LlmProviderConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmKind {
    /// OpenAI-compatible `/v1/chat/completions`.
    OpenaiCompat,
    /// Anthropic Messages API.
    Anthropic,
}

/// Pricing per million tokens for a specific model.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct ModelPricing {
    /// Dollars per 1 million input (prompt) tokens.
    pub input_per_1m: f64,
    /// Dollars per 1 million output (completion) tokens.
    pub output_per_1m: f64,
}

impl ModelPricing {
    /// Estimated cost in USD for the given token counts.
    pub fn estimate_cost(&self, input_tokens: u32, output_tokens: u32) -> f64 {
        (input_tokens as f64 * self.input_per_1m + output_tokens as f64 * self.output_per_1m)
            / 1_000_000.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmProviderConfig {
    pub name: String,
    pub kind: LlmKind,
    pub base_url: String,
    pub key_env: String,
    #[serde(default = "d_display")]
    pub display_name: String,
    /// Declared models with pricing (key = model id). A provider with more
    /// than one model and no `default_model` requires an explicit
    /// `model_id` at instantiation.
    #[serde(default)]
    pub models: HashMap<String, ModelPricing>,
    #[serde(default)]
    pub default_model: Option<String>,
    #[serde(default = "d_true")]
    pub supports_streaming: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Storage providers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StorageConfig {
    #[serde(default)]
    pub providers: Vec<StorageProviderConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageKind {
    /// S3-compatible object store (SigV4 presigning).
    S3,
    /// Local directory, for development.
    Local,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageProviderConfig {
    pub name: String,
    pub kind: StorageKind,
    #[serde(default = "d_display")]
    pub display_name: String,
    /// S3: endpoint URL; Local: ignored.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub bucket: Option<String>,
    #[serde(default = "d_region")]
    pub region: String,
    /// Environment variables for S3 credentials. Local providers are
    /// always considered credentialed.
    #[serde(default)]
    pub access_key_env: Option<String>,
    #[serde(default)]
    pub secret_key_env: Option<String>,
    /// Local: root directory for stored objects.
    #[serde(default)]
    pub root: Option<String>,
    /// Estimated storage cost per GB-month, USD. Used only for scoring.
    #[serde(default)]
    pub cost_per_gb: f64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Selector
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Which provider to pick is a closed variant set; each strategy is a
/// different weight vector over the same four scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    HealthFirst,
    CostFirst,
    PerformanceFirst,
    #[default]
    Balanced,
}

impl SelectionStrategy {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "health_first" => Some(Self::HealthFirst),
            "cost_first" => Some(Self::CostFirst),
            "performance_first" => Some(Self::PerformanceFirst),
            "balanced" => Some(Self::Balanced),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SelectorConfig {
    #[serde(default)]
    pub strategy: SelectionStrategy,
}

// ── serde default helpers ───────────────────────────────────────────

fn d_display() -> String {
    String::new()
}
fn d_variants() -> Vec<String> {
    vec!["file".into(), "file_fast".into()]
}
fn d_region() -> String {
    "us-east-1".into()
}
fn d_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_pricing_estimates_per_million() {
        let p = ModelPricing {
            input_per_1m: 3.0,
            output_per_1m: 15.0,
        };
        let cost = p.estimate_cost(1_000_000, 1_000_000);
        assert!((cost - 18.0).abs() < 1e-9);
        let small = p.estimate_cost(1000, 500);
        assert!((small - (0.003 + 0.0075)).abs() < 1e-9);
    }

    #[test]
    fn asr_provider_config_parses_from_toml() {
        let cfg: AsrConfig = toml::from_str(
            r#"
            [[providers]]
            name = "whisper"
            kind = "whisper_api"
            base_url = "https://api.openai.com"
            key_env = "OPENAI_API_KEY"
            cost_per_minute = 0.006
            "#,
        )
        .expect("asr config");
        assert_eq!(cfg.providers.len(), 1);
        assert_eq!(cfg.providers[0].kind, AsrKind::WhisperApi);
        assert_eq!(cfg.providers[0].variants, vec!["file", "file_fast"]);
    }

    #[test]
    fn selection_strategy_parses() {
        assert_eq!(
            SelectionStrategy::parse("cost_first"),
            Some(SelectionStrategy::CostFirst)
        );
        assert_eq!(SelectionStrategy::parse("nope"), None);
    }
}
