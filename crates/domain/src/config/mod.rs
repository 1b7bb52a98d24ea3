mod pipeline;
mod providers;
mod quota;
mod server;

pub use pipeline::*;
pub use providers::*;
pub use quota::*;
pub use server::*;

use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub breaker: BreakerConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub selector: SelectorConfig,
    #[serde(default)]
    pub asr: AsrConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub quota: QuotaConfig,
    #[serde(default)]
    pub summarize: SummarizeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database path. `~` expands to the home directory.
    #[serde(default = "d_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: d_db_path() }
    }
}

fn d_db_path() -> String {
    "./data/echoscribe.db".into()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the loaded configuration. Errors block startup; warnings
    /// are logged and tolerated.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.pipeline.workers == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "pipeline.workers".into(),
                message: "must be at least 1".into(),
            });
        }
        if self.retry.max_attempts == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "retry.max_attempts".into(),
                message: "must be at least 1".into(),
            });
        }
        if self.asr.providers.is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "asr.providers".into(),
                message: "no ASR providers configured; transcription will fail".into(),
            });
        }
        if self.llm.providers.is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "llm.providers".into(),
                message: "no LLM providers configured; summarization will fail".into(),
            });
        }
        for p in &self.llm.providers {
            if p.default_model.is_none() && p.models.is_empty() {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Error,
                    field: format!("llm.providers.{}", p.name),
                    message: "provider declares no models and no default_model".into(),
                });
            }
        }

        issues
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_no_errors() {
        let issues = Config::default().validate();
        assert!(issues
            .iter()
            .all(|i| i.severity != ConfigSeverity::Error));
    }

    #[test]
    fn zero_workers_is_an_error() {
        let mut cfg = Config::default();
        cfg.pipeline.workers = 0;
        let issues = cfg.validate();
        assert!(issues
            .iter()
            .any(|i| i.severity == ConfigSeverity::Error && i.field == "pipeline.workers"));
    }

    #[test]
    fn empty_toml_parses_to_defaults() {
        let cfg: Config = toml::from_str("").expect("empty config");
        assert_eq!(cfg.server.port, 3210);
        assert_eq!(cfg.pipeline.workers, 4);
    }

    #[test]
    fn partial_toml_overrides_only_named_fields() {
        let cfg: Config = toml::from_str(
            r#"
            [server]
            port = 8080

            [pipeline]
            download_limit_mb = 100
            "#,
        )
        .expect("partial config");
        assert_eq!(cfg.server.port, 8080);
        assert_eq!(cfg.pipeline.download_limit_mb, 100);
        assert_eq!(cfg.pipeline.workers, 4);
    }
}
