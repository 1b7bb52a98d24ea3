use serde::{Deserialize, Serialize};

/// Global quota defaults seeded at startup.
///
/// Each entry becomes a `global`-owner quota row if one does not already
/// exist for its key. Per-user refreshes override these at resolution time.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct QuotaConfig {
    #[serde(default)]
    pub defaults: Vec<QuotaDefault>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaDefault {
    pub provider: String,
    pub variant: String,
    /// `day`, `month`, or `total`.
    pub window_type: String,
    pub quota_seconds: i64,
}
