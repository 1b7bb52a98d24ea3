use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Service kinds
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The three capability families a registered provider can implement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    Asr,
    Llm,
    Storage,
}

impl ServiceType {
    pub fn as_str(self) -> &'static str {
        match self {
            ServiceType::Asr => "asr",
            ServiceType::Llm => "llm",
            ServiceType::Storage => "storage",
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ASR variants
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A sub-lane of an ASR provider, tracked separately for quota purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AsrVariant {
    File,
    FileFast,
    StreamAsync,
    StreamRealtime,
}

impl AsrVariant {
    pub fn as_str(self) -> &'static str {
        match self {
            AsrVariant::File => "file",
            AsrVariant::FileFast => "file_fast",
            AsrVariant::StreamAsync => "stream_async",
            AsrVariant::StreamRealtime => "stream_realtime",
        }
    }

    /// Lanes the selector tries when the caller did not pin one,
    /// in preference order.
    pub fn default_preference() -> [AsrVariant; 2] {
        [AsrVariant::FileFast, AsrVariant::File]
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "file" => Some(AsrVariant::File),
            "file_fast" => Some(AsrVariant::FileFast),
            "stream_async" => Some(AsrVariant::StreamAsync),
            "stream_realtime" => Some(AsrVariant::StreamRealtime),
            _ => None,
        }
    }
}

impl fmt::Display for AsrVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variant_round_trips_through_str() {
        for v in [
            AsrVariant::File,
            AsrVariant::FileFast,
            AsrVariant::StreamAsync,
            AsrVariant::StreamRealtime,
        ] {
            assert_eq!(AsrVariant::parse(v.as_str()), Some(v));
        }
        assert_eq!(AsrVariant::parse("bogus"), None);
    }

    #[test]
    fn default_preference_tries_fast_lane_first() {
        assert_eq!(
            AsrVariant::default_preference(),
            [AsrVariant::FileFast, AsrVariant::File]
        );
    }
}
