use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The kinds of summary the generator can produce for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryType {
    Overview,
    KeyPoints,
    ActionItems,
    Chapters,
    VisualMindmap,
    VisualTimeline,
    VisualFlowchart,
}

impl SummaryType {
    pub fn as_str(self) -> &'static str {
        match self {
            SummaryType::Overview => "overview",
            SummaryType::KeyPoints => "key_points",
            SummaryType::ActionItems => "action_items",
            SummaryType::Chapters => "chapters",
            SummaryType::VisualMindmap => "visual_mindmap",
            SummaryType::VisualTimeline => "visual_timeline",
            SummaryType::VisualFlowchart => "visual_flowchart",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "overview" => Some(Self::Overview),
            "key_points" => Some(Self::KeyPoints),
            "action_items" => Some(Self::ActionItems),
            "chapters" => Some(Self::Chapters),
            "visual_mindmap" => Some(Self::VisualMindmap),
            "visual_timeline" => Some(Self::VisualTimeline),
            "visual_flowchart" => Some(Self::VisualFlowchart),
            _ => None,
        }
    }

    /// The three text summaries generated for every task.
    pub fn text_set() -> [SummaryType; 3] {
        [Self::Overview, Self::KeyPoints, Self::ActionItems]
    }

    pub fn is_visual(self) -> bool {
        matches!(
            self,
            Self::VisualMindmap | Self::VisualTimeline | Self::VisualFlowchart
        )
    }

    /// The Mermaid diagram keyword for a visual type.
    pub fn mermaid_kind(self) -> Option<&'static str> {
        match self {
            Self::VisualMindmap => Some("mindmap"),
            Self::VisualTimeline => Some("timeline"),
            Self::VisualFlowchart => Some("flowchart"),
            _ => None,
        }
    }
}

impl std::fmt::Display for SummaryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One generated summary. Exactly one row per (task, summary_type) is
/// active; regeneration archives the old row and bumps `version`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub id: i64,
    pub task_id: Uuid,
    pub summary_type: SummaryType,
    /// Markdown, or domain-specific text for chapter/visual types.
    pub content: String,
    pub version: i64,
    pub is_active: bool,
    /// `"mermaid"` for visual variants.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visual_format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visual_content: Option<String>,
    /// Object key of a rendered image, when rendering succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_key: Option<String>,
    pub model_used: Option<String>,
    pub prompt_version: Option<String>,
    pub token_count: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visual_types_have_a_mermaid_kind() {
        assert_eq!(SummaryType::VisualMindmap.mermaid_kind(), Some("mindmap"));
        assert_eq!(SummaryType::VisualTimeline.mermaid_kind(), Some("timeline"));
        assert_eq!(
            SummaryType::VisualFlowchart.mermaid_kind(),
            Some("flowchart")
        );
        assert_eq!(SummaryType::Overview.mermaid_kind(), None);
    }

    #[test]
    fn text_set_is_the_three_core_summaries() {
        let set = SummaryType::text_set();
        assert!(set.iter().all(|t| !t.is_visual()));
        assert_eq!(set.len(), 3);
    }
}
