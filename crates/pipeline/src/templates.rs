//! Layered prompt template catalog.
//!
//! Templates are keyed by (prompt kind, locale, content style). Lookup
//! falls back style → `general`, then locale → `zh` (the default locale).
//! Variables `{transcript}` and `{quality_notice}` are substituted at
//! render time.

use es_domain::summary::SummaryType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptKind {
    Overview,
    KeyPoints,
    ActionItems,
    Chapters,
    Mindmap,
    Timeline,
    Flowchart,
}

impl PromptKind {
    pub fn for_summary(summary_type: SummaryType) -> Option<Self> {
        match summary_type {
            SummaryType::Overview => Some(Self::Overview),
            SummaryType::KeyPoints => Some(Self::KeyPoints),
            SummaryType::ActionItems => Some(Self::ActionItems),
            SummaryType::Chapters => Some(Self::Chapters),
            SummaryType::VisualMindmap => Some(Self::Mindmap),
            SummaryType::VisualTimeline => Some(Self::Timeline),
            SummaryType::VisualFlowchart => Some(Self::Flowchart),
        }
    }
}

/// Preamble injected when the transcript quality is classified low.
pub fn quality_notice(locale: &str) -> &'static str {
    match locale {
        "en" => {
            "Note: the transcript below has low recognition confidence. \
             Be conservative: prefer broad statements over specifics that may \
             be transcription errors, and do not invent details.\n\n"
        }
        _ => {
            "注意：以下转写文本的识别置信度较低。请保守概括，避免依赖可能\
             是识别错误的细节，不要编造内容。\n\n"
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Catalog
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Look up a template: exact (locale, style) first, then the locale's
/// `general` family, then the zh default.
pub fn template_for(kind: PromptKind, locale: &str, style: &str) -> &'static str {
    lookup(kind, locale, style)
        .or_else(|| lookup(kind, locale, "general"))
        .or_else(|| lookup(kind, "zh", "general"))
        .expect("zh/general template exists for every kind")
}

/// Render a prompt with variables substituted.
pub fn render(
    kind: PromptKind,
    locale: &str,
    style: &str,
    transcript: &str,
    quality_notice: &str,
) -> String {
    template_for(kind, locale, style)
        .replace("{quality_notice}", quality_notice)
        .replace("{transcript}", transcript)
}

fn lookup(kind: PromptKind, locale: &str, style: &str) -> Option<&'static str> {
    use PromptKind::*;
    Some(match (kind, locale, style) {
        // ── zh, style-specific ────────────────────────────────────
        (Overview, "zh", "meeting") => {
            "{quality_notice}你是会议纪要助手。阅读以下会议转写文本，\
             用 Markdown 写一段 200 字以内的会议总结，说明会议目的、\
             主要讨论内容和结论。\n\n{transcript}"
        }
        (ActionItems, "zh", "meeting") => {
            "{quality_notice}从以下会议转写文本中提取行动项。\
             每条一行，格式：`- [负责人] 事项（期限，如有）`。\
             没有明确行动项时输出“无”。\n\n{transcript}"
        }
        // ── zh, general ───────────────────────────────────────────
        (Overview, "zh", "general") => {
            "{quality_notice}阅读以下音频转写文本，用 Markdown 写一段\
             简明扼要的内容总结（200 字以内）。\n\n{transcript}"
        }
        (KeyPoints, "zh", "general") => {
            "{quality_notice}从以下转写文本中提炼 3 到 8 条要点，\
             每条一行，使用 Markdown 列表。\n\n{transcript}"
        }
        (ActionItems, "zh", "general") => {
            "{quality_notice}从以下转写文本中提取需要跟进的事项，\
             使用 Markdown 列表；没有时输出“无”。\n\n{transcript}"
        }
        (Chapters, "zh", "general") => {
            "{quality_notice}将以下转写文本划分为章节。只输出 JSON，\
             格式：{\"total_chapters\": N, \"chapters\": [{\"index\": 1, \
             \"title\": \"...\", \"start_offset\": 0, \"end_offset\": 100, \
             \"summary\": \"...\"}]}。offset 为字符偏移。\n\n{transcript}"
        }
        (Mindmap, "zh", "general") => {
            "{quality_notice}根据以下转写文本生成 Mermaid mindmap 图源码，\
             以 `mindmap` 开头，只输出图源码。\n\n{transcript}"
        }
        (Timeline, "zh", "general") => {
            "{quality_notice}根据以下转写文本生成 Mermaid timeline 图源码，\
             以 `timeline` 开头，只输出图源码。\n\n{transcript}"
        }
        (Flowchart, "zh", "general") => {
            "{quality_notice}根据以下转写文本生成 Mermaid flowchart 图源码，\
             以 `flowchart TD` 开头，只输出图源码。\n\n{transcript}"
        }
        // ── en, style-specific ────────────────────────────────────
        (Overview, "en", "meeting") => {
            "{quality_notice}You are a meeting-minutes assistant. Read the \
             meeting transcript below and write a Markdown summary of at most \
             150 words covering purpose, discussion, and outcomes.\n\n{transcript}"
        }
        (ActionItems, "en", "meeting") => {
            "{quality_notice}Extract action items from the meeting transcript \
             below. One per line: `- [owner] item (due date if mentioned)`. \
             Output `none` if there are no clear action items.\n\n{transcript}"
        }
        // ── en, general ───────────────────────────────────────────
        (Overview, "en", "general") => {
            "{quality_notice}Read the transcript below and write a concise \
             Markdown summary of at most 150 words.\n\n{transcript}"
        }
        (KeyPoints, "en", "general") => {
            "{quality_notice}Distill 3 to 8 key points from the transcript \
             below as a Markdown list, one per line.\n\n{transcript}"
        }
        (ActionItems, "en", "general") => {
            "{quality_notice}Extract follow-up items from the transcript below \
             as a Markdown list; output `none` if there are none.\n\n{transcript}"
        }
        (Chapters, "en", "general") => {
            "{quality_notice}Split the transcript below into chapters. Output \
             JSON only: {\"total_chapters\": N, \"chapters\": [{\"index\": 1, \
             \"title\": \"...\", \"start_offset\": 0, \"end_offset\": 100, \
             \"summary\": \"...\"}]}. Offsets are character offsets.\n\n{transcript}"
        }
        (Mindmap, "en", "general") => {
            "{quality_notice}Generate Mermaid mindmap source for the \
             transcript below. Start with `mindmap`; output only the diagram \
             source.\n\n{transcript}"
        }
        (Timeline, "en", "general") => {
            "{quality_notice}Generate Mermaid timeline source for the \
             transcript below. Start with `timeline`; output only the diagram \
             source.\n\n{transcript}"
        }
        (Flowchart, "en", "general") => {
            "{quality_notice}Generate Mermaid flowchart source for the \
             transcript below. Start with `flowchart TD`; output only the \
             diagram source.\n\n{transcript}"
        }
        _ => return None,
    })
}
