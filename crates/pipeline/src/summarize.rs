//! Summary generation.
//!
//! Assembles quality-aware prompts from the template catalog, invokes the
//! selected LLM per summary type, and persists versioned summary rows.
//! Low-quality transcripts swap in the configured premium model and inject
//! a caveat preamble. Long transcripts get a chapter-segmentation pass
//! first; its failure is never fatal. Visual types emit Mermaid source,
//! validated before persistence, with optional image rendering that
//! degrades gracefully to source-only.

use serde::Deserialize;
use uuid::Uuid;

use es_domain::error::{Error, Result};
use es_domain::service::ServiceType;
use es_domain::summary::SummaryType;
use es_domain::task::Task;
use es_domain::usage::UsageRecord;
use es_providers::breaker::record_outcome;
use es_providers::selector::SelectionRequest;
use es_providers::traits::{ChatMessage, ChatRequest};
use es_store::summaries::{insert_summary, NewSummary};
use es_store::transcripts::all_segments;

use crate::templates::{self, PromptKind};
use crate::transcript::{assess_quality, preprocess, QualityLevel};
use crate::PipelineContext;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Chapter document contract
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct ChapterDoc {
    pub total_chapters: u32,
    pub chapters: Vec<Chapter>,
}

#[derive(Debug, Deserialize)]
pub struct Chapter {
    pub index: u32,
    pub title: String,
    pub start_offset: u64,
    pub end_offset: u64,
    pub summary: String,
}

/// Pull the chapter JSON out of a model response that may wrap it in prose
/// or code fences.
pub(crate) fn parse_chapters(text: &str) -> Option<ChapterDoc> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Mermaid helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Strip a Markdown code fence from a model response, if present.
pub(crate) fn extract_diagram(response: &str) -> String {
    let trimmed = response.trim();
    if let Some(rest) = trimmed.strip_prefix("```") {
        // Drop the info string (e.g. "mermaid") up to the first newline.
        let body = rest.split_once('\n').map_or("", |(_, b)| b);
        let body = body.rsplit_once("```").map_or(body, |(b, _)| b);
        return body.trim().to_string();
    }
    trimmed.to_string()
}

/// A diagram is well-formed enough to persist when its first line opens
/// with the expected Mermaid keyword.
pub(crate) fn validate_diagram(kind: &str, source: &str) -> bool {
    let first = match source.lines().find(|l| !l.trim().is_empty()) {
        Some(line) => line.trim(),
        None => return false,
    };
    match kind {
        "flowchart" => first.starts_with("flowchart") || first.starts_with("graph"),
        other => first.starts_with(other),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SummaryGenerator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct SummaryGenerator {
    ctx: PipelineContext,
}

struct LlmOutcome {
    content: String,
    provider: String,
    model: String,
    input_tokens: Option<u32>,
    output_tokens: Option<u32>,
}

impl SummaryGenerator {
    pub fn new(ctx: PipelineContext) -> Self {
        Self { ctx }
    }

    fn locale_for(task: &Task) -> &'static str {
        match task.options.language.as_deref() {
            Some("en") => "en",
            _ => "zh",
        }
    }

    fn style_for(task: &Task) -> String {
        task.options
            .summary_style
            .clone()
            .unwrap_or_else(|| "general".into())
    }

    /// Generate chapters (best-effort) plus the three text summaries.
    pub async fn generate_all(&self, task: &Task, attempt_id: Uuid) -> Result<()> {
        let segments = all_segments(&self.ctx.pool, task.id).await?;
        let transcript = preprocess(&segments);
        if transcript.is_empty() {
            return Err(Error::InvalidFormat("transcript is empty".into()));
        }

        let quality = assess_quality(&segments);
        let low_quality = quality.level == QualityLevel::Low;
        let locale = Self::locale_for(task);
        let style = Self::style_for(task);
        let notice = if low_quality {
            templates::quality_notice(locale)
        } else {
            ""
        };

        tracing::info!(
            task_id = %task.id,
            avg_confidence = quality.average_confidence,
            low_ratio = quality.low_confidence_ratio,
            premium = low_quality,
            "generating summaries"
        );

        // Chapter segmentation for long transcripts; never fatal.
        if transcript.chars().count() > self.ctx.config.summarize.chapter_threshold_chars {
            let prompt = templates::render(PromptKind::Chapters, locale, &style, &transcript, notice);
            match self.call_llm(task, &prompt, low_quality).await {
                Ok(outcome) => match parse_chapters(&outcome.content) {
                    Some(doc) => {
                        let new = NewSummary {
                            task_id: task.id,
                            summary_type: SummaryType::Chapters,
                            content: serde_json::to_string(&serde_json::json!({
                                "total_chapters": doc.total_chapters,
                                "chapters": doc.chapters.iter().map(|c| serde_json::json!({
                                    "index": c.index,
                                    "title": c.title,
                                    "start_offset": c.start_offset,
                                    "end_offset": c.end_offset,
                                    "summary": c.summary,
                                })).collect::<Vec<_>>(),
                            }))?,
                            visual_format: None,
                            visual_content: None,
                            image_key: None,
                            model_used: Some(outcome.model),
                            prompt_version: Some(self.ctx.config.summarize.prompt_version.clone()),
                            token_count: outcome.output_tokens.map(i64::from),
                            attempt_id,
                        };
                        insert_summary(&self.ctx.pool, &new).await?;
                    }
                    None => {
                        tracing::warn!(task_id = %task.id, "chapter response was not valid JSON, skipping");
                    }
                },
                Err(e) => {
                    tracing::warn!(task_id = %task.id, error = %e, "chapter segmentation failed, skipping");
                }
            }
        }

        for summary_type in SummaryType::text_set() {
            let kind = PromptKind::for_summary(summary_type).expect("text types map");
            let prompt = templates::render(kind, locale, &style, &transcript, notice);
            let outcome = self.call_llm(task, &prompt, low_quality).await?;

            let new = NewSummary {
                task_id: task.id,
                summary_type,
                content: outcome.content,
                visual_format: None,
                visual_content: None,
                image_key: None,
                model_used: Some(outcome.model),
                prompt_version: Some(self.ctx.config.summarize.prompt_version.clone()),
                token_count: outcome.output_tokens.map(i64::from),
                attempt_id,
            };
            insert_summary(&self.ctx.pool, &new).await?;
        }

        Ok(())
    }

    /// Generate one visual summary. `provider`/`model_id` override the
    /// task options when given.
    #[allow(clippy::too_many_arguments)]
    pub async fn generate_visual(
        &self,
        task: &Task,
        visual_type: SummaryType,
        style_override: Option<&str>,
        provider: Option<&str>,
        model_id: Option<&str>,
        generate_image: bool,
        image_format: &str,
        attempt_id: Uuid,
    ) -> Result<()> {
        let kind = visual_type
            .mermaid_kind()
            .ok_or_else(|| Error::InvalidParam(format!("{visual_type} is not a visual type")))?;

        let segments = all_segments(&self.ctx.pool, task.id).await?;
        let transcript = preprocess(&segments);
        if transcript.is_empty() {
            return Err(Error::InvalidFormat("transcript is empty".into()));
        }

        let quality = assess_quality(&segments);
        let locale = Self::locale_for(task);
        let style = style_override
            .map(str::to_string)
            .unwrap_or_else(|| Self::style_for(task));
        let notice = if quality.level == QualityLevel::Low {
            templates::quality_notice(locale)
        } else {
            ""
        };

        let prompt_kind = PromptKind::for_summary(visual_type).expect("visual types map");
        let prompt = templates::render(prompt_kind, locale, &style, &transcript, notice);

        let mut req = self.selection_for(task, quality.level == QualityLevel::Low, &prompt);
        if let Some(p) = provider {
            req.preferred_provider = Some(p.to_string());
        }
        if let Some(m) = model_id {
            req.model_id = Some(m.to_string());
        }
        let outcome = self.chat(task, &prompt, &req).await?;

        let diagram = extract_diagram(&outcome.content);
        if !validate_diagram(kind, &diagram) {
            return Err(Error::VendorUnavailable {
                provider: outcome.provider,
                message: format!("model produced malformed {kind} source"),
            });
        }

        // Image rendering is best-effort; the Mermaid source always lands.
        let image_key = if generate_image {
            match self
                .render_image(task, visual_type, &diagram, image_format, attempt_id)
                .await
            {
                Ok(key) => Some(key),
                Err(e) => {
                    tracing::warn!(task_id = %task.id, error = %e, "diagram render failed, keeping source only");
                    None
                }
            }
        } else {
            None
        };

        let new = NewSummary {
            task_id: task.id,
            summary_type: visual_type,
            content: diagram.clone(),
            visual_format: Some("mermaid".into()),
            visual_content: Some(diagram),
            image_key,
            model_used: Some(outcome.model),
            prompt_version: Some(self.ctx.config.summarize.prompt_version.clone()),
            token_count: outcome.output_tokens.map(i64::from),
            attempt_id,
        };
        insert_summary(&self.ctx.pool, &new).await?;
        Ok(())
    }

    // ── Internal helpers ───────────────────────────────────────────

    fn selection_for(&self, task: &Task, premium: bool, prompt: &str) -> SelectionRequest {
        let cfg = &self.ctx.config.summarize;
        // A user-pinned provider beats the premium substitution.
        let (preferred, model) = if task.options.llm_provider.is_some() {
            (
                task.options.llm_provider.clone(),
                task.options.model_id.clone(),
            )
        } else if premium && cfg.premium_provider.is_some() {
            (cfg.premium_provider.clone(), cfg.premium_model.clone())
        } else {
            (None, task.options.model_id.clone())
        };

        SelectionRequest {
            owner: task.user_id.clone(),
            preferred_provider: preferred,
            model_id: model,
            strategy: None,
            variant: None,
            duration_hint: None,
            token_hint: Some((prompt.chars().count() / 4).max(1) as u32),
        }
    }

    async fn call_llm(&self, task: &Task, prompt: &str, premium: bool) -> Result<LlmOutcome> {
        let req = self.selection_for(task, premium, prompt);
        self.chat(task, prompt, &req).await
    }

    async fn chat(&self, task: &Task, prompt: &str, req: &SelectionRequest) -> Result<LlmOutcome> {
        let selection = self.ctx.selector.select(ServiceType::Llm, req).await?;
        let llm = selection
            .client
            .as_llm()
            .ok_or_else(|| Error::Other("selector returned a non-LLM client".into()))?;

        let result = llm
            .chat(ChatRequest {
                messages: vec![ChatMessage::user(prompt)],
                temperature: Some(0.3),
                max_tokens: Some(2048),
                model: None,
            })
            .await;

        record_outcome(
            &self.ctx.breakers,
            &self.ctx.health,
            ServiceType::Llm,
            &selection.provider,
            result.as_ref().map_or_else(|e| !e.is_vendor_failure(), |_| true),
        );

        let resp = result?;
        let cost = llm.estimate_cost(
            resp.input_tokens.unwrap_or(0),
            resp.output_tokens.unwrap_or(0),
        );
        self.ctx
            .cost
            .record(UsageRecord {
                request_id: Uuid::new_v4(),
                attempt: 0,
                service_type: ServiceType::Llm,
                provider: selection.provider.clone(),
                model: Some(resp.model.clone()),
                user_id: Some(task.user_id.clone()),
                task_id: Some(task.id),
                cost_usd: cost,
                input_tokens: resp.input_tokens.map(i64::from),
                output_tokens: resp.output_tokens.map(i64::from),
                duration_seconds: None,
                recorded_at: chrono::Utc::now(),
            })
            .await;

        Ok(LlmOutcome {
            content: resp.content,
            provider: selection.provider,
            model: resp.model,
            input_tokens: resp.input_tokens,
            output_tokens: resp.output_tokens,
        })
    }

    /// Render Mermaid source to an image via the configured renderer and
    /// store it under the task's visuals prefix.
    async fn render_image(
        &self,
        task: &Task,
        visual_type: SummaryType,
        diagram: &str,
        image_format: &str,
        attempt_id: Uuid,
    ) -> Result<String> {
        let format = match image_format {
            "svg" => "svg",
            _ => "png",
        };

        let scratch = std::path::Path::new(&self.ctx.config.pipeline.tmp_dir)
            .join(task.id.to_string());
        tokio::fs::create_dir_all(&scratch).await?;
        let source_path = scratch.join("diagram.mmd");
        let image_path = scratch.join(format!("diagram.{format}"));
        tokio::fs::write(&source_path, diagram).await?;

        let output = tokio::process::Command::new(&self.ctx.config.summarize.mermaid_bin)
            .arg("-i")
            .arg(&source_path)
            .arg("-o")
            .arg(&image_path)
            .output()
            .await
            .map_err(|e| Error::Config(format!("failed to spawn mermaid renderer: {e}")))?;
        if !output.status.success() {
            return Err(Error::Other(format!(
                "mermaid renderer exited with {}",
                output.status
            )));
        }

        let bytes = tokio::fs::read(&image_path).await?;
        let selection = self
            .ctx
            .selector
            .select(
                ServiceType::Storage,
                &SelectionRequest {
                    owner: task.user_id.clone(),
                    ..Default::default()
                },
            )
            .await?;
        let store = selection
            .client
            .as_storage()
            .ok_or_else(|| Error::Other("selector returned a non-storage client".into()))?;

        let key = format!(
            "visuals/{}/{}/{}_{}.{format}",
            task.user_id,
            task.id,
            visual_type.as_str(),
            attempt_id.simple()
        );
        let content_type = if format == "svg" {
            "image/svg+xml"
        } else {
            "image/png"
        };
        store.put_object(&key, bytes, content_type).await?;
        record_outcome(
            &self.ctx.breakers,
            &self.ctx.health,
            ServiceType::Storage,
            &selection.provider,
            true,
        );
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── chapter parsing ───────────────────────────────────────────

    #[test]
    fn parses_chapter_json_wrapped_in_prose() {
        let text = r#"Here you go:
        {"total_chapters": 2, "chapters": [
            {"index": 1, "title": "Intro", "start_offset": 0, "end_offset": 120, "summary": "opening"},
            {"index": 2, "title": "Main", "start_offset": 120, "end_offset": 500, "summary": "body"}
        ]}"#;
        let doc = parse_chapters(text).unwrap();
        assert_eq!(doc.total_chapters, 2);
        assert_eq!(doc.chapters[1].title, "Main");
        assert_eq!(doc.chapters[0].end_offset, 120);
    }

    #[test]
    fn malformed_chapter_json_is_none() {
        assert!(parse_chapters("no json here").is_none());
        assert!(parse_chapters("{\"total_chapters\": }").is_none());
        assert!(parse_chapters("{}").is_none()); // missing required fields
    }

    // ── diagram extraction / validation ───────────────────────────

    #[test]
    fn extracts_from_mermaid_fence() {
        let resp = "```mermaid\nmindmap\n  root((Topic))\n```";
        assert_eq!(extract_diagram(resp), "mindmap\n  root((Topic))");
    }

    #[test]
    fn extracts_bare_source() {
        assert_eq!(extract_diagram("  timeline\n  2026 : launch  "), "timeline\n  2026 : launch");
    }

    #[test]
    fn validates_by_leading_keyword() {
        assert!(validate_diagram("mindmap", "mindmap\n  root((X))"));
        assert!(validate_diagram("timeline", "\ntimeline\n  2026 : y"));
        assert!(validate_diagram("flowchart", "flowchart TD\n  A-->B"));
        assert!(validate_diagram("flowchart", "graph LR\n  A-->B"));
        assert!(!validate_diagram("mindmap", "flowchart TD\n  A-->B"));
        assert!(!validate_diagram("mindmap", ""));
    }
}
