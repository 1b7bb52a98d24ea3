//! Transcript post-processing: quality scoring, filler filtering, and
//! same-speaker merging. Pure in-memory functions; nothing here suspends.

use es_domain::transcript::TranscriptSegment;

/// Confidence below this counts as a low-confidence segment.
const LOW_CONFIDENCE: f64 = 0.7;
/// Maximum gap (seconds) bridged when merging same-speaker segments.
const MERGE_GAP_SECONDS: f64 = 2.0;

/// Filler tokens dropped during preprocessing, per language.
const FILLERS_ZH: &[&str] = &["嗯", "啊", "呃", "哦", "唉", "哎", "嗯嗯", "啊啊"];
const FILLERS_EN: &[&str] = &["um", "uh", "er", "ah", "mm", "hm"];

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Quality scoring
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityLevel {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy)]
pub struct TranscriptQuality {
    pub average_confidence: f64,
    pub low_confidence_ratio: f64,
    pub level: QualityLevel,
}

/// Classify transcript quality from segment confidences.
///
/// Segments without a confidence value are excluded from the average; a
/// transcript with no confidences at all is treated as medium.
pub fn assess_quality(segments: &[TranscriptSegment]) -> TranscriptQuality {
    let confidences: Vec<f64> = segments.iter().filter_map(|s| s.confidence).collect();
    if confidences.is_empty() {
        return TranscriptQuality {
            average_confidence: 0.0,
            low_confidence_ratio: 0.0,
            level: QualityLevel::Medium,
        };
    }

    let average = confidences.iter().sum::<f64>() / confidences.len() as f64;
    let low = confidences.iter().filter(|&&c| c < LOW_CONFIDENCE).count();
    let level = if average >= 0.8 {
        QualityLevel::High
    } else if average >= 0.6 {
        QualityLevel::Medium
    } else {
        QualityLevel::Low
    };

    TranscriptQuality {
        average_confidence: average,
        low_confidence_ratio: low as f64 / confidences.len() as f64,
        level,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Preprocessing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn is_filler(content: &str, confidence: Option<f64>) -> bool {
    let trimmed = content.trim();
    if trimmed.chars().count() > 2 {
        return false;
    }
    if !confidence.is_some_and(|c| c < LOW_CONFIDENCE) {
        return false;
    }
    let lower = trimmed.to_lowercase();
    FILLERS_ZH.contains(&trimmed) || FILLERS_EN.contains(&lower.as_str())
}

struct Block {
    speaker_id: Option<String>,
    end_time: f64,
    content: String,
}

/// Produce the speaker-annotated block text fed to the summarizer.
///
/// Drops low-confidence filler segments, merges consecutive segments that
/// share a speaker with an inter-segment gap of at most two seconds, and
/// renders one block per merged run separated by blank lines.
pub fn preprocess(segments: &[TranscriptSegment]) -> String {
    let mut blocks: Vec<Block> = Vec::new();

    for seg in segments {
        if is_filler(&seg.content, seg.confidence) {
            continue;
        }
        let content = seg.content.trim();
        if content.is_empty() {
            continue;
        }

        match blocks.last_mut() {
            Some(last)
                if last.speaker_id == seg.speaker_id
                    && seg.start_time - last.end_time <= MERGE_GAP_SECONDS =>
            {
                last.content.push(' ');
                last.content.push_str(content);
                last.end_time = seg.end_time;
            }
            _ => blocks.push(Block {
                speaker_id: seg.speaker_id.clone(),
                end_time: seg.end_time,
                content: content.to_string(),
            }),
        }
    }

    blocks
        .iter()
        .map(|b| match &b.speaker_id {
            Some(speaker) => format!("[{speaker}] {}", b.content),
            None => b.content.clone(),
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn seg(speaker: Option<&str>, start: f64, end: f64, content: &str, conf: Option<f64>) -> TranscriptSegment {
        TranscriptSegment {
            id: 0,
            task_id: Uuid::nil(),
            speaker_id: speaker.map(str::to_string),
            start_time: start,
            end_time: end,
            content: content.to_string(),
            confidence: conf,
            words: None,
            is_edited: false,
            original_content: None,
            created_at: Utc::now(),
        }
    }

    // ── quality ───────────────────────────────────────────────────

    #[test]
    fn quality_thresholds() {
        let high = [seg(None, 0.0, 1.0, "a", Some(0.9)), seg(None, 1.0, 2.0, "b", Some(0.8))];
        assert_eq!(assess_quality(&high).level, QualityLevel::High);

        let medium = [seg(None, 0.0, 1.0, "a", Some(0.7))];
        assert_eq!(assess_quality(&medium).level, QualityLevel::Medium);

        let low = [seg(None, 0.0, 1.0, "a", Some(0.45))];
        assert_eq!(assess_quality(&low).level, QualityLevel::Low);
    }

    #[test]
    fn quality_counts_low_confidence_ratio() {
        let segs = [
            seg(None, 0.0, 1.0, "a", Some(0.95)),
            seg(None, 1.0, 2.0, "b", Some(0.65)),
            seg(None, 2.0, 3.0, "c", Some(0.5)),
            seg(None, 3.0, 4.0, "d", None), // no confidence, excluded
        ];
        let q = assess_quality(&segs);
        assert!((q.low_confidence_ratio - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn no_confidences_defaults_to_medium() {
        let segs = [seg(None, 0.0, 1.0, "a", None)];
        assert_eq!(assess_quality(&segs).level, QualityLevel::Medium);
    }

    // ── filler filtering ──────────────────────────────────────────

    #[test]
    fn low_confidence_short_fillers_are_dropped() {
        let segs = [
            seg(Some("speaker_0"), 0.0, 0.5, "嗯", Some(0.4)),
            seg(Some("speaker_0"), 0.5, 1.0, "um", Some(0.5)),
            seg(Some("speaker_0"), 1.0, 3.0, "let's begin", Some(0.9)),
        ];
        assert_eq!(preprocess(&segs), "[speaker_0] let's begin");
    }

    #[test]
    fn confident_fillers_survive() {
        // High confidence means the speaker really said it.
        let segs = [seg(Some("speaker_0"), 0.0, 0.5, "um", Some(0.95))];
        assert_eq!(preprocess(&segs), "[speaker_0] um");
    }

    #[test]
    fn long_content_is_never_treated_as_filler() {
        let segs = [seg(None, 0.0, 0.5, "umbrella", Some(0.3))];
        assert_eq!(preprocess(&segs), "umbrella");
    }

    // ── merging ───────────────────────────────────────────────────

    #[test]
    fn same_speaker_within_gap_merges_with_single_space() {
        let segs = [
            seg(Some("speaker_0"), 0.0, 2.0, "hello", Some(0.9)),
            seg(Some("speaker_0"), 3.5, 5.0, "world", Some(0.9)), // gap 1.5s
        ];
        assert_eq!(preprocess(&segs), "[speaker_0] hello world");
    }

    #[test]
    fn gap_over_two_seconds_breaks_the_block() {
        let segs = [
            seg(Some("speaker_0"), 0.0, 2.0, "hello", Some(0.9)),
            seg(Some("speaker_0"), 4.5, 6.0, "again", Some(0.9)), // gap 2.5s
        ];
        assert_eq!(preprocess(&segs), "[speaker_0] hello\n\n[speaker_0] again");
    }

    #[test]
    fn speaker_change_breaks_the_block() {
        let segs = [
            seg(Some("speaker_0"), 0.0, 2.0, "question?", Some(0.9)),
            seg(Some("speaker_1"), 2.1, 4.0, "answer.", Some(0.9)),
        ];
        assert_eq!(
            preprocess(&segs),
            "[speaker_0] question?\n\n[speaker_1] answer."
        );
    }

    #[test]
    fn untagged_segments_render_without_prefix() {
        let segs = [
            seg(None, 0.0, 2.0, "plain one", Some(0.9)),
            seg(None, 2.5, 4.0, "plain two", Some(0.9)),
        ];
        assert_eq!(preprocess(&segs), "plain one plain two");
    }

    #[test]
    fn empty_input_renders_empty() {
        assert_eq!(preprocess(&[]), "");
    }
}
