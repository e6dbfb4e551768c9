//! Phrase Builder / Segment Assembler (spec §4.3): turns a stitched word
//! stream into candidate `Segment`s, either via the acoustic segmenter's
//! boundary proposals or the built-in text-gap fallback, then classifies
//! each phrase's sound category before it becomes eligible for clustering.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::capability::{Segmenter, SegmenterSpan};
use crate::config::AssemblerConfig;
use crate::error::CapabilityError;
use crate::types::{SoundCategory, Word};

static BLANK_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*\[BLANK_AUDIO\]\s*$").unwrap());
static ENVIRONMENTAL_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*\[(MUSIC|NOISE|SILENCE|APPLAUSE)\]\s*$").unwrap());
const HUMAN_VOICE_ALLOWLIST: &[&str] = &["[laughter]", "[cough]", "[sigh]", "[sniff]", "(laughs)"];

/// A raw candidate phrase before classification, in chunk-local time.
pub struct RawPhrase {
    pub words: Vec<Word>,
}

/// Classifies phrase text into a sound category per the rule-based
/// classifier of §4.3.
pub fn classify(text: &str) -> SoundCategory {
    let trimmed = text.trim();
    if trimmed.is_empty() || BLANK_MARKER.is_match(trimmed) {
        return SoundCategory::Blank;
    }
    if ENVIRONMENTAL_MARKER.is_match(trimmed) {
        return SoundCategory::Environmental;
    }
    let lowered = trimmed.to_lowercase();
    if HUMAN_VOICE_ALLOWLIST.iter().any(|m| lowered.contains(m)) {
        return SoundCategory::HumanVoice;
    }
    SoundCategory::Speech
}

/// Splits a stitched word stream into phrases using the default text-gap
/// policy: a new phrase starts whenever the gap between consecutive words
/// exceeds `gap_threshold_s`. Phrases shorter than `min_phrase_duration_s`
/// are merged into the previous phrase (they inherit its speaker rather
/// than getting their own embedding).
pub fn split_text_gap(words: &[Word], config: &AssemblerConfig) -> Vec<RawPhrase> {
    if words.is_empty() {
        return Vec::new();
    }

    let mut phrases: Vec<Vec<Word>> = Vec::new();
    let mut current: Vec<Word> = vec![words[0].clone()];

    for pair in words.windows(2) {
        let (prev, next) = (&pair[0], &pair[1]);
        let gap = next.t_start - prev.t_end;
        if gap > config.gap_threshold_s {
            phrases.push(std::mem::take(&mut current));
        }
        current.push(next.clone());
    }
    phrases.push(current);

    let mut merged: Vec<Vec<Word>> = Vec::new();
    for phrase in phrases {
        let duration = phrase.last().map(|w| w.t_end).unwrap_or(0.0)
            - phrase.first().map(|w| w.t_start).unwrap_or(0.0);
        if duration < config.min_phrase_duration_s {
            if let Some(prev) = merged.last_mut() {
                prev.extend(phrase);
                continue;
            }
        }
        merged.push(phrase);
    }

    merged.into_iter().map(|words| RawPhrase { words }).collect()
}

/// Applies the segmenter's span proposals to the word stream: confidence
/// floor, minimum-duration filter, symmetric boundary padding, then merges
/// adjacent spans from the same local speaker when the gap is small.
pub fn apply_segmenter_spans(
    words: &[Word],
    mut spans: Vec<SegmenterSpan>,
    config: &AssemblerConfig,
    audio_duration: f32,
) -> Vec<RawPhrase> {
    spans.retain(|s| s.confidence >= config.confidence_floor);
    spans.retain(|s| s.t_end - s.t_start >= config.min_phrase_duration_s);
    spans.sort_by(|a, b| a.t_start.partial_cmp(&b.t_start).unwrap());

    for span in spans.iter_mut() {
        span.t_start = (span.t_start - config.boundary_pad_s).max(0.0);
        span.t_end = (span.t_end + config.boundary_pad_s).min(audio_duration);
    }

    let mut merged: Vec<SegmenterSpan> = Vec::new();
    for span in spans {
        if let Some(prev) = merged.last_mut() {
            if prev.speaker_local_id == span.speaker_local_id
                && span.t_start - prev.t_end <= config.merge_gap_threshold_s
            {
                prev.t_end = span.t_end;
                continue;
            }
        }
        merged.push(span);
    }

    merged
        .into_iter()
        .map(|span| {
            let phrase_words: Vec<Word> = words
                .iter()
                .filter(|w| w.t_start >= span.t_start && w.t_end <= span.t_end)
                .cloned()
                .collect();
            RawPhrase { words: phrase_words }
        })
        .filter(|p| !p.words.is_empty())
        .collect()
}

/// Tries the acoustic segmenter first (if configured), falling back to the
/// text-gap policy on `SegmenterFailure`, per the precedence resolved in
/// SPEC_FULL.md §9.
pub async fn assemble(
    words: &[Word],
    audio: &[f32],
    sample_rate: u32,
    config: &AssemblerConfig,
    segmenter: Option<&dyn Segmenter>,
) -> Result<Vec<RawPhrase>, CapabilityError> {
    let audio_duration = audio.len() as f32 / sample_rate as f32;

    if config.use_acoustic_segmenter {
        if let Some(segmenter) = segmenter {
            match segmenter.segment(audio, Some(words)).await {
                Ok(spans) => return Ok(apply_segmenter_spans(words, spans, config, audio_duration)),
                Err(_) => {
                    // Fall back to text-gap, per the resolved precedence.
                }
            }
        }
    }
    Ok(split_text_gap(words, config))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(text: &str, start: f32, end: f32) -> Word {
        Word {
            text: text.to_string(),
            t_start: start,
            t_end: end,
        }
    }

    #[test]
    fn classifies_blank_audio() {
        assert_eq!(classify("[BLANK_AUDIO]"), SoundCategory::Blank);
        assert_eq!(classify("  "), SoundCategory::Blank);
    }

    #[test]
    fn classifies_environmental() {
        assert_eq!(classify("[MUSIC]"), SoundCategory::Environmental);
    }

    #[test]
    fn classifies_human_voice() {
        assert_eq!(classify("[laughter]"), SoundCategory::HumanVoice);
    }

    #[test]
    fn classifies_normal_speech() {
        assert_eq!(classify("hello there"), SoundCategory::Speech);
    }

    #[test]
    fn gap_splits_into_phrases() {
        let config = AssemblerConfig {
            gap_threshold_s: 0.5,
            min_phrase_duration_s: 0.0,
            ..AssemblerConfig::default()
        };
        let words = vec![
            word("hi", 0.0, 0.2),
            word("there", 0.3, 0.5),
            word("bye", 2.0, 2.2),
        ];
        let phrases = split_text_gap(&words, &config);
        assert_eq!(phrases.len(), 2);
        assert_eq!(phrases[0].words.len(), 2);
        assert_eq!(phrases[1].words.len(), 1);
    }

    #[test]
    fn short_phrase_merges_into_previous() {
        let config = AssemblerConfig {
            gap_threshold_s: 0.1,
            min_phrase_duration_s: 0.3,
            ..AssemblerConfig::default()
        };
        let words = vec![
            word("hello", 0.0, 0.4),
            word("x", 1.0, 1.05), // isolated short phrase, merges back
        ];
        let phrases = split_text_gap(&words, &config);
        assert_eq!(phrases.len(), 1);
        assert_eq!(phrases[0].words.len(), 2);
    }
}
