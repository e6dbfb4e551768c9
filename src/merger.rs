//! Overlap Merger (spec §4.2): stitches successive chunks' word streams by
//! matching the overlap region, in text first, timestamps last.

use serde::{Deserialize, Serialize};

use crate::types::Word;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MergeMethod {
    Exact,
    Fuzzy,
    Timestamp,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeResult {
    pub merge_index: usize,
    pub method: MergeMethod,
    pub confidence: f32,
    pub matched_words: usize,
}

fn normalize(token: &str) -> String {
    token
        .chars()
        .filter(|c| c.is_alphanumeric())
        .collect::<String>()
        .to_lowercase()
}

/// Longest common subsequence over normalized tokens; returns the length of
/// the match and the index just past the end of the match in `curr`.
fn lcs_tail_match(prev: &[String], curr: &[String]) -> (usize, usize) {
    let n = prev.len();
    let m = curr.len();
    if n == 0 || m == 0 {
        return (0, 0);
    }
    let mut dp = vec![vec![0usize; m + 1]; n + 1];
    for i in 1..=n {
        for j in 1..=m {
            dp[i][j] = if prev[i - 1] == curr[j - 1] {
                dp[i - 1][j - 1] + 1
            } else {
                dp[i - 1][j].max(dp[i][j - 1])
            };
        }
    }
    // Walk back to find where the match ends in `curr`.
    let mut i = n;
    let mut j = m;
    let mut last_curr_index = 0usize;
    let matched = dp[n][m];
    while i > 0 && j > 0 && dp[i][j] > 0 {
        if prev[i - 1] == curr[j - 1] {
            if last_curr_index == 0 {
                last_curr_index = j;
            }
            i -= 1;
            j -= 1;
        } else if dp[i - 1][j] >= dp[i][j - 1] {
            i -= 1;
        } else {
            j -= 1;
        }
    }
    (matched, last_curr_index)
}

fn edit_distance_close(a: &str, b: &str, tolerance: usize) -> bool {
    strsim::levenshtein(a, b) <= tolerance
}

/// Finds the index in `curr_words` at which genuinely new content begins,
/// given the previous chunk's words and the overlap duration carried by the
/// current chunk.
pub fn find_merge_point(
    prev_words: &[Word],
    curr_words: &[Word],
    overlap_duration: f32,
    prev_chunk_duration: f32,
) -> MergeResult {
    if overlap_duration <= 0.0 || prev_words.is_empty() || curr_words.is_empty() {
        return MergeResult {
            merge_index: 0,
            method: MergeMethod::None,
            confidence: 1.0,
            matched_words: 0,
        };
    }

    let overlap_region_start = prev_chunk_duration - overlap_duration;
    let prev_region: Vec<&Word> = prev_words
        .iter()
        .filter(|w| w.t_end >= overlap_region_start)
        .collect();
    let curr_region: Vec<&Word> = curr_words
        .iter()
        .filter(|w| w.t_start < overlap_duration)
        .collect();

    if prev_region.is_empty() || curr_region.is_empty() {
        return timestamp_cut(curr_words, overlap_duration);
    }

    let prev_tokens: Vec<String> = prev_region.iter().map(|w| normalize(&w.text)).collect();
    let curr_tokens: Vec<String> = curr_region.iter().map(|w| normalize(&w.text)).collect();

    let (matched, last_curr_rel_index) = lcs_tail_match(&prev_tokens, &curr_tokens);
    // A single-word overlap region (curr_region already clipped to
    // `overlap_duration`) counts as an exact hit when it matches in full;
    // `matched >= 2` alone would never fire when only one word falls
    // inside the overlap window, as in the canonical worked example.
    let full_region_match = matched > 0 && matched == curr_tokens.len();
    if matched >= 2 || full_region_match {
        let total = prev_tokens.len().max(curr_tokens.len());
        let confidence = matched as f32 / total as f32;
        return MergeResult {
            merge_index: last_curr_rel_index,
            method: MergeMethod::Exact,
            confidence,
            matched_words: matched,
        };
    }

    // Fuzzy: case-folded, punctuation-stripped with small edit-distance
    // tolerance, scanning for the longest matching run from the start of
    // the overlap region.
    let mut fuzzy_matched = 0usize;
    let mut idx = 0usize;
    let max_check = prev_tokens.len().min(curr_tokens.len());
    for k in 0..max_check {
        if edit_distance_close(&prev_tokens[prev_tokens.len() - max_check + k], &curr_tokens[k], 1) {
            fuzzy_matched += 1;
            idx = k + 1;
        } else {
            break;
        }
    }
    if fuzzy_matched >= 2 {
        let confidence = fuzzy_matched as f32 / max_check as f32 * 0.8;
        return MergeResult {
            merge_index: idx,
            method: MergeMethod::Fuzzy,
            confidence,
            matched_words: fuzzy_matched,
        };
    }

    timestamp_cut(curr_words, overlap_duration)
}

fn timestamp_cut(curr_words: &[Word], overlap_duration: f32) -> MergeResult {
    let merge_index = curr_words
        .iter()
        .position(|w| w.t_start >= overlap_duration)
        .unwrap_or(curr_words.len());
    MergeResult {
        merge_index,
        method: MergeMethod::Timestamp,
        confidence: 0.3,
        matched_words: 0,
    }
}

/// Subtracts `overlap_duration` from every word's timestamps; the identity
/// when `overlap_duration == 0`.
pub fn adjust_timestamps(words: &[Word], overlap_duration: f32) -> Vec<Word> {
    words
        .iter()
        .map(|w| Word {
            text: w.text.clone(),
            t_start: (w.t_start - overlap_duration).max(0.0),
            t_end: (w.t_end - overlap_duration).max(0.0),
        })
        .collect()
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
    fn zero_overlap_is_identity_and_keeps_all() {
        let prev = vec![word("hello", 0.0, 0.4)];
        let curr = vec![word("world", 0.0, 0.4)];
        let result = find_merge_point(&prev, &curr, 0.0, 1.0);
        assert_eq!(result.merge_index, 0);
        assert_eq!(result.method, MergeMethod::None);
        assert_eq!(adjust_timestamps(&curr, 0.0), curr);
    }

    #[test]
    fn s1_overlap_stitching_exact_match() {
        // Chunk A words; chunk B overlap_duration = 1.0.
        let prev = vec![word("hello", 0.0, 0.4), word("world", 0.5, 0.9)];
        let curr = vec![word("world", 0.6, 1.0), word("again", 1.2, 1.5)];
        let result = find_merge_point(&prev, &curr, 1.0, 0.9);
        assert_eq!(result.merge_index, 1);
        assert_eq!(result.method, MergeMethod::Exact);
        assert!(result.confidence >= 0.5);

        let kept = &curr[result.merge_index..];
        let adjusted = adjust_timestamps(kept, 1.0);
        assert_eq!(adjusted, vec![word("again", 0.2, 0.5)]);
    }

    #[test]
    fn no_match_falls_back_to_timestamp_cut() {
        let prev = vec![word("alpha", 0.0, 0.3)];
        let curr = vec![word("zeta", 0.9, 1.2), word("yotta", 1.3, 1.6)];
        let result = find_merge_point(&prev, &curr, 1.0, 0.5);
        assert_eq!(result.method, MergeMethod::Timestamp);
        assert_eq!(result.merge_index, 1);
    }

    #[test]
    fn merge_index_never_exceeds_len() {
        let prev = vec![word("a", 0.0, 0.1)];
        let curr = vec![word("b", 0.0, 0.1)];
        let result = find_merge_point(&prev, &curr, 2.0, 0.1);
        assert!(result.merge_index <= curr.len());
    }
}
