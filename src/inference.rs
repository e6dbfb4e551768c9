//! Conversation Inference (spec §4.6): turns the stream of per-segment
//! clustering decisions into a conversation-level hypothesis of who is
//! actually participating, then uses that hypothesis to gently correct
//! attributions the raw clusterer got wrong by a hair — without ever
//! mutating the original clustering decision that produced them.

use std::collections::{HashMap, HashSet};

use crate::clusterer::ClusterOutcome;
use crate::config::BoostingConfig;
use crate::types::{
    Attribution, ClusterDebug, DisplayAttribution, Hypothesis, HypothesisHistoryEntry,
    ParticipantHypothesis, SimilarityRank, Speaker, SpeakerId,
};
use crate::unknown_clusterer::UnknownClusterer;

#[derive(Debug, Clone, Default)]
struct AssignmentStat {
    count: u64,
    similarity_sum: f32,
    best_match_count: u64,
    speaker_id: Option<SpeakerId>,
    enrolled: bool,
    is_unknown: bool,
    closest_enrolled: Option<String>,
}

impl AssignmentStat {
    fn avg_similarity(&self) -> f32 {
        if self.count == 0 {
            0.0
        } else {
            self.similarity_sum / self.count as f32
        }
    }
}

/// Everything retained about one segment's attribution, enough to replay
/// the boost decision later without re-running clustering.
#[derive(Debug, Clone)]
pub struct StoredAttribution {
    pub original: Attribution,
    pub boosted: Attribution,
    pub display: DisplayAttribution,
    pub hypothesis_version: u64,
    pub cluster_debug: Option<ClusterDebug>,
    candidates: Vec<SimilarityRank>,
    is_unknown: bool,
}

/// Result of recording one segment's clustering outcome.
pub struct SegmentRecord {
    pub index: usize,
    pub original: Attribution,
    pub boosted: Attribution,
    pub display: DisplayAttribution,
    pub hypothesis_version: u64,
    /// Indices into prior segments whose display attribution changed as a
    /// side effect of a hypothesis rebuild triggered by this segment.
    pub reattributed: Vec<usize>,
}

pub struct ConversationInference {
    config: BoostingConfig,
    expected_speakers: u32,
    stats: HashMap<String, AssignmentStat>,
    unknown_clusterer: UnknownClusterer,
    hypothesis: Hypothesis,
    hypothesis_history: Vec<HypothesisHistoryEntry>,
    attributions: Vec<StoredAttribution>,
    segments_since_rebuild: u64,
}

impl ConversationInference {
    pub fn new(
        config: BoostingConfig,
        expected_speakers: u32,
        unknown_clusterer: UnknownClusterer,
    ) -> Self {
        Self {
            config,
            expected_speakers,
            stats: HashMap::new(),
            unknown_clusterer,
            hypothesis: Hypothesis::default(),
            hypothesis_history: Vec::new(),
            attributions: Vec::new(),
            segments_since_rebuild: 0,
        }
    }

    pub fn hypothesis(&self) -> &Hypothesis {
        &self.hypothesis
    }

    pub fn hypothesis_history(&self) -> &[HypothesisHistoryEntry] {
        &self.hypothesis_history
    }

    pub fn attribution(&self, index: usize) -> Option<&StoredAttribution> {
        self.attributions.get(index)
    }

    pub fn unknown_clusterer(&self) -> &UnknownClusterer {
        &self.unknown_clusterer
    }

    /// Records a clustering decision for the next segment, applies (or
    /// skips) hypothesis boosting, and rebuilds the hypothesis if enough
    /// new evidence has accumulated. Returns the indices of any earlier
    /// segments whose display label changed as a result.
    pub fn record_segment(
        &mut self,
        outcome: &ClusterOutcome,
        embedding: Option<&[f32]>,
        enrolled_speakers: &[Speaker],
    ) -> SegmentRecord {
        let (speaker_id, label, similarity, is_unknown, closest_enrolled) =
            if outcome.speaker_id == SpeakerId::None {
                let embedding = embedding.expect("embedding required to sub-cluster an unknown attribution");
                let uid = self.unknown_clusterer.assign(embedding, enrolled_speakers);
                let identity = self
                    .unknown_clusterer
                    .identities()
                    .iter()
                    .find(|i| i.id == uid)
                    .expect("assign() always returns an identity it just created or updated");
                (
                    uid,
                    identity.label(),
                    identity.similarities.last().copied().unwrap_or(outcome.similarity),
                    true,
                    identity.closest_enrolled.as_ref().map(|(n, _)| n.clone()),
                )
            } else {
                let label = outcome
                    .debug
                    .all_similarities
                    .iter()
                    .find(|r| r.speaker_id == outcome.speaker_id)
                    .map(|r| r.label.clone())
                    .unwrap_or_else(|| format!("{:?}", outcome.speaker_id));
                (outcome.speaker_id, label, outcome.similarity, false, None)
            };

        let original = Attribution {
            speaker_id,
            label: label.clone(),
            similarity,
        };

        let entry = self.stats.entry(label.clone()).or_default();
        entry.count += 1;
        entry.similarity_sum += similarity;
        entry.speaker_id = Some(speaker_id);
        entry.enrolled = matches!(speaker_id, SpeakerId::Enrolled(_));
        entry.is_unknown = is_unknown;
        if closest_enrolled.is_some() {
            entry.closest_enrolled = closest_enrolled;
        }
        if outcome.debug.best == Some(speaker_id) {
            entry.best_match_count += 1;
        }

        let candidates = self.build_candidates(&outcome.debug, &original, is_unknown);
        let (boosted, display) = self.resolve(&original, &outcome.debug, &candidates, is_unknown);

        let stored = StoredAttribution {
            original: original.clone(),
            boosted: boosted.clone(),
            display: display.clone(),
            hypothesis_version: self.hypothesis.version,
            cluster_debug: Some(outcome.debug.clone()),
            candidates,
            is_unknown,
        };
        self.attributions.push(stored);
        let index = self.attributions.len() - 1;

        let reattributed = self.maybe_rebuild_hypothesis();

        SegmentRecord {
            index,
            original,
            boosted,
            display,
            hypothesis_version: self.hypothesis.version,
            reattributed,
        }
    }

    fn build_candidates(
        &self,
        debug: &ClusterDebug,
        original: &Attribution,
        is_unknown: bool,
    ) -> Vec<SimilarityRank> {
        let mut candidates = debug.all_similarities.clone();
        if is_unknown {
            candidates.insert(
                0,
                SimilarityRank {
                    speaker_id: original.speaker_id,
                    label: original.label.clone(),
                    similarity: original.similarity,
                    enrolled: false,
                },
            );
            candidates.sort_by(|a, b| b.similarity.partial_cmp(&a.similarity).unwrap());
        }
        candidates
    }

    /// Applies the boost gate and, if not gated off, the boost itself;
    /// enforces the post-boost confidence floor; builds the display view.
    fn resolve(
        &self,
        original: &Attribution,
        debug: &ClusterDebug,
        candidates: &[SimilarityRank],
        is_unknown: bool,
    ) -> (Attribution, DisplayAttribution) {
        let gate = self.boost_gate(debug, &original.label, is_unknown);

        let (mut winner, reason, mut influenced) = match gate {
            Some(skip_reason) => (original.clone(), skip_reason, false),
            None => {
                let outcome = self.apply_boost(candidates, original);
                (outcome.winner, outcome.reason, outcome.was_influenced)
            }
        };

        if winner.similarity < self.config.min_similarity_after_boost {
            winner = Attribution {
                speaker_id: SpeakerId::None,
                label: "Unknown".to_string(),
                similarity: winner.similarity,
            };
        }
        influenced = influenced || winner.label != original.label;

        let alternate_label = candidates
            .iter()
            .find(|c| c.label != winner.label && (winner.similarity - c.similarity).abs() <= self.config.display_alternate_margin)
            .map(|c| c.label.clone());

        let is_unexpected = !self.hypothesis.participants.is_empty() && !self.hypothesis.contains(&winner.label);

        let display = DisplayAttribution {
            label: winner.label.clone(),
            alternate_label,
            is_unexpected,
            was_influenced: influenced,
            reason: reason.to_string(),
        };

        (winner, display)
    }

    fn boost_gate(&self, debug: &ClusterDebug, label: &str, is_unknown: bool) -> Option<&'static str> {
        if self.hypothesis.participants.is_empty() {
            return Some("no_hypothesis");
        }
        let best_sim = debug.all_similarities.first().map(|r| r.similarity).unwrap_or(0.0);
        if best_sim >= self.config.skip_boost_if_confident {
            return Some("already_confident");
        }
        if debug.margin >= self.config.ambiguity_margin_threshold {
            return Some("clear_winner");
        }
        if best_sim < self.config.min_similarity_for_boosting {
            return Some("low_similarity");
        }
        if is_unknown && self.hypothesis.contains(label) && !self.config.prefer_enrolled_over_unknown_winner {
            return Some("unknown_participant_better");
        }
        None
    }

    /// The boost itself: considers the top `boost_eligibility_rank`
    /// candidates, boosts whichever are hypothesis participants, and
    /// decides whether the boosted runner-up overtakes the original winner.
    fn apply_boost(&self, candidates: &[SimilarityRank], original: &Attribution) -> BoostOutcome {
        let rank = self.config.boost_eligibility_rank.min(candidates.len());
        if rank < 2 {
            return BoostOutcome::unchanged(original, "no_participant_contender");
        }

        let is_participant = |c: &SimilarityRank| self.hypothesis.contains(&c.label);
        let winner_is_participant = is_participant(&candidates[0]);
        let runner_is_participant = is_participant(&candidates[1]);

        if winner_is_participant && runner_is_participant {
            let mut boosted: Vec<SimilarityRank> = candidates.to_vec();
            for c in boosted.iter_mut().take(rank) {
                if is_participant(c) {
                    let factor = self.boost_factor_for(c);
                    c.similarity *= factor;
                }
            }
            boosted.sort_by(|a, b| b.similarity.partial_cmp(&a.similarity).unwrap());
            if boosted[0].label != candidates[0].label {
                BoostOutcome {
                    winner: Attribution {
                        speaker_id: boosted[0].speaker_id,
                        label: boosted[0].label.clone(),
                        similarity: boosted[0].similarity,
                    },
                    was_influenced: true,
                    reason: "boosted_match",
                }
            } else {
                BoostOutcome::unchanged(original, "participant_already_winning")
            }
        } else if !winner_is_participant && runner_is_participant {
            let factor = self.boost_factor_for(&candidates[1]);
            let boosted_sim = candidates[1].similarity * factor;
            if boosted_sim > candidates[0].similarity {
                BoostOutcome {
                    winner: Attribution {
                        speaker_id: candidates[1].speaker_id,
                        label: candidates[1].label.clone(),
                        similarity: boosted_sim,
                    },
                    was_influenced: true,
                    reason: "boosted_match",
                }
            } else {
                BoostOutcome::unchanged(original, "no_participant_contender")
            }
        } else if winner_is_participant {
            BoostOutcome::unchanged(original, "participant_already_winning")
        } else {
            BoostOutcome::unchanged(original, "no_participant_contender")
        }
    }

    fn boost_factor_for(&self, candidate: &SimilarityRank) -> f32 {
        if matches!(candidate.speaker_id, SpeakerId::Unknown(_)) {
            self.config.unknown_boost_factor
        } else {
            self.config.boost_factor
        }
    }

    fn build_hypothesis(&self, total_segments: u64) -> Hypothesis {
        // Two candidate sources: the assignment stats (gated by occurrence
        // count) for enrolled/discovered speakers, and the unknown
        // clusterer's own eligible identities (gated by its own
        // min-segments/min-confidence thresholds) for Unknown ones.
        let eligible_unknowns: HashSet<String> = self
            .unknown_clusterer
            .eligible_identities()
            .map(|identity| identity.label())
            .collect();

        let mut participants: Vec<ParticipantHypothesis> = self
            .stats
            .iter()
            .filter(|(name, s)| {
                if s.is_unknown {
                    eligible_unknowns.contains(*name)
                } else {
                    s.count >= self.config.participant_min_occurrences as u64
                }
            })
            .map(|(name, s)| {
                let bonus = if s.enrolled { self.config.enrolled_score_bonus } else { 0.0 };
                let score = s.count as f32 * s.avg_similarity() + bonus;
                ParticipantHypothesis {
                    name: name.clone(),
                    speaker_id: s.speaker_id.unwrap_or(SpeakerId::None),
                    confidence: score,
                    segment_count: s.count,
                    avg_similarity: s.avg_similarity(),
                    is_unknown: s.is_unknown,
                    closest_enrolled: s.closest_enrolled.clone(),
                }
            })
            .collect();

        participants.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap());
        participants.truncate(self.expected_speakers.max(1) as usize);

        Hypothesis {
            participants,
            version: self.hypothesis.version,
            total_segments,
        }
    }

    fn maybe_rebuild_hypothesis(&mut self) -> Vec<usize> {
        self.segments_since_rebuild += 1;
        let total_segments = self.attributions.len() as u64;

        if total_segments < self.config.hypothesis_warmup_segments {
            return Vec::new();
        }
        if self.hypothesis.version > 0 && self.segments_since_rebuild < self.config.hypothesis_rebuild_interval {
            return Vec::new();
        }
        self.segments_since_rebuild = 0;

        let mut candidate = self.build_hypothesis(total_segments);

        let old_names: HashSet<String> = self.hypothesis.names().iter().map(|s| s.to_string()).collect();
        let new_names: HashSet<String> = candidate.names().iter().map(|s| s.to_string()).collect();

        if old_names == new_names {
            candidate.version = self.hypothesis.version;
            self.hypothesis = candidate;
            return Vec::new();
        }

        let added: Vec<String> = new_names.difference(&old_names).cloned().collect();
        let removed: Vec<String> = old_names.difference(&new_names).cloned().collect();
        candidate.version = self.hypothesis.version + 1;
        self.hypothesis = candidate;
        self.hypothesis_history.push(HypothesisHistoryEntry {
            version: self.hypothesis.version,
            added,
            removed,
        });

        self.retroactive_reattribute()
    }

    /// Replays the boost decision for every stored segment under the new
    /// hypothesis, leaving `original` untouched. Returns indices whose
    /// display label actually changed.
    fn retroactive_reattribute(&mut self) -> Vec<usize> {
        let mut changed = Vec::new();
        for i in 0..self.attributions.len() {
            let (original, debug, candidates, is_unknown) = {
                let a = &self.attributions[i];
                (
                    a.original.clone(),
                    a.cluster_debug.clone().unwrap_or_else(|| ClusterDebug {
                        all_similarities: Vec::new(),
                        best: None,
                        runner_up: None,
                        margin: 0.0,
                        reason: crate::types::DecisionReason::NoEmbedding,
                    }),
                    a.candidates.clone(),
                    a.is_unknown,
                )
            };
            let old_label = self.attributions[i].display.label.clone();
            let (boosted, display) = self.resolve(&original, &debug, &candidates, is_unknown);
            let entry = &mut self.attributions[i];
            entry.boosted = boosted;
            entry.hypothesis_version = self.hypothesis.version;
            if display.label != old_label {
                changed.push(i);
            }
            entry.display = display;
        }
        changed
    }
}

struct BoostOutcome {
    winner: Attribution,
    was_influenced: bool,
    reason: &'static str,
}

impl BoostOutcome {
    fn unchanged(original: &Attribution, reason: &'static str) -> Self {
        Self {
            winner: original.clone(),
            was_influenced: false,
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UnknownClustererConfig;
    use crate::types::DecisionReason;

    fn rank(label: &str, sim: f32, id: SpeakerId) -> SimilarityRank {
        SimilarityRank {
            speaker_id: id,
            label: label.to_string(),
            similarity: sim,
            enrolled: true,
        }
    }

    fn outcome(debug: ClusterDebug, speaker_id: SpeakerId, similarity: f32) -> ClusterOutcome {
        ClusterOutcome {
            speaker_id,
            similarity,
            debug,
        }
    }

    fn inference_with_hypothesis(names: &[&str]) -> ConversationInference {
        let mut inf = ConversationInference::new(
            BoostingConfig::default(),
            names.len() as u32,
            UnknownClusterer::new(UnknownClustererConfig::default()),
        );
        inf.hypothesis = Hypothesis {
            participants: names
                .iter()
                .enumerate()
                .map(|(i, n)| ParticipantHypothesis {
                    name: n.to_string(),
                    speaker_id: SpeakerId::Enrolled(i as u32),
                    confidence: 10.0,
                    segment_count: 10,
                    avg_similarity: 0.8,
                    is_unknown: false,
                    closest_enrolled: None,
                })
                .collect(),
            version: 1,
            total_segments: 10,
        };
        inf
    }

    #[test]
    fn s5_clear_winner_skips_boost() {
        let mut inf = inference_with_hypothesis(&["Alice", "Bob"]);
        let debug = ClusterDebug {
            all_similarities: vec![
                rank("Alice", 0.86, SpeakerId::Enrolled(0)),
                rank("Bob", 0.62, SpeakerId::Enrolled(1)),
            ],
            best: Some(SpeakerId::Enrolled(0)),
            runner_up: Some(SpeakerId::Enrolled(1)),
            margin: 0.24,
            reason: DecisionReason::ConfidentMatch,
        };
        let record = inf.record_segment(&outcome(debug, SpeakerId::Enrolled(0), 0.86), None, &[]);
        assert_eq!(record.display.label, "Alice");
        assert_eq!(record.display.reason, "clear_winner");
        assert!(!record.display.was_influenced);
    }

    #[test]
    fn s6_runner_up_participant_gets_boosted_past_unknown_winner() {
        let mut inf = inference_with_hypothesis(&["Alice", "Bob"]);
        let debug = ClusterDebug {
            all_similarities: vec![
                rank("Carol", 0.80, SpeakerId::Discovered(2)),
                rank("Alice", 0.76, SpeakerId::Enrolled(0)),
                rank("Bob", 0.40, SpeakerId::Enrolled(1)),
            ],
            best: Some(SpeakerId::Discovered(2)),
            runner_up: Some(SpeakerId::Enrolled(0)),
            margin: 0.04,
            reason: DecisionReason::ConfidentMatch,
        };
        let record = inf.record_segment(&outcome(debug, SpeakerId::Discovered(2), 0.80), None, &[]);
        assert_eq!(record.display.label, "Alice");
        assert_eq!(record.display.reason, "boosted_match");
        assert!(record.display.was_influenced);
        assert!(record.boosted.similarity > 0.80);
    }

    #[test]
    fn no_hypothesis_always_skips_boost() {
        let mut inf = ConversationInference::new(
            BoostingConfig::default(),
            2,
            UnknownClusterer::new(UnknownClustererConfig::default()),
        );
        let debug = ClusterDebug {
            all_similarities: vec![rank("Carol", 0.5, SpeakerId::Discovered(0))],
            best: Some(SpeakerId::Discovered(0)),
            runner_up: None,
            margin: 1.0,
            reason: DecisionReason::NewSpeaker,
        };
        let record = inf.record_segment(&outcome(debug, SpeakerId::Discovered(0), 0.5), None, &[]);
        assert_eq!(record.display.reason, "no_hypothesis");
    }

    #[test]
    fn hypothesis_rebuild_does_not_mutate_original_attribution() {
        let mut inf = ConversationInference::new(
            BoostingConfig {
                hypothesis_warmup_segments: 1,
                hypothesis_rebuild_interval: 1,
                participant_min_occurrences: 1,
                ..BoostingConfig::default()
            },
            1,
            UnknownClusterer::new(UnknownClustererConfig::default()),
        );
        let debug = ClusterDebug {
            all_similarities: vec![rank("Alice", 0.9, SpeakerId::Enrolled(0))],
            best: Some(SpeakerId::Enrolled(0)),
            runner_up: None,
            margin: 1.0,
            reason: DecisionReason::ConfidentMatch,
        };
        let record = inf.record_segment(&outcome(debug, SpeakerId::Enrolled(0), 0.9), None, &[]);
        let stored = inf.attribution(record.index).unwrap();
        assert_eq!(stored.original.label, "Alice");
        assert_eq!(stored.original.similarity, 0.9);
    }
}
