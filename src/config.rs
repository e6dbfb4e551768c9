//! Every component's tunables, mirroring the grounding repo's per-module
//! `*Config` structs with `Default` impls carrying the documented defaults.

use serde::{Deserialize, Serialize};

use crate::types::EnrollmentSource;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkerConfig {
    pub sample_rate: u32,
    pub min_speech_duration_s: f32,
    pub max_speech_duration_s: f32,
    pub overlap_duration_s: f32,
    pub pre_speech_pad_ms: u64,
    pub redemption_ms: u64,
    pub positive_speech_threshold: f32,
    pub negative_speech_threshold: f32,
    pub frame_duration_ms: u64,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            min_speech_duration_s: 1.0,
            max_speech_duration_s: 15.0,
            overlap_duration_s: 1.5,
            pre_speech_pad_ms: 250,
            redemption_ms: 300,
            positive_speech_threshold: 0.5,
            negative_speech_threshold: 0.35,
            frame_duration_ms: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssemblerConfig {
    pub gap_threshold_s: f32,
    pub min_phrase_duration_s: f32,
    pub confidence_floor: f32,
    pub merge_gap_threshold_s: f32,
    pub boundary_pad_s: f32,
    pub use_acoustic_segmenter: bool,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            gap_threshold_s: 0.7,
            min_phrase_duration_s: 0.5,
            confidence_floor: 0.5,
            merge_gap_threshold_s: 0.3,
            boundary_pad_s: 0.05,
            use_acoustic_segmenter: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusteringThresholds {
    pub num_speakers: u32,
    pub similarity_threshold: f32,
    pub minimum_similarity_threshold: f32,
    pub confidence_margin: f32,
    pub inter_enrollment_warning_threshold: f32,
    pub outlier_rejection_multiple: f32,
}

impl Default for ClusteringThresholds {
    fn default() -> Self {
        Self {
            num_speakers: 8,
            similarity_threshold: 0.75,
            minimum_similarity_threshold: 0.45,
            confidence_margin: 0.15,
            inter_enrollment_warning_threshold: 0.85,
            outlier_rejection_multiple: 2.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnknownClustererConfig {
    pub similarity_threshold: f32,
    pub minimum_similarity_threshold: f32,
    pub confidence_margin: f32,
    pub min_segments_for_eligibility: u32,
    pub min_mean_confidence: f32,
}

impl Default for UnknownClustererConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.65,
            minimum_similarity_threshold: 0.3,
            confidence_margin: 0.10,
            min_segments_for_eligibility: 3,
            min_mean_confidence: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoostingConfig {
    pub skip_boost_if_confident: f32,
    pub ambiguity_margin_threshold: f32,
    pub min_similarity_for_boosting: f32,
    pub min_similarity_after_boost: f32,
    pub boost_eligibility_rank: usize,
    pub boost_factor: f32,
    pub unknown_boost_factor: f32,
    pub participant_min_occurrences: u32,
    pub hypothesis_warmup_segments: u64,
    pub hypothesis_rebuild_interval: u64,
    pub display_alternate_margin: f32,
    pub enrolled_score_bonus: f32,
    /// Resolves the open question of what happens when the original winner
    /// is an unknown participant already present in the hypothesis but the
    /// runner-up is enrolled. See SPEC_FULL.md §9 / DESIGN.md.
    pub prefer_enrolled_over_unknown_winner: bool,
}

impl Default for BoostingConfig {
    fn default() -> Self {
        Self {
            skip_boost_if_confident: 0.92,
            ambiguity_margin_threshold: 0.20,
            min_similarity_for_boosting: 0.35,
            min_similarity_after_boost: 0.40,
            boost_eligibility_rank: 2,
            boost_factor: 1.10,
            unknown_boost_factor: 1.05,
            participant_min_occurrences: 2,
            hypothesis_warmup_segments: 5,
            hypothesis_rebuild_interval: 10,
            display_alternate_margin: 0.05,
            enrolled_score_bonus: 0.02,
            prefer_enrolled_over_unknown_winner: false,
        }
    }
}

/// Recognized session configuration options (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub expected_speakers: u32,
    pub embedding_model_id: String,
    pub segmenter_id: String,
    pub chunker: ChunkerConfig,
    pub assembler: AssemblerConfig,
    pub clustering: ClusteringThresholds,
    pub unknown_clustering: UnknownClustererConfig,
    pub boosting: BoostingConfig,
    pub enrollment_source: EnrollmentSource,
    /// Soft queue-depth indicator surfaced via `chunk_queue_update`; the
    /// queue never drops chunks once this is exceeded, it just reports depth.
    pub queue_soft_limit: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            expected_speakers: 2,
            embedding_model_id: "default".to_string(),
            segmenter_id: "text-gap".to_string(),
            chunker: ChunkerConfig::default(),
            assembler: AssemblerConfig::default(),
            clustering: ClusteringThresholds::default(),
            unknown_clustering: UnknownClustererConfig::default(),
            boosting: BoostingConfig::default(),
            enrollment_source: EnrollmentSource::Snapshot,
            queue_soft_limit: 5,
        }
    }
}
