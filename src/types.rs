//! Core data model shared by every pipeline stage (spec §3).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A fixed-rate mono frame straight from the audio source.
#[derive(Debug, Clone)]
pub struct PcmFrame {
    pub sample_rate: u32,
    pub samples: Vec<f32>,
}

impl PcmFrame {
    pub fn new(sample_rate: u32, samples: Vec<f32>) -> Self {
        debug_assert!(!samples.is_empty());
        Self { sample_rate, samples }
    }
}

/// A bounded-duration speech slice emitted by the VAD chunker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub index: u64,
    pub samples: Vec<f32>,
    /// Seconds of `samples` that duplicate the tail of the previous chunk.
    /// Non-zero only when this chunk was force-split at `max_speech_duration`.
    pub overlap_duration: f32,
    pub raw_duration: f32,
    pub is_final: bool,
    pub wall_time_ms: u64,
}

impl Chunk {
    pub fn was_forced(&self) -> bool {
        self.overlap_duration > 0.0
    }
}

/// A single transcribed word, in chunk-local time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Word {
    pub text: String,
    pub t_start: f32,
    pub t_end: f32,
}

/// What a phrase's text content represents, decided before clustering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SoundCategory {
    Speech,
    HumanVoice,
    Environmental,
    Blank,
}

/// A contiguous span of speech (or an environmental marker), the unit of
/// speaker attribution, in global session time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub words: Vec<Word>,
    pub t_start: f64,
    pub t_end: f64,
    pub category: SoundCategory,
    pub embedding: Option<Vec<f32>>,
}

impl Segment {
    pub fn text(&self) -> String {
        self.words
            .iter()
            .map(|w| w.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn is_clusterable(&self) -> bool {
        matches!(self.category, SoundCategory::Speech | SoundCategory::HumanVoice)
    }
}

/// Identity assigned to a segment by the clusterer / inference engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
pub enum SpeakerId {
    /// An enrolled speaker by enrollment id index.
    Enrolled(u32),
    /// A speaker discovered online, in creation order.
    Discovered(u32),
    /// The explicit "cannot confidently attribute" sink, sub-identified by
    /// the Unknown Clusterer.
    Unknown(u32),
    /// Environmental / non-speech segments carry no speaker at all.
    None,
}

/// Why the clusterer made the decision it made, for debug/display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecisionReason {
    NewSpeaker,
    BelowMinimumThreshold,
    AmbiguousMatch,
    ConfidentMatch,
    NoConfidentMatch,
    NoEmbedding,
}

/// One entry in the full similarity ranking produced for every clustering
/// decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarityRank {
    pub speaker_id: SpeakerId,
    pub label: String,
    pub similarity: f32,
    pub enrolled: bool,
}

/// Full debug trail for a single clustering decision (spec §4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterDebug {
    pub all_similarities: Vec<SimilarityRank>,
    pub best: Option<SpeakerId>,
    pub runner_up: Option<SpeakerId>,
    pub margin: f32,
    pub reason: DecisionReason,
}

/// The attribution produced for one segment at commit time, plus whatever
/// the conversation-inference engine layers on top. `original` is never
/// mutated after creation; `boosted` and `display` may be replaced wholesale
/// during retroactive re-attribution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attribution {
    pub speaker_id: SpeakerId,
    pub label: String,
    pub similarity: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayAttribution {
    pub label: String,
    pub alternate_label: Option<String>,
    pub is_unexpected: bool,
    pub was_influenced: bool,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributedSegment {
    pub segment: Segment,
    pub cluster_debug: Option<ClusterDebug>,
    pub original: Attribution,
    pub boosted: Attribution,
    pub display: DisplayAttribution,
    pub hypothesis_version: u64,
}

/// A named prior provided before the session; centroids are frozen.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Enrollment {
    pub id: String,
    pub name: String,
    /// model_id -> L2-unit centroid
    pub centroids: HashMap<String, Vec<f32>>,
    pub color_index: u32,
}

impl Enrollment {
    pub fn centroid_for(&self, model_id: &str) -> Option<&[f32]> {
        self.centroids.get(model_id).map(|v| v.as_slice())
    }
}

/// Runtime clusterer state for one speaker (enrolled or discovered).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Speaker {
    pub id: SpeakerId,
    pub name: Option<String>,
    pub centroid: Vec<f32>,
    pub sample_count: u64,
    pub enrolled: bool,
    pub enrollment_id: Option<String>,
}

/// One candidate participant in the conversation hypothesis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantHypothesis {
    pub name: String,
    pub speaker_id: SpeakerId,
    pub confidence: f32,
    pub segment_count: u64,
    pub avg_similarity: f32,
    pub is_unknown: bool,
    pub closest_enrolled: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HypothesisHistoryEntry {
    pub version: u64,
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

/// The current best guess of who is participating in the conversation.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Hypothesis {
    pub participants: Vec<ParticipantHypothesis>,
    pub version: u64,
    pub total_segments: u64,
}

impl Hypothesis {
    pub fn names(&self) -> Vec<&str> {
        self.participants.iter().map(|p| p.name.as_str()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.participants.iter().any(|p| p.name == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Live,
    Unprocessed,
    Processing,
    Processed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnrollmentSource {
    Snapshot,
    Current,
}

/// An immutable (once processed) settings snapshot together with its
/// resulting segments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub recording_id: String,
    pub status: JobStatus,
    pub settings: crate::config::SessionConfig,
    pub segments: Vec<AttributedSegment>,
    pub participants: Vec<ParticipantHypothesis>,
}
