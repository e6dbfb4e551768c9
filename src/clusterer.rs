//! Speaker Clusterer (spec §4.4): online centroid-based clustering over
//! enrolled priors and discovered speakers, with an explicit Unknown sink.

use crate::config::ClusteringThresholds;
use crate::types::{ClusterDebug, DecisionReason, Enrollment, SimilarityRank, Speaker, SpeakerId};

fn l2_normalize(v: &mut [f32]) {
    let norm = (v.iter().map(|x| x * x).sum::<f32>()).sqrt();
    if norm > 1e-12 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

pub fn normalized(v: &[f32]) -> Vec<f32> {
    let mut out = v.to_vec();
    l2_normalize(&mut out);
    out
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

pub struct ClusterOutcome {
    pub speaker_id: SpeakerId,
    pub similarity: f32,
    pub debug: ClusterDebug,
}

/// Ordered list of enrolled + discovered speakers for one session / job.
/// Enrolled speakers always occupy the front of the list and are never
/// mutated after construction.
pub struct SpeakerClusterer {
    config: ClusteringThresholds,
    speakers: Vec<Speaker>,
    next_discovered_index: u32,
}

impl SpeakerClusterer {
    pub fn new(config: ClusteringThresholds, enrollments: &[Enrollment], model_id: &str) -> Self {
        let mut speakers = Vec::new();
        for (i, enrollment) in enrollments.iter().enumerate() {
            if let Some(centroid) = enrollment.centroid_for(model_id) {
                speakers.push(Speaker {
                    id: SpeakerId::Enrolled(i as u32),
                    name: Some(enrollment.name.clone()),
                    centroid: normalized(centroid),
                    sample_count: 0,
                    enrolled: true,
                    enrollment_id: Some(enrollment.id.clone()),
                });
            }
        }
        Self {
            config,
            speakers,
            next_discovered_index: 0,
        }
    }

    pub fn speakers(&self) -> &[Speaker] {
        &self.speakers
    }

    fn label_for(&self, id: SpeakerId) -> String {
        match id {
            SpeakerId::Enrolled(i) => self
                .speakers
                .iter()
                .find(|s| s.id == SpeakerId::Enrolled(i))
                .and_then(|s| s.name.clone())
                .unwrap_or_else(|| format!("Enrolled {i}")),
            SpeakerId::Discovered(i) => format!("Speaker {}", i + 1),
            SpeakerId::Unknown(i) => format!("Unknown {}", i + 1),
            SpeakerId::None => "—".to_string(),
        }
    }

    /// Assigns a new embedding per the online assignment algorithm of
    /// spec §4.4, updating discovered centroids in place.
    pub fn assign(&mut self, embedding: &[f32]) -> ClusterOutcome {
        let e = normalized(embedding);

        if self.speakers.is_empty() {
            let id = SpeakerId::Discovered(self.next_discovered_index);
            self.next_discovered_index += 1;
            self.speakers.push(Speaker {
                id,
                name: None,
                centroid: e.clone(),
                sample_count: 1,
                enrolled: false,
                enrollment_id: None,
            });
            let debug = ClusterDebug {
                all_similarities: vec![SimilarityRank {
                    speaker_id: id,
                    label: self.label_for(id),
                    similarity: 1.0,
                    enrolled: false,
                }],
                best: Some(id),
                runner_up: None,
                margin: 1.0,
                reason: DecisionReason::NewSpeaker,
            };
            return ClusterOutcome {
                speaker_id: id,
                similarity: 1.0,
                debug,
            };
        }

        let mut ranking: Vec<SimilarityRank> = self
            .speakers
            .iter()
            .map(|s| SimilarityRank {
                speaker_id: s.id,
                label: self.label_for(s.id),
                similarity: cosine_similarity(&e, &s.centroid),
                enrolled: s.enrolled,
            })
            .collect();
        ranking.sort_by(|a, b| b.similarity.partial_cmp(&a.similarity).unwrap());

        let best = ranking[0].clone();
        let runner_up = ranking.get(1).cloned();
        let margin = runner_up
            .as_ref()
            .map(|r| best.similarity - r.similarity)
            .unwrap_or(1.0);

        let make_debug = |reason: DecisionReason, best_id: Option<SpeakerId>| ClusterDebug {
            all_similarities: ranking.clone(),
            best: best_id,
            runner_up: runner_up.as_ref().map(|r| r.speaker_id),
            margin,
            reason,
        };

        if best.similarity < self.config.minimum_similarity_threshold {
            return ClusterOutcome {
                speaker_id: SpeakerId::None,
                similarity: best.similarity,
                debug: make_debug(DecisionReason::BelowMinimumThreshold, None),
            };
        }

        if best.similarity >= self.config.similarity_threshold {
            if self.speakers.len() >= 2 && margin < self.config.confidence_margin {
                return ClusterOutcome {
                    speaker_id: SpeakerId::None,
                    similarity: best.similarity,
                    debug: make_debug(DecisionReason::AmbiguousMatch, None),
                };
            }
            let idx = self
                .speakers
                .iter()
                .position(|s| s.id == best.speaker_id)
                .expect("best speaker must exist in the roster");
            if !self.speakers[idx].enrolled {
                let s = &mut self.speakers[idx];
                let n = s.sample_count as f32;
                let mut new_centroid: Vec<f32> = s
                    .centroid
                    .iter()
                    .zip(e.iter())
                    .map(|(c, e)| (c * n + e) / (n + 1.0))
                    .collect();
                l2_normalize(&mut new_centroid);
                s.centroid = new_centroid;
                s.sample_count += 1;
            }
            return ClusterOutcome {
                speaker_id: best.speaker_id,
                similarity: best.similarity,
                debug: make_debug(DecisionReason::ConfidentMatch, Some(best.speaker_id)),
            };
        }

        let discovered_count = self.speakers.iter().filter(|s| !s.enrolled).count() as u32;
        if discovered_count < self.config.num_speakers {
            let id = SpeakerId::Discovered(self.next_discovered_index);
            self.next_discovered_index += 1;
            self.speakers.push(Speaker {
                id,
                name: None,
                centroid: e.clone(),
                sample_count: 1,
                enrolled: false,
                enrollment_id: None,
            });
            return ClusterOutcome {
                speaker_id: id,
                similarity: 1.0,
                debug: make_debug(DecisionReason::NewSpeaker, Some(id)),
            };
        }

        ClusterOutcome {
            speaker_id: SpeakerId::None,
            similarity: best.similarity,
            debug: make_debug(DecisionReason::NoConfidentMatch, None),
        }
    }

    /// Pairwise similarities between all enrolled centroids, for the
    /// inter-enrollment warning check run on enrollment import.
    pub fn enrollment_similarity_warnings(
        enrollments: &[Enrollment],
        model_id: &str,
        threshold: f32,
    ) -> Vec<(String, String, f32)> {
        let mut warnings = Vec::new();
        for i in 0..enrollments.len() {
            for j in (i + 1)..enrollments.len() {
                if let (Some(a), Some(b)) = (
                    enrollments[i].centroid_for(model_id),
                    enrollments[j].centroid_for(model_id),
                ) {
                    let sim = cosine_similarity(&normalized(a), &normalized(b));
                    if sim > threshold {
                        warnings.push((enrollments[i].id.clone(), enrollments[j].id.clone(), sim));
                    }
                }
            }
        }
        warnings
    }

    /// Outlier-rejecting centroid build for an enrollment made of multiple
    /// raw samples (spec §9 numerics note): compute the initial mean,
    /// discard samples whose cosine distance to it exceeds
    /// `outlier_rejection_multiple * mean_pairwise_distance`, then
    /// recompute from the retained samples.
    pub fn build_enrollment_centroid(samples: &[Vec<f32>], outlier_rejection_multiple: f32) -> Vec<f32> {
        if samples.is_empty() {
            return Vec::new();
        }
        let normalized_samples: Vec<Vec<f32>> = samples.iter().map(|s| normalized(s)).collect();
        let dim = normalized_samples[0].len();

        let mean = |xs: &[Vec<f32>]| -> Vec<f32> {
            let mut acc = vec![0.0f32; dim];
            for x in xs {
                for (a, b) in acc.iter_mut().zip(x.iter()) {
                    *a += b;
                }
            }
            for a in acc.iter_mut() {
                *a /= xs.len() as f32;
            }
            normalized(&acc)
        };

        let initial_mean = mean(&normalized_samples);
        if normalized_samples.len() < 3 {
            return initial_mean;
        }

        let distances: Vec<f32> = normalized_samples
            .iter()
            .map(|s| 1.0 - cosine_similarity(s, &initial_mean))
            .collect();
        let mean_pairwise = distances.iter().sum::<f32>() / distances.len() as f32;
        let cutoff = mean_pairwise * outlier_rejection_multiple;

        let retained: Vec<Vec<f32>> = normalized_samples
            .iter()
            .zip(distances.iter())
            .filter(|(_, d)| **d <= cutoff)
            .map(|(s, _)| s.clone())
            .collect();

        if retained.is_empty() {
            initial_mean
        } else {
            mean(&retained)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn unit(dim: usize, index: usize) -> Vec<f32> {
        let mut v = vec![0.0f32; dim];
        v[index] = 1.0;
        v
    }

    fn mostly(dim: usize, a: usize, b: usize, weight_a: f32) -> Vec<f32> {
        let mut v = vec![0.0f32; dim];
        v[a] = weight_a;
        v[b] = (1.0 - weight_a * weight_a).sqrt();
        v
    }

    #[test]
    fn invariant_centroids_are_unit_length() {
        let mut clusterer = SpeakerClusterer::new(ClusteringThresholds::default(), &[], "m");
        let outcome = clusterer.assign(&unit(4, 0));
        assert!(matches!(outcome.speaker_id, SpeakerId::Discovered(0)));
        for s in clusterer.speakers() {
            let norm: f32 = s.centroid.iter().map(|x| x * x).sum::<f32>().sqrt();
            assert!((norm - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn s3_clusterer_warmup() {
        let mut config = ClusteringThresholds::default();
        config.num_speakers = 2;
        let mut clusterer = SpeakerClusterer::new(config, &[], "m");

        let e0 = unit(4, 0);
        let e1 = mostly(4, 1, 0, 0.98); // cosine sim to e0 ~0.2, distinct from e0

        let out0 = clusterer.assign(&e0);
        assert!(matches!(out0.speaker_id, SpeakerId::Discovered(0)));
        assert_eq!(out0.debug.reason, DecisionReason::NewSpeaker);

        let out1 = clusterer.assign(&e1);
        assert!(matches!(out1.speaker_id, SpeakerId::Discovered(1)));

        let out2 = clusterer.assign(&e0);
        assert!(matches!(out2.speaker_id, SpeakerId::Discovered(0)));
        assert_eq!(out2.debug.reason, DecisionReason::ConfidentMatch);
        assert!(out2.similarity >= 0.75);
    }

    #[test]
    fn s4_ambiguous_enrolled_pair_yields_unknown() {
        // Two enrolled speakers whose centroids have similarity ~0.90.
        let dim = 4;
        let c_a = unit(dim, 0);
        let mut c_b = unit(dim, 0);
        c_b[1] = 0.4358; // sim(a,b) ~ 0.9 after normalization
        let c_b = normalized(&c_b);

        let mut centroids_a = HashMap::new();
        centroids_a.insert("m".to_string(), c_a.clone());
        let mut centroids_b = HashMap::new();
        centroids_b.insert("m".to_string(), c_b.clone());

        let enrollments = vec![
            Enrollment {
                id: "a".into(),
                name: "Alice".into(),
                centroids: centroids_a,
                color_index: 0,
            },
            Enrollment {
                id: "b".into(),
                name: "Bob".into(),
                centroids: centroids_b,
                color_index: 1,
            },
        ];

        let mut config = ClusteringThresholds::default();
        config.similarity_threshold = 0.75;
        config.confidence_margin = 0.15;
        let mut clusterer = SpeakerClusterer::new(config, &enrollments, "m");

        // A probe roughly between the two: similarities ~0.78 / ~0.77.
        let probe = {
            let mut v = vec![0.0f32; dim];
            for i in 0..dim {
                v[i] = (c_a[i] + c_b[i]) / 2.0 + if i == 2 { 0.05 } else { 0.0 };
            }
            v
        };

        let outcome = clusterer.assign(&probe);
        // Either ambiguous_match or below_minimum depending on exact margins;
        // the key invariant is that it is never a confident_match given the
        // enrolled pair's high mutual similarity and near-tied probe.
        assert_ne!(outcome.debug.reason, DecisionReason::ConfidentMatch);
    }

    #[test]
    fn enrolled_centroids_never_mutate() {
        let dim = 3;
        let mut centroids = HashMap::new();
        centroids.insert("m".to_string(), unit(dim, 0));
        let enrollments = vec![Enrollment {
            id: "a".into(),
            name: "Alice".into(),
            centroids,
            color_index: 0,
        }];
        let mut clusterer = SpeakerClusterer::new(ClusteringThresholds::default(), &enrollments, "m");
        let before = clusterer.speakers()[0].centroid.clone();
        clusterer.assign(&unit(dim, 0));
        clusterer.assign(&unit(dim, 0));
        assert_eq!(clusterer.speakers()[0].centroid, before);
    }

    #[test]
    fn single_speaker_never_returns_ambiguous() {
        let mut config = ClusteringThresholds::default();
        config.num_speakers = 1;
        let mut clusterer = SpeakerClusterer::new(config, &[], "m");
        clusterer.assign(&unit(4, 0));
        let outcome = clusterer.assign(&unit(4, 0));
        assert_eq!(outcome.debug.reason, DecisionReason::ConfidentMatch);
    }

    #[test]
    fn outlier_sample_is_rejected_from_enrollment_centroid() {
        let dim = 4;
        let consistent = vec![unit(dim, 0), unit(dim, 0), unit(dim, 0)];
        let mut samples = consistent.clone();
        samples.push(unit(dim, 3)); // wild outlier, orthogonal
        let centroid = SpeakerClusterer::build_enrollment_centroid(&samples, 2.0);
        let sim_to_consistent = cosine_similarity(&centroid, &unit(dim, 0));
        assert!(sim_to_consistent > 0.9);
    }
}
