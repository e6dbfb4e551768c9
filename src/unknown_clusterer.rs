//! Unknown Clusterer (spec §4.5): sub-clusters embeddings the Speaker
//! Clusterer sent to `Unknown` into distinct anonymous identities, using
//! the same centroid-with-threshold mechanism with its own, typically
//! looser, thresholds.

use crate::clusterer::{cosine_similarity, normalized};
use crate::config::UnknownClustererConfig;
use crate::types::{Speaker, SpeakerId};

pub struct UnknownIdentity {
    pub id: SpeakerId,
    pub centroid: Vec<f32>,
    pub sample_count: u64,
    pub similarities: Vec<f32>,
    pub closest_enrolled: Option<(String, f32)>,
}

impl UnknownIdentity {
    pub fn mean_confidence(&self) -> f32 {
        if self.similarities.is_empty() {
            0.0
        } else {
            self.similarities.iter().sum::<f32>() / self.similarities.len() as f32
        }
    }

    pub fn label(&self) -> String {
        match self.id {
            SpeakerId::Unknown(i) => format!("Unknown {}", i + 1),
            _ => "Unknown".to_string(),
        }
    }

    pub fn display_label(&self) -> String {
        match &self.closest_enrolled {
            Some((name, sim)) => format!("{} — closest: {}, {:.2}", self.label(), name, sim),
            None => self.label(),
        }
    }

    pub fn is_eligible(&self, config: &UnknownClustererConfig) -> bool {
        self.sample_count >= config.min_segments_for_eligibility as u64
            && self.mean_confidence() >= config.min_mean_confidence
    }
}

pub struct UnknownClusterer {
    config: UnknownClustererConfig,
    identities: Vec<UnknownIdentity>,
    next_index: u32,
}

impl UnknownClusterer {
    pub fn new(config: UnknownClustererConfig) -> Self {
        Self {
            config,
            identities: Vec::new(),
            next_index: 0,
        }
    }

    pub fn identities(&self) -> &[UnknownIdentity] {
        &self.identities
    }

    pub fn eligible_identities(&self) -> impl Iterator<Item = &UnknownIdentity> {
        self.identities.iter().filter(|i| i.is_eligible(&self.config))
    }

    /// Assigns an embedding that the speaker clusterer sent to Unknown into
    /// one of this clusterer's own anonymous identities, tracking the
    /// closest enrolled speaker (if any) for display purposes.
    pub fn assign(
        &mut self,
        embedding: &[f32],
        enrolled_speakers: &[Speaker],
    ) -> SpeakerId {
        let e = normalized(embedding);

        let closest_enrolled = enrolled_speakers
            .iter()
            .filter(|s| s.enrolled)
            .map(|s| (s.name.clone().unwrap_or_default(), cosine_similarity(&e, &s.centroid)))
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap());

        if self.identities.is_empty() {
            return self.create_identity(e, closest_enrolled);
        }

        let mut best_idx = 0usize;
        let mut best_sim = f32::MIN;
        let mut runner_up_sim = f32::MIN;
        for (i, identity) in self.identities.iter().enumerate() {
            let sim = cosine_similarity(&e, &identity.centroid);
            if sim > best_sim {
                runner_up_sim = best_sim;
                best_sim = sim;
                best_idx = i;
            } else if sim > runner_up_sim {
                runner_up_sim = sim;
            }
        }
        let margin = best_sim - runner_up_sim.max(f32::MIN / 2.0);

        if best_sim < self.config.minimum_similarity_threshold {
            return self.create_identity(e, closest_enrolled);
        }

        if best_sim >= self.config.similarity_threshold
            && (self.identities.len() < 2 || margin >= self.config.confidence_margin)
        {
            let identity = &mut self.identities[best_idx];
            let n = identity.sample_count as f32;
            let mut new_centroid: Vec<f32> = identity
                .centroid
                .iter()
                .zip(e.iter())
                .map(|(c, e)| (c * n + e) / (n + 1.0))
                .collect();
            let norm = (new_centroid.iter().map(|x| x * x).sum::<f32>()).sqrt();
            if norm > 1e-12 {
                for x in new_centroid.iter_mut() {
                    *x /= norm;
                }
            }
            identity.centroid = new_centroid;
            identity.sample_count += 1;
            identity.similarities.push(best_sim);
            if let Some(ce) = closest_enrolled {
                identity.closest_enrolled = Some(ce);
            }
            return identity.id;
        }

        self.create_identity(e, closest_enrolled)
    }

    fn create_identity(&mut self, centroid: Vec<f32>, closest_enrolled: Option<(String, f32)>) -> SpeakerId {
        let id = SpeakerId::Unknown(self.next_index);
        self.next_index += 1;
        self.identities.push(UnknownIdentity {
            id,
            centroid,
            sample_count: 1,
            similarities: vec![1.0],
            closest_enrolled,
        });
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(dim: usize, index: usize) -> Vec<f32> {
        let mut v = vec![0.0f32; dim];
        v[index] = 1.0;
        v
    }

    #[test]
    fn distinct_embeddings_become_distinct_unknowns() {
        let mut clusterer = UnknownClusterer::new(UnknownClustererConfig::default());
        let a = clusterer.assign(&unit(4, 0), &[]);
        let b = clusterer.assign(&unit(4, 1), &[]);
        assert_ne!(a, b);
    }

    #[test]
    fn repeated_embedding_reuses_identity() {
        let mut clusterer = UnknownClusterer::new(UnknownClustererConfig::default());
        let a = clusterer.assign(&unit(4, 0), &[]);
        let a2 = clusterer.assign(&unit(4, 0), &[]);
        assert_eq!(a, a2);
    }

    #[test]
    fn eligibility_requires_minimum_samples_and_confidence() {
        let config = UnknownClustererConfig {
            min_segments_for_eligibility: 2,
            min_mean_confidence: 0.5,
            ..UnknownClustererConfig::default()
        };
        let mut clusterer = UnknownClusterer::new(config);
        clusterer.assign(&unit(4, 0), &[]);
        assert_eq!(clusterer.eligible_identities().count(), 0);
        clusterer.assign(&unit(4, 0), &[]);
        assert_eq!(clusterer.eligible_identities().count(), 1);
    }
}
