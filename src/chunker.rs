//! VAD Chunker (spec §4.1): turns a frame stream into bounded-duration
//! speech `Chunk`s, emitting a controlled overlap only when a chunk was
//! force-split at the maximum duration. State-machine shape (pre-speech pad
//! ring buffer, redemption hold, forced-split tail carry) is adapted from
//! the streaming VAD processor and intelligent chunker this crate descends
//! from; the difference is that speech probability comes from an external
//! `VoiceActivityDetector` capability rather than an in-process energy
//! model.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::capability::VoiceActivityDetector;
use crate::config::ChunkerConfig;
use crate::error::ChunkerError;
use crate::types::Chunk;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VadState {
    Idle,
    InSpeech,
}

#[derive(Debug, Clone)]
pub enum ChunkerEvent {
    SpeechStart,
    SpeechProgress { duration_s: f32, probability: f32 },
    AudioLevel { rms: f32 },
    SpeechEnd { chunk: Chunk },
    Error { message: String },
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
}

/// Drives a sequence of fixed-size frames through the VAD state machine and
/// produces chunk events. One instance per session.
pub struct VadChunker {
    config: ChunkerConfig,
    vad: Arc<dyn VoiceActivityDetector>,
    state: VadState,
    next_index: u64,
    pre_speech_ring: VecDeque<f32>,
    pre_speech_ring_cap: usize,
    speech_buffer: Vec<f32>,
    redemption_accum_ms: u64,
    forced_tail: Vec<f32>,
    carried_overlap_duration: f32,
}

impl VadChunker {
    pub fn new(config: ChunkerConfig, vad: Arc<dyn VoiceActivityDetector>) -> Self {
        let frame_samples =
            (config.sample_rate as u64 * config.frame_duration_ms / 1000) as usize;
        let pre_pad_frames =
            ((config.pre_speech_pad_ms as f32 / config.frame_duration_ms as f32).ceil() as usize)
                .max(1);
        Self {
            pre_speech_ring_cap: pre_pad_frames * frame_samples.max(1),
            config,
            vad,
            state: VadState::Idle,
            next_index: 0,
            pre_speech_ring: VecDeque::new(),
            speech_buffer: Vec::new(),
            redemption_accum_ms: 0,
            forced_tail: Vec::new(),
            carried_overlap_duration: 0.0,
        }
    }

    fn sample_rate(&self) -> f32 {
        self.config.sample_rate as f32
    }

    fn duration_of(&self, samples: &[f32]) -> f32 {
        samples.len() as f32 / self.sample_rate()
    }

    fn push_pre_speech(&mut self, frame: &[f32]) {
        self.pre_speech_ring.extend(frame.iter().copied());
        while self.pre_speech_ring.len() > self.pre_speech_ring_cap {
            self.pre_speech_ring.pop_front();
        }
    }

    /// Feed one fixed-size frame through the state machine. Returns zero or
    /// more events (ordinarily one `SpeechProgress`/`AudioLevel`, plus a
    /// `SpeechStart`/`SpeechEnd` on transitions).
    pub async fn process_frame(&mut self, frame: &[f32]) -> Result<Vec<ChunkerEvent>, ChunkerError> {
        let mut events = Vec::new();
        events.push(ChunkerEvent::AudioLevel { rms: rms(frame) });

        let probability = self
            .vad
            .speech_probability(frame)
            .await
            .map_err(|e| ChunkerError::VadInitFailure {
                reason: e.to_string(),
            })?;

        let frame_ms = self.config.frame_duration_ms;

        match self.state {
            VadState::Idle => {
                if probability >= self.config.positive_speech_threshold {
                    self.state = VadState::InSpeech;
                    self.redemption_accum_ms = 0;
                    self.speech_buffer.clear();
                    if !self.forced_tail.is_empty() {
                        self.speech_buffer.extend(self.forced_tail.drain(..));
                    } else {
                        self.speech_buffer.extend(self.pre_speech_ring.iter().copied());
                    }
                    self.speech_buffer.extend_from_slice(frame);
                    events.push(ChunkerEvent::SpeechStart);
                } else {
                    self.push_pre_speech(frame);
                }
            }
            VadState::InSpeech => {
                self.speech_buffer.extend_from_slice(frame);
                let duration = self.duration_of(&self.speech_buffer);
                events.push(ChunkerEvent::SpeechProgress {
                    duration_s: duration,
                    probability,
                });

                if duration >= self.config.max_speech_duration_s {
                    // Forced split: emit now, carry the trailing overlap
                    // into the next chunk.
                    let overlap_samples =
                        (self.config.overlap_duration_s * self.sample_rate()) as usize;
                    let overlap_samples = overlap_samples.min(self.speech_buffer.len());
                    let tail_start = self.speech_buffer.len() - overlap_samples;
                    self.forced_tail = self.speech_buffer[tail_start..].to_vec();

                    let chunk = self.emit_chunk(self.carried_overlap_duration, false);
                    self.carried_overlap_duration = self.config.overlap_duration_s;
                    self.speech_buffer.clear();
                    self.speech_buffer.extend(self.forced_tail.drain(..));
                    self.redemption_accum_ms = 0;
                    events.push(ChunkerEvent::SpeechEnd { chunk });
                } else if probability < self.config.negative_speech_threshold {
                    self.redemption_accum_ms += frame_ms;
                    if self.redemption_accum_ms >= self.config.redemption_ms {
                        if duration < self.config.min_speech_duration_s {
                            // Misfire: discard silently.
                        } else {
                            let chunk = self.emit_chunk(self.carried_overlap_duration, false);
                            events.push(ChunkerEvent::SpeechEnd { chunk });
                        }
                        self.state = VadState::Idle;
                        self.speech_buffer.clear();
                        self.redemption_accum_ms = 0;
                        self.carried_overlap_duration = 0.0;
                        self.forced_tail.clear();
                        self.pre_speech_ring.clear();
                    }
                } else {
                    self.redemption_accum_ms = 0;
                }
            }
        }

        Ok(events)
    }

    fn emit_chunk(&mut self, overlap_duration: f32, is_final: bool) -> Chunk {
        let index = self.next_index;
        self.next_index += 1;
        let raw_duration = self.duration_of(&self.speech_buffer);
        Chunk {
            index,
            samples: self.speech_buffer.clone(),
            overlap_duration,
            raw_duration,
            is_final,
            wall_time_ms: now_ms(),
        }
    }

    /// Flushes any in-flight speech as a final chunk.
    pub fn stop(&mut self) -> Option<Chunk> {
        if self.state == VadState::InSpeech && !self.speech_buffer.is_empty() {
            let duration = self.duration_of(&self.speech_buffer);
            if duration < self.config.min_speech_duration_s {
                self.state = VadState::Idle;
                self.speech_buffer.clear();
                return None;
            }
            let chunk = self.emit_chunk(self.carried_overlap_duration, true);
            self.state = VadState::Idle;
            self.speech_buffer.clear();
            self.carried_overlap_duration = 0.0;
            Some(chunk)
        } else {
            None
        }
    }

    pub fn reset(&mut self) {
        self.state = VadState::Idle;
        self.next_index = 0;
        self.pre_speech_ring.clear();
        self.speech_buffer.clear();
        self.redemption_accum_ms = 0;
        self.forced_tail.clear();
        self.carried_overlap_duration = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Deterministic VAD stub: speech for frames [speech_start, speech_end).
    struct ScriptedVad {
        probs: Vec<f32>,
        cursor: AtomicUsize,
    }

    #[async_trait]
    impl VoiceActivityDetector for ScriptedVad {
        async fn speech_probability(
            &self,
            _frame: &[f32],
        ) -> Result<f32, crate::error::CapabilityError> {
            let i = self.cursor.fetch_add(1, Ordering::SeqCst);
            Ok(*self.probs.get(i).unwrap_or(&0.0))
        }
    }

    fn frame(sample_rate: u32, ms: u64) -> Vec<f32> {
        vec![0.1; (sample_rate as u64 * ms / 1000) as usize]
    }

    #[tokio::test]
    async fn forced_split_carries_overlap() {
        // 30ms frames @ 16kHz = 480 samples/frame. max_speech=2.0s => ~67 frames.
        let mut config = ChunkerConfig::default();
        config.max_speech_duration_s = 2.0;
        config.overlap_duration_s = 0.5;
        config.min_speech_duration_s = 0.1;

        let frame_count = 150; // > 3s of continuous speech at 30ms/frame (~4.5s)
        let probs = vec![0.9; frame_count];
        let vad = Arc::new(ScriptedVad {
            probs,
            cursor: AtomicUsize::new(0),
        });
        let mut chunker = VadChunker::new(config.clone(), vad);

        let mut chunks = Vec::new();
        for _ in 0..frame_count {
            let f = frame(config.sample_rate, config.frame_duration_ms);
            for ev in chunker.process_frame(&f).await.unwrap() {
                if let ChunkerEvent::SpeechEnd { chunk } = ev {
                    chunks.push(chunk);
                }
            }
        }

        assert!(chunks.len() >= 2);
        assert_eq!(chunks[0].overlap_duration, 0.0);
        assert!((chunks[0].raw_duration - 2.0).abs() < 0.1);
        assert_eq!(chunks[1].overlap_duration, config.overlap_duration_s);

        let overlap_samples =
            (config.overlap_duration_s * config.sample_rate as f32) as usize;
        let tail_of_first = &chunks[0].samples[chunks[0].samples.len() - overlap_samples..];
        let head_of_second = &chunks[1].samples[..overlap_samples];
        assert_eq!(
            tail_of_first, head_of_second,
            "forced split must duplicate the trailing overlap into the next chunk's audio"
        );
    }

    #[tokio::test]
    async fn short_misfire_discarded() {
        let mut config = ChunkerConfig::default();
        config.min_speech_duration_s = 1.0;
        config.redemption_ms = 30;
        // A few speech frames then silence -- too short to be a real chunk.
        let probs = vec![0.9, 0.9, 0.0, 0.0];
        let vad = Arc::new(ScriptedVad {
            probs,
            cursor: AtomicUsize::new(0),
        });
        let mut chunker = VadChunker::new(config.clone(), vad);
        let mut saw_chunk = false;
        for _ in 0..4 {
            let f = frame(config.sample_rate, config.frame_duration_ms);
            for ev in chunker.process_frame(&f).await.unwrap() {
                if matches!(ev, ChunkerEvent::SpeechEnd { .. }) {
                    saw_chunk = true;
                }
            }
        }
        assert!(!saw_chunk);
    }
}
