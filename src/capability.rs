//! External capability providers (spec §6). The core never implements ASR,
//! embedding extraction, acoustic segmentation, or VAD itself; it calls
//! through these traits, each an async suspension point on the processor
//! task.

use async_trait::async_trait;

use crate::error::CapabilityError;
use crate::types::Word;

/// 16 kHz mono PCM, as produced by the VAD chunker for a single chunk or
/// segment span.
pub type Pcm16k<'a> = &'a [f32];

#[derive(Debug, Clone)]
pub struct Transcription {
    pub words: Vec<Word>,
    pub raw_text: String,
    pub audio_duration_s: f32,
}

#[async_trait]
pub trait AsrProvider: Send + Sync {
    async fn transcribe(
        &self,
        audio: Pcm16k<'_>,
        language: Option<&str>,
    ) -> Result<Transcription, CapabilityError>;
}

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns an L2-normalized embedding vector.
    async fn extract_embedding(
        &self,
        audio: Pcm16k<'_>,
        model_id: &str,
    ) -> Result<Vec<f32>, CapabilityError>;

    /// Batch form; default implementation just calls `extract_embedding` in
    /// sequence, reporting progress after each item via `on_progress(done,
    /// total)`. Providers backed by a batched model should override this.
    async fn batch_extract(
        &self,
        segments: &[(u64, Vec<f32>)],
        model_id: &str,
        on_progress: &mut (dyn FnMut(usize, usize) + Send),
    ) -> Vec<(u64, Result<Vec<f32>, CapabilityError>)> {
        let total = segments.len();
        let mut out = Vec::with_capacity(total);
        for (i, (index, audio)) in segments.iter().enumerate() {
            let result = self.extract_embedding(audio, model_id).await;
            out.push((*index, result));
            on_progress(i + 1, total);
        }
        out
    }
}

#[derive(Debug, Clone)]
pub struct SegmenterSpan {
    pub speaker_local_id: u32,
    pub t_start: f32,
    pub t_end: f32,
    pub confidence: f32,
}

#[async_trait]
pub trait Segmenter: Send + Sync {
    /// `words` is present for the text-gap profile; acoustic segmenters may
    /// ignore it and work from `audio` alone.
    async fn segment(
        &self,
        audio: Pcm16k<'_>,
        words: Option<&[Word]>,
    ) -> Result<Vec<SegmenterSpan>, CapabilityError>;
}

#[async_trait]
pub trait VoiceActivityDetector: Send + Sync {
    /// Per-frame speech probability in `[0, 1]` for a fixed-size frame of
    /// 16 kHz mono audio.
    async fn speech_probability(&self, frame: Pcm16k<'_>) -> Result<f32, CapabilityError>;
}
