//! End-to-end scenarios wiring the full session orchestrator against fake
//! capability providers, covering the pipeline's top-level contract rather
//! than any one stage in isolation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use convocore::capability::{AsrProvider, EmbeddingProvider, Pcm16k, Transcription, VoiceActivityDetector};
use convocore::config::SessionConfig;
use convocore::error::CapabilityError;
use convocore::events::SessionEvent;
use convocore::session::{Providers, SessionOrchestrator};
use convocore::types::{PcmFrame, Word};

/// Emits "hello world" on every chunk, as two words spanning the whole
/// chunk's duration.
struct FixedAsr;

#[async_trait::async_trait]
impl AsrProvider for FixedAsr {
    async fn transcribe(&self, audio: Pcm16k<'_>, _language: Option<&str>) -> Result<Transcription, CapabilityError> {
        let duration = audio.len() as f32 / 16_000.0;
        Ok(Transcription {
            words: vec![
                Word { text: "hello".into(), t_start: 0.0, t_end: duration * 0.4 },
                Word { text: "world".into(), t_start: duration * 0.5, t_end: duration },
            ],
            raw_text: "hello world".into(),
            audio_duration_s: duration,
        })
    }
}

/// Always returns the same unit embedding, so every segment clusters to the
/// same speaker.
struct StableEmbedder;

#[async_trait::async_trait]
impl EmbeddingProvider for StableEmbedder {
    async fn extract_embedding(&self, _audio: Pcm16k<'_>, _model_id: &str) -> Result<Vec<f32>, CapabilityError> {
        let mut v = vec![0.0f32; 8];
        v[0] = 1.0;
        Ok(v)
    }
}

/// Alternates between silence and full-confidence speech so the chunker
/// reliably produces chunk boundaries from a handful of frames.
struct SquareWaveVad {
    calls: AtomicUsize,
    speech_frames: usize,
}

#[async_trait::async_trait]
impl VoiceActivityDetector for SquareWaveVad {
    async fn speech_probability(&self, _frame: Pcm16k<'_>) -> Result<f32, CapabilityError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(if n < self.speech_frames { 0.9 } else { 0.05 })
    }
}

fn frame(sample_rate: u32, len: usize) -> PcmFrame {
    PcmFrame::new(sample_rate, vec![0.1; len])
}

#[tokio::test]
async fn speech_then_silence_produces_a_committed_segment() {
    let mut config = SessionConfig::default();
    config.chunker.sample_rate = 16_000;
    config.chunker.frame_duration_ms = 30;
    config.chunker.min_speech_duration_s = 0.1;
    config.chunker.max_speech_duration_s = 5.0;
    config.chunker.redemption_ms = 60;
    config.assembler.min_phrase_duration_s = 0.0;
    config.assembler.gap_threshold_s = 1.0;

    let frame_len = (16_000 * 30 / 1000) as usize;
    let vad = Arc::new(SquareWaveVad {
        calls: AtomicUsize::new(0),
        speech_frames: 20,
    });

    let providers = Providers {
        asr: Arc::new(FixedAsr),
        embedder: Arc::new(StableEmbedder),
        segmenter: None,
        vad: vad.clone(),
    };

    let session = SessionOrchestrator::new(config, &[], providers);
    let mut events = session.subscribe_events();
    session.start().await;

    for _ in 0..30 {
        session.ingest_frame(frame(16_000, frame_len)).await.unwrap();
    }
    session.stop().await;

    let mut saw_committed = false;
    while let Ok(event) = events.try_recv() {
        if let SessionEvent::SegmentCommitted { segment } = event {
            saw_committed = true;
            assert_eq!(segment.segment.text(), "hello world");
        }
    }
    assert!(saw_committed, "expected at least one committed segment");

    let segments = session.segments().await;
    assert!(!segments.is_empty());
}

#[tokio::test]
async fn idle_frames_never_produce_a_chunk() {
    let mut config = SessionConfig::default();
    config.chunker.min_speech_duration_s = 1.0;

    let vad = Arc::new(SquareWaveVad {
        calls: AtomicUsize::new(0),
        speech_frames: 0,
    });
    let providers = Providers {
        asr: Arc::new(FixedAsr),
        embedder: Arc::new(StableEmbedder),
        segmenter: None,
        vad,
    };

    let session = SessionOrchestrator::new(config, &[], providers);
    session.start().await;

    let frame_len = (16_000 * 30 / 1000) as usize;
    for _ in 0..10 {
        session.ingest_frame(frame(16_000, frame_len)).await.unwrap();
    }
    session.stop().await;

    assert!(session.segments().await.is_empty());
}

#[tokio::test]
async fn stopping_an_unstarted_session_does_not_hang() {
    let providers = Providers {
        asr: Arc::new(FixedAsr),
        embedder: Arc::new(StableEmbedder),
        segmenter: None,
        vad: Arc::new(SquareWaveVad { calls: AtomicUsize::new(0), speech_frames: 0 }),
    };
    let session = SessionOrchestrator::new(SessionConfig::default(), &[], providers);
    tokio::time::timeout(Duration::from_secs(1), session.stop())
        .await
        .expect("stop() must return promptly even if start() was never called");
}
