use std::sync::Arc;

use convocore::capability::{AsrProvider, EmbeddingProvider, Pcm16k, Transcription, VoiceActivityDetector};
use convocore::config::SessionConfig;
use convocore::error::CapabilityError;
use convocore::session::{Providers, SessionOrchestrator};
use convocore::types::Word;

/// Placeholder capability providers wired up for a standalone run without
/// any real ASR/VAD/embedding backend configured. Replace with adapters
/// for whatever engines are deployed; the session orchestrator only ever
/// depends on the trait objects in `capability`.
struct SilentAsr;

#[async_trait::async_trait]
impl AsrProvider for SilentAsr {
    async fn transcribe(&self, _audio: Pcm16k<'_>, _language: Option<&str>) -> Result<Transcription, CapabilityError> {
        Ok(Transcription {
            words: Vec::<Word>::new(),
            raw_text: String::new(),
            audio_duration_s: 0.0,
        })
    }
}

struct ZeroEmbedder;

#[async_trait::async_trait]
impl EmbeddingProvider for ZeroEmbedder {
    async fn extract_embedding(&self, _audio: Pcm16k<'_>, _model_id: &str) -> Result<Vec<f32>, CapabilityError> {
        Ok(vec![0.0; 192])
    }
}

struct QuietVad;

#[async_trait::async_trait]
impl VoiceActivityDetector for QuietVad {
    async fn speech_probability(&self, _frame: Pcm16k<'_>) -> Result<f32, CapabilityError> {
        Ok(0.0)
    }
}

#[tokio::main]
async fn main() {
    std::env::set_var("RUST_LOG", std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()));
    env_logger::init();
    log::info!("Starting session...");

    let providers = Providers {
        asr: Arc::new(SilentAsr),
        embedder: Arc::new(ZeroEmbedder),
        segmenter: None,
        vad: Arc::new(QuietVad),
    };

    let session = SessionOrchestrator::new(SessionConfig::default(), &[], providers);
    session.start().await;

    log::info!("session running, press Ctrl+C to stop");
    let _ = tokio::signal::ctrl_c().await;

    session.stop().await;
    log::info!("session stopped");
}
