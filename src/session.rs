//! Session Orchestrator (spec §4.9, ambient concurrency glue): owns the
//! chunk queue, the single processor task that drains it in strict index
//! order, and the event broadcaster, mirroring the shape of the context
//! manager this crate descends from (a handful of `Arc`-shared
//! sub-components plus a registry of spawned tasks).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use log::{error, info, warn};
use tokio::sync::{broadcast, Mutex, Notify};
use tokio::task::JoinHandle;

use crate::assembler::{assemble, classify};
use crate::buffer::ChunkQueue;
use crate::capability::{AsrProvider, EmbeddingProvider, Segmenter, VoiceActivityDetector};
use crate::chunker::{ChunkerEvent, VadChunker};
use crate::clusterer::SpeakerClusterer;
use crate::config::SessionConfig;
use crate::error::{CapabilityError, ErrorHandler, PipelineError, RecoveryAction};
use crate::events::{EventBroadcaster, SessionEvent};
use crate::inference::ConversationInference;
use crate::merger::{adjust_timestamps, find_merge_point};
use crate::types::{
    Attribution, AttributedSegment, Chunk, ClusterDebug, DecisionReason, DisplayAttribution,
    Enrollment, PcmFrame, Segment, SpeakerId,
};
use crate::unknown_clusterer::UnknownClusterer;

/// Everything the orchestrator needs to drive the pipeline that it does not
/// implement itself.
pub struct Providers {
    pub asr: Arc<dyn AsrProvider>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub segmenter: Option<Arc<dyn Segmenter>>,
    pub vad: Arc<dyn VoiceActivityDetector>,
}

struct PrevChunkTail {
    words: Vec<crate::types::Word>,
    duration: f32,
}

pub struct SessionOrchestrator {
    config: SessionConfig,
    providers: Providers,
    events: EventBroadcaster,
    error_handler: Arc<ErrorHandler>,
    chunk_queue: Arc<ChunkQueue<Chunk>>,
    queue_notify: Notify,
    chunker: Mutex<VadChunker>,
    clusterer: Mutex<SpeakerClusterer>,
    inference: Mutex<ConversationInference>,
    segments: Mutex<Vec<AttributedSegment>>,
    prev_tail: Mutex<Option<PrevChunkTail>>,
    global_offset_s: Mutex<f64>,
    processing_task: Mutex<Option<JoinHandle<()>>>,
    running: AtomicBool,
    current_hypothesis_version: AtomicU64,
}

impl SessionOrchestrator {
    pub fn new(config: SessionConfig, enrollments: &[Enrollment], providers: Providers) -> Arc<Self> {
        let chunker = VadChunker::new(config.chunker.clone(), providers.vad.clone());
        let clusterer = SpeakerClusterer::new(config.clustering.clone(), enrollments, &config.embedding_model_id);
        let unknown_clusterer = UnknownClusterer::new(config.unknown_clustering.clone());
        let inference = ConversationInference::new(config.boosting.clone(), config.expected_speakers, unknown_clusterer);

        Arc::new(Self {
            chunk_queue: Arc::new(ChunkQueue::new(config.queue_soft_limit)),
            config,
            providers,
            events: EventBroadcaster::default(),
            error_handler: ErrorHandler::shared(),
            queue_notify: Notify::new(),
            chunker: Mutex::new(chunker),
            clusterer: Mutex::new(clusterer),
            inference: Mutex::new(inference),
            segments: Mutex::new(Vec::new()),
            prev_tail: Mutex::new(None),
            global_offset_s: Mutex::new(0.0),
            processing_task: Mutex::new(None),
            running: AtomicBool::new(false),
            current_hypothesis_version: AtomicU64::new(0),
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub async fn segments(&self) -> Vec<AttributedSegment> {
        self.segments.lock().await.clone()
    }

    /// Starts the single processor task that drains the chunk queue in
    /// strict index order. Idempotent: calling it twice while already
    /// running is a no-op.
    pub async fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            info!("session processor task started");
            while this.running.load(Ordering::SeqCst) {
                match this.chunk_queue.pop().await {
                    Some(chunk) => this.process_chunk(chunk).await,
                    None => {
                        this.queue_notify.notified().await;
                    }
                }
            }
            info!("session processor task stopped");
        });
        *self.processing_task.lock().await = Some(handle);
    }

    /// Stops ingestion, flushes any in-flight speech as a final chunk, and
    /// waits for the processor task to drain the remaining queue.
    pub async fn stop(&self) {
        if let Some(chunk) = self.chunker.lock().await.stop() {
            self.enqueue_chunk(chunk).await;
        }
        self.running.store(false, Ordering::SeqCst);
        self.queue_notify.notify_waiters();
        if let Some(handle) = self.processing_task.lock().await.take() {
            let _ = handle.await;
        }
    }

    /// Feeds one fixed-size PCM frame into the VAD chunker; any resulting
    /// chunks are pushed onto the bounded, non-dropping queue.
    pub async fn ingest_frame(&self, frame: PcmFrame) -> Result<(), PipelineError> {
        let events = {
            let mut chunker = self.chunker.lock().await;
            chunker.process_frame(&frame.samples).await?
        };
        for event in events {
            match event {
                ChunkerEvent::SpeechEnd { chunk } => self.enqueue_chunk(chunk).await,
                ChunkerEvent::Error { message } => {
                    self.events.emit(SessionEvent::Error {
                        component: "chunker".to_string(),
                        message,
                    });
                }
                _ => {}
            }
        }
        Ok(())
    }

    async fn enqueue_chunk(&self, chunk: Chunk) {
        let depth = self.chunk_queue.push(chunk).await;
        self.queue_notify.notify_one();
        self.events.emit(SessionEvent::ChunkQueueUpdate {
            depth,
            processing: self.running.load(Ordering::SeqCst),
        });
    }

    async fn process_chunk(&self, chunk: Chunk) {
        let transcription = match self.providers.asr.transcribe(&chunk.samples, None).await {
            Ok(t) => t,
            Err(e) => {
                self.report(CapabilityError::AsrFailure {
                    chunk_index: chunk.index,
                    reason: e.to_string(),
                })
                .await;
                return;
            }
        };

        // Stitch against the previous chunk's tail before assembling
        // phrases, per the overlap merger (spec §4.2).
        let words = {
            let mut prev_tail = self.prev_tail.lock().await;
            let merged_words = match prev_tail.as_ref() {
                Some(tail) if chunk.was_forced() => {
                    let merge = find_merge_point(&tail.words, &transcription.words, chunk.overlap_duration, tail.duration);
                    let kept: Vec<_> = transcription.words[merge.merge_index..].to_vec();
                    adjust_timestamps(&kept, chunk.overlap_duration)
                }
                _ => transcription.words.clone(),
            };
            *prev_tail = Some(PrevChunkTail {
                words: transcription.words.clone(),
                duration: transcription.audio_duration_s,
            });
            merged_words
        };

        let phrases = match assemble(
            &words,
            &chunk.samples,
            self.config.chunker.sample_rate,
            &self.config.assembler,
            self.providers.segmenter.as_deref(),
        )
        .await
        {
            Ok(p) => p,
            Err(e) => {
                self.report(CapabilityError::SegmenterFailure { reason: e.to_string() }).await;
                return;
            }
        };

        let mut offset = self.global_offset_s.lock().await;

        for phrase in phrases {
            let text = phrase
                .words
                .iter()
                .map(|w| w.text.as_str())
                .collect::<Vec<_>>()
                .join(" ");
            let category = classify(&text);

            let local_start = phrase.words.first().map(|w| w.t_start).unwrap_or(0.0) as f64;
            let local_end = phrase.words.last().map(|w| w.t_end).unwrap_or(0.0) as f64;
            let t_start = *offset + local_start;
            let t_end = *offset + local_end;

            let mut segment = Segment {
                words: phrase.words,
                t_start,
                t_end,
                category,
                embedding: None,
            };

            let (original, boosted, display, hypothesis_version, cluster_debug, reattributed) =
                if segment.is_clusterable() {
                    // `local_start`/`local_end` are rebased to the chunk's new
                    // (post-overlap) content; shift back by the carried
                    // overlap to index into `chunk.samples`, which still
                    // holds the duplicated lead-in audio.
                    let sample_rate = self.config.chunker.sample_rate as f64;
                    let audio_local_start = local_start + chunk.overlap_duration as f64;
                    let audio_local_end = local_end + chunk.overlap_duration as f64;
                    let start_sample = ((audio_local_start * sample_rate).round().max(0.0) as usize)
                        .min(chunk.samples.len());
                    let end_sample = ((audio_local_end * sample_rate).round().max(0.0) as usize)
                        .max(start_sample)
                        .min(chunk.samples.len());
                    let sliced = &chunk.samples[start_sample..end_sample];
                    let audio_span: &[f32] = if sliced.is_empty() { &chunk.samples } else { sliced };
                    match self
                        .providers
                        .embedder
                        .extract_embedding(audio_span, &self.config.embedding_model_id)
                        .await
                    {
                        Ok(embedding) => {
                            segment.embedding = Some(embedding.clone());
                            let outcome = self.clusterer.lock().await.assign(&embedding);
                            let enrolled_speakers = self.clusterer.lock().await.speakers().to_vec();
                            let mut inference = self.inference.lock().await;
                            let record = inference.record_segment(&outcome, Some(&embedding), &enrolled_speakers);
                            (
                                record.original,
                                record.boosted,
                                record.display,
                                record.hypothesis_version,
                                Some(outcome.debug),
                                record.reattributed,
                            )
                        }
                        Err(e) => {
                            self.report(CapabilityError::EmbeddingFailure {
                                segment_index: chunk.index,
                                reason: e.to_string(),
                            })
                            .await;
                            let unknown = Attribution {
                                speaker_id: SpeakerId::None,
                                label: "Unknown".to_string(),
                                similarity: 0.0,
                            };
                            let display = DisplayAttribution {
                                label: unknown.label.clone(),
                                alternate_label: None,
                                is_unexpected: false,
                                was_influenced: false,
                                reason: "embedding_failed".to_string(),
                            };
                            (unknown.clone(), unknown, display, 0, None, Vec::new())
                        }
                    }
                } else {
                    let none_attr = Attribution {
                        speaker_id: SpeakerId::None,
                        label: "—".to_string(),
                        similarity: 0.0,
                    };
                    let display = DisplayAttribution {
                        label: none_attr.label.clone(),
                        alternate_label: None,
                        is_unexpected: false,
                        was_influenced: false,
                        reason: "not_clusterable".to_string(),
                    };
                    (none_attr.clone(), none_attr, display, 0, None, Vec::new())
                };

            let attributed = AttributedSegment {
                segment,
                cluster_debug,
                original,
                boosted,
                display,
                hypothesis_version,
            };

            let index = {
                let mut segments = self.segments.lock().await;
                segments.push(attributed.clone());
                segments.len() - 1
            };

            self.events.emit(SessionEvent::SegmentCommitted {
                segment: Box::new(attributed),
            });

            if !reattributed.is_empty() {
                self.events.emit(SessionEvent::SegmentsReattributed { indices: reattributed });
            }

            self.maybe_emit_hypothesis_change().await;
            let _ = index;
        }

        *offset += (chunk.raw_duration - chunk.overlap_duration).max(0.0) as f64;
    }

    async fn maybe_emit_hypothesis_change(&self) {
        let inference = self.inference.lock().await;
        let hypothesis = inference.hypothesis();
        let previous = self.current_hypothesis_version.swap(hypothesis.version, Ordering::SeqCst);
        if hypothesis.version != previous {
            let history = inference.hypothesis_history();
            let (added, removed) = history
                .last()
                .map(|h| (h.added.clone(), h.removed.clone()))
                .unwrap_or_default();
            self.events.emit(SessionEvent::HypothesisChanged {
                version: hypothesis.version,
                participants: hypothesis.names().into_iter().map(|s| s.to_string()).collect(),
                added,
                removed,
            });
        }
    }

    async fn report(&self, error: CapabilityError) {
        let pipeline_error = PipelineError::from(error);
        let action = self.error_handler.handle("session", &pipeline_error).await;
        self.events.emit(SessionEvent::Error {
            component: "session".to_string(),
            message: pipeline_error.to_string(),
        });
        if matches!(action, RecoveryAction::Fatal) {
            error!("fatal pipeline error: {pipeline_error}");
        } else {
            warn!("recovered from pipeline error ({action:?}): {pipeline_error}");
        }
    }
}

#[allow(dead_code)]
fn debug_reason_never_leaks_without_ranking(debug: &ClusterDebug) -> bool {
    debug.reason != DecisionReason::NoEmbedding || debug.all_similarities.is_empty()
}
