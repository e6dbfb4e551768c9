pub mod assembler;
pub mod buffer;
pub mod capability;
pub mod chunker;
pub mod clusterer;
pub mod config;
pub mod error;
pub mod events;
pub mod inference;
pub mod job;
pub mod merger;
pub mod session;
pub mod store;
pub mod types;
pub mod unknown_clusterer;

pub use error::PipelineError;
pub use session::SessionOrchestrator;
pub use types::{AttributedSegment, Chunk, PcmFrame, Segment};
