//! # patchlings-engine
//!
//! The telemetry ingestion pipeline. An adapter hands validated events to
//! [`StoryEngine::ingest_batch`]; each event flows through redaction,
//! backpressure, deduplication, and the reducer, mutating the world
//! document and the per-run open chapter. Persistence is scheduled on a
//! dedicated writer thread and awaited once per batch.

pub mod backpressure;
pub mod chapters;
pub mod engine;
pub mod redact;
pub mod reducer;
pub mod salts;

pub use backpressure::{BackpressureAggregator, FlushedBucket, Observation, Verdict};
pub use chapters::ChapterBook;
pub use engine::{BatchResult, StoryEngine};
pub use redact::Redactor;
pub use salts::SaltManager;
