//! `StoryEngine` — the single-writer facade over the ingestion pipeline.
//!
//! Owns the world document, the chapter book, the aggregator, the salt
//! manager, and the writer thread. One logical owner drives it through
//! `ingest_batch`; events in a batch are processed sequentially, so equal
//! inputs and salts produce byte-identical outputs. Persistence is
//! scheduled fire-and-forget and awaited once per batch.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use patchlings_core::config::{EngineOptions, StorageMode};
use patchlings_core::errors::StoryError;
use patchlings_core::events::{
    ensure_valid, is_turn_boundary, EventKind, Severity, TelemetryEvent, BACKPRESSURE_SUMMARY,
    SCHEMA_VERSION,
};
use patchlings_core::hashing::hash_path;
use patchlings_core::models::chapter::ChapterSummary;
use patchlings_core::models::world::WorldState;
use patchlings_core::traits::StoryStore;
use patchlings_storage::paths::{recording_file_name, StoryPaths};
use patchlings_storage::{FsStore, MemoryStore, StoryWriter, WriteCommand, WriteStats};

use crate::backpressure::{BackpressureAggregator, FlushedBucket, Verdict};
use crate::chapters::ChapterBook;
use crate::redact::Redactor;
use crate::reducer::Reducer;
use crate::salts::SaltManager;

/// What one `ingest_batch` (or `flush_run_aggregates`) produced. This is
/// the shape servers fan out to subscribers.
#[derive(Debug, Serialize)]
pub struct BatchResult {
    /// Accepted events in submission order; synthesized summaries precede
    /// the event that triggered their flush.
    pub accepted_events: Vec<TelemetryEvent>,
    /// Chapters closed by this batch, in close order.
    pub closed_chapters: Vec<ChapterSummary>,
    pub dropped_low_value_events: u64,
    pub dropped_duplicate_events: u64,
    /// Snapshot of the world after the batch.
    pub world: WorldState,
}

#[derive(Default)]
struct Accumulator {
    accepted: Vec<TelemetryEvent>,
    closed: Vec<ChapterSummary>,
    dropped_low_value: u64,
    dropped_duplicates: u64,
}

/// The telemetry ingestion engine. Exclusively owns all mutable state for
/// one workspace; must not share its `.patchlings/` directory with another
/// instance.
pub struct StoryEngine {
    paths: StoryPaths,
    threshold: u32,
    record_telemetry: bool,
    max_recording_bytes: u64,
    world: WorldState,
    book: ChapterBook,
    aggregator: BackpressureAggregator,
    salts: SaltManager,
    redactor: Redactor,
    reducer: Reducer,
    writer: StoryWriter,
}

impl StoryEngine {
    /// Construct an engine: resolve salts, load and normalize the persisted
    /// world, seed recent chapters, spawn the writer, and schedule the
    /// rewritten world document.
    pub fn create(options: EngineOptions) -> Result<Self, StoryError> {
        let root = options.effective_root();
        let paths = StoryPaths::new(&root, &options.effective_patchlings_dir());
        let threshold = options.effective_threshold();

        let store: Arc<dyn StoryStore> = match options.effective_storage() {
            StorageMode::Fs => Arc::new(FsStore::new(paths.clone())),
            StorageMode::Memory => Arc::new(MemoryStore::new()),
        };

        let mut salts = SaltManager::load(store.as_ref(), options.fixed_salts.as_ref())?;
        let workspace_id = hash_path(&root.to_string_lossy(), salts.workspace_salt());

        let world = match store.load_world()? {
            Some(mut loaded) => {
                loaded.normalize();
                loaded.workspace_id = workspace_id.clone();
                loaded
            }
            None => {
                let now = options.fixed_created_at.clone().unwrap_or_else(|| {
                    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
                });
                WorldState::new(workspace_id.clone(), now)
            }
        };

        let max_chapters = options.effective_max_chapters_in_memory();
        let mut book = ChapterBook::new(max_chapters);
        book.seed_recent(store.load_recent_chapters(max_chapters)?);

        let reducer = Reducer::new(threshold, salts.workspace_salt().to_string());
        let redactor = Redactor::new(options.effective_allow_content());
        let writer = StoryWriter::new(store);

        let mut engine = Self {
            paths,
            threshold,
            record_telemetry: options.effective_record_telemetry(),
            max_recording_bytes: options.effective_max_recording_bytes(),
            world,
            book,
            aggregator: BackpressureAggregator::new(threshold),
            salts,
            redactor,
            reducer,
            writer,
        };

        // Rewrite the world so the file on disk carries the normalized
        // shape, and persist a freshly generated workspace salt.
        if let Some(salts_file) = engine.salts.take_dirty() {
            engine.schedule(WriteCommand::WriteSalts(Box::new(salts_file)));
        }
        engine.schedule(WriteCommand::WriteWorld(Box::new(engine.world.clone())));

        info!(
            workspace_id = %workspace_id,
            threshold,
            "story engine created"
        );
        Ok(engine)
    }

    /// Ingest a batch of validated events. Never aborts on per-event
    /// issues: duplicates and backpressure drops surface only as counts.
    pub fn ingest_batch(&mut self, events: Vec<TelemetryEvent>) -> BatchResult {
        debug!(batch_size = events.len(), "ingesting batch");
        let mut acc = Accumulator::default();
        for event in events {
            if let Err(error) = ensure_valid(&event) {
                warn!(run = %event.run, seq = event.seq, %error, "skipping invalid event");
                continue;
            }
            if event.is_internal() {
                self.ingest_internal(event, &mut acc);
            } else {
                self.ingest_external(event, &mut acc);
            }
        }
        self.finish_batch(acc)
    }

    /// Force a terminal flush of any buffered summaries for a run. Used by
    /// adapters on stream EOF. Does not close an open chapter; callers
    /// synthesize a terminal turn event if they want closure.
    pub fn flush_run_aggregates(&mut self, run_id: &str) -> BatchResult {
        let mut acc = Accumulator::default();
        let buckets = self.aggregator.flush_run(run_id);
        self.emit_summaries(run_id, buckets, &mut acc);
        self.finish_batch(acc)
    }

    // ─── Queries ───────────────────────────────────────────────────────

    pub fn get_world(&self) -> &WorldState {
        &self.world
    }

    /// Recently closed chapters in close order; `limit` keeps the newest.
    pub fn get_chapters(&self, limit: Option<usize>) -> Vec<ChapterSummary> {
        self.book.recent(limit)
    }

    pub fn get_chapters_by_run(&self, run_id: &str, limit: Option<usize>) -> Vec<ChapterSummary> {
        self.book.recent_for_run(run_id, limit)
    }

    pub fn get_workspace_salt(&self) -> &str {
        self.salts.workspace_salt()
    }

    /// The run's salt, minting one on first request.
    pub fn get_run_salt(&mut self, run_id: &str) -> String {
        self.salts.run_salt(run_id)
    }

    pub fn get_patchlings_dir(&self) -> PathBuf {
        self.paths.patchlings_dir().to_path_buf()
    }

    pub fn get_story_dir(&self) -> PathBuf {
        self.paths.story_dir().to_path_buf()
    }

    pub fn get_recordings_dir(&self) -> PathBuf {
        self.paths.recordings_dir()
    }

    /// Drain the writer and return its statistics. Consumes the engine.
    pub fn shutdown(self) -> WriteStats {
        let Self { writer, .. } = self;
        writer.shutdown()
    }

    // ─── Pipeline ──────────────────────────────────────────────────────

    /// Replayed synthesized events (e.g. from a recording) bypass
    /// backpressure and deduplication and go straight to the reducer.
    fn ingest_internal(&mut self, event: TelemetryEvent, acc: &mut Accumulator) {
        {
            let run = self.world.ensure_run(&event.run);
            run.internal_seq = run.internal_seq.max(event.seq);
        }
        let run_salt = self.salts.run_salt(&event.run);
        let workspace_salt = self.salts.workspace_salt().to_string();
        let redacted = self
            .redactor
            .redact_event(&event, &run_salt, Some(&workspace_salt));

        let closed = self.reducer.reduce(&mut self.world, &mut self.book, &redacted);
        self.schedule_closed(closed, acc);
        self.record_event(&redacted);
        acc.accepted.push(redacted);
    }

    fn ingest_external(&mut self, event: TelemetryEvent, acc: &mut Accumulator) {
        let run_id = event.run.clone();
        let run_salt = self.salts.run_salt(&run_id);
        let workspace_salt = self.salts.workspace_salt().to_string();
        let redacted = self
            .redactor
            .redact_event(&event, &run_salt, Some(&workspace_salt));

        // Turn boundaries drain every bucket first, so the chapter being
        // closed (or interrupted) owns all of its synthesized summaries.
        if is_turn_boundary(&redacted.name) {
            let buckets = self.aggregator.flush_run(&run_id);
            self.emit_summaries(&run_id, buckets, acc);
        }

        let observation = self.aggregator.observe(&redacted);
        let second_count = observation.second_count;
        let verdict = observation.verdict;
        self.emit_summaries(&run_id, observation.flushed, acc);

        {
            let run = self.world.ensure_run(&run_id);
            if second_count > run.peak_events_per_sec {
                run.peak_events_per_sec = second_count;
            }
        }
        if let Some(chapter) = self.book.open_for_mut(&run_id) {
            if second_count > chapter.peak_events_per_sec {
                chapter.peak_events_per_sec = second_count;
            }
        }

        if verdict == Verdict::Fold {
            self.world.ensure_run(&run_id).dropped_low_value_events += 1;
            self.world.counters.dropped_low_value_events += 1;
            if let Some(chapter) = self.book.open_for_mut(&run_id) {
                chapter.dropped_low_value += 1;
            }
            acc.dropped_low_value += 1;
            return;
        }

        // Deduplication: accepted external events are strictly increasing
        // in upstream seq.
        let upstream = redacted.upstream_or_seq();
        {
            let run = self.world.ensure_run(&run_id);
            if upstream <= run.last_upstream_seq {
                run.duplicate_events += 1;
                self.world.counters.duplicate_events += 1;
                acc.dropped_duplicates += 1;
                return;
            }
            run.last_upstream_seq = upstream;
            run.internal_seq = run.internal_seq.max(redacted.seq);
        }

        let closed = self.reducer.reduce(&mut self.world, &mut self.book, &redacted);
        self.schedule_closed(closed, acc);
        self.record_event(&redacted);
        acc.accepted.push(redacted);
    }

    /// Turn flushed buckets into synthesized summary events and feed them
    /// to the reducer (not back through the backpressure path).
    fn emit_summaries(
        &mut self,
        run_id: &str,
        buckets: Vec<FlushedBucket>,
        acc: &mut Accumulator,
    ) {
        if buckets.is_empty() {
            return;
        }
        let run_salt = self.salts.run_salt(run_id);
        let workspace_salt = self.salts.workspace_salt().to_string();

        for bucket in buckets {
            let (seq, upstream_seq) = {
                let run = self.world.ensure_run(run_id);
                run.internal_seq += 1;
                let upstream = (run.last_upstream_seq >= 0).then_some(run.last_upstream_seq);
                (run.internal_seq, upstream)
            };

            let mut attrs = Map::new();
            attrs.insert("patchlings_internal".to_string(), Value::Bool(true));
            attrs.insert("second".to_string(), bucket.second.into());
            attrs.insert("source_kind".to_string(), bucket.kind.as_str().into());
            attrs.insert("source_name".to_string(), bucket.name.clone().into());
            attrs.insert("count".to_string(), bucket.count.into());
            attrs.insert("threshold".to_string(), self.threshold.into());

            let summary = TelemetryEvent {
                v: SCHEMA_VERSION,
                run: run_id.to_string(),
                seq,
                ts: bucket.last_ts.clone(),
                kind: EventKind::Metric,
                name: BACKPRESSURE_SUMMARY.to_string(),
                severity: Some(Severity::Info),
                attrs: Some(attrs),
                internal: Some(true),
                upstream_seq,
                extra: Map::new(),
            };
            let redacted = self
                .redactor
                .redact_event(&summary, &run_salt, Some(&workspace_salt));

            let closed = self.reducer.reduce(&mut self.world, &mut self.book, &redacted);
            self.schedule_closed(closed, acc);
            self.record_event(&redacted);
            acc.accepted.push(redacted);
        }
    }

    fn schedule_closed(&mut self, closed: Vec<ChapterSummary>, acc: &mut Accumulator) {
        for summary in closed {
            self.schedule(WriteCommand::AppendChapter(Box::new(summary.clone())));
            acc.closed.push(summary);
        }
    }

    /// Append the accepted event to the run's recording, rotating when the
    /// next line would exceed the size limit.
    fn record_event(&mut self, event: &TelemetryEvent) {
        if !self.record_telemetry {
            return;
        }
        let line = match serde_json::to_string(event) {
            Ok(line) => line,
            Err(error) => {
                warn!(run = %event.run, %error, "failed to serialize recording line");
                return;
            }
        };
        let line_bytes = line.len() as u64 + 1;
        let file_name = {
            let run = self.world.ensure_run(&event.run);
            if run.recording_bytes > 0 && run.recording_bytes + line_bytes > self.max_recording_bytes
            {
                run.recording_index += 1;
                run.recording_bytes = 0;
            }
            run.recording_bytes += line_bytes;
            recording_file_name(&event.run, run.recording_index)
        };
        self.schedule(WriteCommand::AppendRecording { file_name, line });
    }

    /// End-of-batch persistence: minted salts, the world snapshot, then a
    /// barrier on the writer queue. Failures inside the writer are counted
    /// there and never poison the engine.
    fn finish_batch(&mut self, acc: Accumulator) -> BatchResult {
        if let Some(salts_file) = self.salts.take_dirty() {
            self.schedule(WriteCommand::WriteSalts(Box::new(salts_file)));
        }
        self.schedule(WriteCommand::WriteWorld(Box::new(self.world.clone())));
        if let Err(error) = self.writer.flush_sync() {
            warn!(%error, "story writer unavailable");
        }

        BatchResult {
            accepted_events: acc.accepted,
            closed_chapters: acc.closed,
            dropped_low_value_events: acc.dropped_low_value,
            dropped_duplicate_events: acc.dropped_duplicates,
            world: self.world.clone(),
        }
    }

    fn schedule(&self, command: WriteCommand) {
        if let Err(error) = self.writer.send(command) {
            warn!(%error, "failed to schedule story write");
        }
    }
}
