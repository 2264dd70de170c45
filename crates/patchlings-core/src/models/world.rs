//! The world document: one per workspace, versioned, rewritten every batch.
//!
//! Legacy documents normalize on load: `last_seq` is accepted as an alias
//! for `last_upstream_seq`, and counters added after v1 default to zero.
//! The engine rewrites the document right after loading so the file on disk
//! always carries the current shape.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Base offset for sequence numbers of synthesized internal events.
/// Far above plausible upstream values so the two are distinguishable by
/// inspection and can never collide.
pub const INTERNAL_SEQ_BASE: i64 = 1_000_000_000;

/// Current world document version.
pub const WORLD_VERSION: u32 = 1;

/// Durable world state summarizing every run seen by this workspace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldState {
    #[serde(default = "default_world_version")]
    pub v: u32,
    pub workspace_id: String,
    pub created_at: String,
    pub updated_at: String,
    #[serde(default)]
    pub counters: WorldCounters,
    #[serde(default)]
    pub runs: BTreeMap<String, RunState>,
    #[serde(default)]
    pub regions: BTreeMap<String, RegionState>,
    #[serde(default)]
    pub files: BTreeMap<String, FileState>,
    #[serde(default)]
    pub patchlings: BTreeMap<String, PatchlingState>,
}

fn default_world_version() -> u32 {
    WORLD_VERSION
}

/// Global counters across all runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldCounters {
    pub events: u64,
    pub chapters: u64,
    pub dropped_low_value_events: u64,
    pub duplicate_events: u64,
    pub backpressure_summaries: u64,
}

/// Per-run aggregate state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunState {
    pub chapter_count: u64,
    pub event_count: u64,
    pub tool_invocations: u64,
    pub file_touches: u64,
    pub tests_passed: u64,
    pub tests_failed: u64,
    pub errors: u64,
    pub dropped_low_value_events: u64,
    pub duplicate_events: u64,
    pub peak_events_per_sec: u32,
    /// Highest external seq ingested. −1 until the first accepted event.
    #[serde(alias = "last_seq")]
    pub last_upstream_seq: i64,
    /// Counter for synthesized events. Starts at [`INTERNAL_SEQ_BASE`].
    pub internal_seq: i64,
    pub recording_index: u32,
    pub recording_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_ts: Option<String>,
}

impl Default for RunState {
    fn default() -> Self {
        Self {
            chapter_count: 0,
            event_count: 0,
            tool_invocations: 0,
            file_touches: 0,
            tests_passed: 0,
            tests_failed: 0,
            errors: 0,
            dropped_low_value_events: 0,
            duplicate_events: 0,
            peak_events_per_sec: 0,
            last_upstream_seq: -1,
            internal_seq: INTERNAL_SEQ_BASE,
            recording_index: 0,
            recording_bytes: 0,
            last_ts: None,
        }
    }
}

/// A region aggregates files sharing a directory hash.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionState {
    pub file_count: u64,
    pub touches: u64,
}

/// A file aggregates touches at a path hash. Its region is assigned on
/// first observation and never changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileState {
    pub region_id: String,
    #[serde(default)]
    pub touches: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_event: Option<String>,
}

/// A patchling aggregates tool invocations, keyed by the hash of the tool
/// name under the workspace salt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatchlingState {
    pub invocations: u64,
}

impl WorldState {
    /// Fresh world for a workspace. `now` is the only wall-clock-derived
    /// value in the document.
    pub fn new(workspace_id: String, now: String) -> Self {
        Self {
            v: WORLD_VERSION,
            workspace_id,
            created_at: now.clone(),
            updated_at: now,
            counters: WorldCounters::default(),
            runs: BTreeMap::new(),
            regions: BTreeMap::new(),
            files: BTreeMap::new(),
            patchlings: BTreeMap::new(),
        }
    }

    /// Get or create the state for a run.
    pub fn ensure_run(&mut self, run_id: &str) -> &mut RunState {
        self.runs.entry(run_id.to_string()).or_default()
    }

    /// Bring a loaded document up to the current shape.
    pub fn normalize(&mut self) {
        self.v = WORLD_VERSION;
    }
}
