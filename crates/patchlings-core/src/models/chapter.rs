//! Chapter state: the transient open chapter and the immutable summary.
//!
//! The two are distinct types on purpose. An [`OpenChapter`] lives only in
//! engine memory and mutates on every folded event; closing converts it to a
//! [`ChapterSummary`], which is append-only from then on.

use std::collections::{BTreeMap, BTreeSet};

use chrono::DateTime;
use serde::{Deserialize, Serialize};

/// How a chapter ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChapterStatus {
    Completed,
    Failed,
    Interrupted,
}

/// Pass/fail counts for test events within a chapter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCounts {
    pub pass: u64,
    pub fail: u64,
}

/// Backpressure forensics carried on every summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackpressureReport {
    pub dropped_low_value: u64,
    pub peak_events_per_sec: u32,
    /// Engine-configured threshold, copied for forensic clarity.
    pub threshold: u32,
    pub summaries_emitted: u64,
}

/// Immutable, persisted record of a closed chapter. One line in
/// `chapters.ndjson`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterSummary {
    pub v: u32,
    pub run: String,
    pub chapter_id: String,
    pub turn_index: u64,
    pub status: ChapterStatus,
    pub started_ts: String,
    pub completed_ts: String,
    pub duration_ms: u64,
    pub seq_start: i64,
    pub seq_end: i64,
    /// Sorted, unique file ids.
    pub files_touched: Vec<String>,
    /// Keyed by tool name, alphabetically sorted for deterministic output.
    pub tools_used: BTreeMap<String, u64>,
    pub tests: TestCounts,
    pub errors: u64,
    pub backpressure: BackpressureReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// In-memory state of the one chapter a run may have open.
#[derive(Debug, Clone)]
pub struct OpenChapter {
    pub run: String,
    pub chapter_id: String,
    pub turn_index: u64,
    pub started_ts: String,
    pub started_seq: i64,
    pub latest_ts: String,
    pub latest_seq: i64,
    pub title: Option<String>,
    pub files_touched: BTreeSet<String>,
    pub tools_used: BTreeMap<String, u64>,
    pub tests_passed: u64,
    pub tests_failed: u64,
    pub errors: u64,
    pub dropped_low_value: u64,
    pub summaries_emitted: u64,
    pub peak_events_per_sec: u32,
    pub event_count: u64,
}

impl OpenChapter {
    /// Open a chapter for `run` at the given turn index.
    pub fn open(
        run: &str,
        turn_index: u64,
        started_ts: &str,
        started_seq: i64,
        title: Option<String>,
        initial_event_count: u64,
    ) -> Self {
        Self {
            run: run.to_string(),
            chapter_id: format!("{run}:{turn_index}"),
            turn_index,
            started_ts: started_ts.to_string(),
            started_seq,
            latest_ts: started_ts.to_string(),
            latest_seq: started_seq,
            title,
            files_touched: BTreeSet::new(),
            tools_used: BTreeMap::new(),
            tests_passed: 0,
            tests_failed: 0,
            errors: 0,
            dropped_low_value: 0,
            summaries_emitted: 0,
            peak_events_per_sec: 0,
            event_count: initial_event_count,
        }
    }

    /// Record that an event landed in this chapter.
    pub fn touch(&mut self, ts: &str, seq: i64) {
        self.latest_ts = ts.to_string();
        self.latest_seq = seq;
        self.event_count += 1;
    }

    /// Convert to the immutable summary. Duration is clipped at zero.
    pub fn close(
        self,
        status: ChapterStatus,
        completed_ts: &str,
        seq_end: i64,
        threshold: u32,
    ) -> ChapterSummary {
        let duration_ms = duration_between(&self.started_ts, completed_ts);
        ChapterSummary {
            v: 1,
            run: self.run,
            chapter_id: self.chapter_id,
            turn_index: self.turn_index,
            status,
            started_ts: self.started_ts,
            completed_ts: completed_ts.to_string(),
            duration_ms,
            seq_start: self.started_seq,
            seq_end,
            files_touched: self.files_touched.into_iter().collect(),
            tools_used: self.tools_used,
            tests: TestCounts {
                pass: self.tests_passed,
                fail: self.tests_failed,
            },
            errors: self.errors,
            backpressure: BackpressureReport {
                dropped_low_value: self.dropped_low_value,
                peak_events_per_sec: self.peak_events_per_sec,
                threshold,
                summaries_emitted: self.summaries_emitted,
            },
            title: self.title,
        }
    }
}

fn duration_between(started_ts: &str, completed_ts: &str) -> u64 {
    let millis = |ts: &str| {
        DateTime::parse_from_rfc3339(ts)
            .map(|dt| dt.timestamp_millis())
            .unwrap_or(0)
    };
    millis(completed_ts).saturating_sub(millis(started_ts)).max(0) as u64
}
