//! Per-second backpressure aggregation.
//!
//! Each run tracks how many events landed in the current wall-clock second
//! of the *event stream* (derived from `ts`, never from a real clock).
//! Once the configured rate is exceeded, low-value events are folded into
//! `(second, kind, name)` buckets instead of passing through; buckets are
//! flushed as synthesized summary events on second rollover, at turn
//! boundaries, and on demand at stream EOF.
//!
//! Flush order is deterministic: ascending (second, kind, name).

use std::collections::BTreeMap;

use rustc_hash::FxHashMap;

use patchlings_core::events::{EventKind, TelemetryEvent};

/// A drained bucket, ready to become one synthesized summary event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushedBucket {
    pub second: i64,
    pub kind: EventKind,
    pub name: String,
    pub count: u64,
    pub last_ts: String,
}

/// What to do with the observed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Fold,
}

/// Result of observing one external event.
#[derive(Debug)]
pub struct Observation {
    /// Buckets drained by a second rollover, in flush order. The caller
    /// emits these *before* the observed event.
    pub flushed: Vec<FlushedBucket>,
    pub verdict: Verdict,
    /// Events counted in the run's current second, including this one.
    pub second_count: u32,
}

#[derive(Debug, Clone)]
struct Bucket {
    count: u64,
    last_ts: String,
}

#[derive(Debug, Default)]
struct RunWindow {
    second: Option<i64>,
    count: u32,
    buckets: BTreeMap<(i64, &'static str, String), Bucket>,
}

impl RunWindow {
    /// Drain buckets below `upto` (all of them when `None`), in key order.
    fn drain(&mut self, upto: Option<i64>) -> Vec<FlushedBucket> {
        let drained = match upto {
            Some(limit) => {
                let kept = self.buckets.split_off(&(limit, "", String::new()));
                std::mem::replace(&mut self.buckets, kept)
            }
            None => std::mem::take(&mut self.buckets),
        };
        drained
            .into_iter()
            .map(|((second, kind, name), bucket)| FlushedBucket {
                second,
                kind: kind_from_str(kind),
                name,
                count: bucket.count,
                last_ts: bucket.last_ts,
            })
            .collect()
    }
}

/// The per-run rate limiter and summary folder.
pub struct BackpressureAggregator {
    threshold: u32,
    runs: FxHashMap<String, RunWindow>,
}

impl BackpressureAggregator {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold,
            runs: FxHashMap::default(),
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Observe one external event: roll the second window, decide whether
    /// the event passes or folds, and fold it if it does not.
    pub fn observe(&mut self, event: &TelemetryEvent) -> Observation {
        let second = event.ts_millis().map(|ms| ms.div_euclid(1000)).unwrap_or(0);
        let window = self.runs.entry(event.run.clone()).or_default();

        let mut flushed = Vec::new();
        if window.second != Some(second) {
            flushed = window.drain(Some(second));
            window.second = Some(second);
            window.count = 0;
        }

        // Rate check against the count before this event; every event in
        // the second is counted for the peak either way.
        let within_rate = window.count <= self.threshold;
        window.count += 1;

        let verdict = if within_rate || !event.is_low_value() {
            Verdict::Pass
        } else {
            let bucket = window
                .buckets
                .entry((second, event.kind.as_str(), event.name.clone()))
                .or_insert_with(|| Bucket {
                    count: 0,
                    last_ts: event.ts.clone(),
                });
            bucket.count += 1;
            bucket.last_ts = event.ts.clone();
            Verdict::Fold
        };

        Observation {
            flushed,
            verdict,
            second_count: window.count,
        }
    }

    /// Drain every bucket for a run. Used before turn-boundary events and
    /// by `flush_run_aggregates` at stream EOF. The current-second counter
    /// is left untouched.
    pub fn flush_run(&mut self, run_id: &str) -> Vec<FlushedBucket> {
        match self.runs.get_mut(run_id) {
            Some(window) => window.drain(None),
            None => Vec::new(),
        }
    }
}

fn kind_from_str(kind: &str) -> EventKind {
    match kind {
        "turn" => EventKind::Turn,
        "tool" => EventKind::Tool,
        "file" => EventKind::File,
        "git" => EventKind::Git,
        "test" => EventKind::Test,
        "spawn" => EventKind::Spawn,
        "log" => EventKind::Log,
        "error" => EventKind::Error,
        _ => EventKind::Metric,
    }
}
