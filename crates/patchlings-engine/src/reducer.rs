//! The reducer: accepted event → world-state mutation.
//!
//! Turn boundary names drive the chapter state machine; everything else is
//! folded into the run's open chapter, creating one implicitly when needed.
//! All mutations are synchronous and derive every output timestamp from the
//! event's own `ts`.

use serde_json::{Map, Value};

use patchlings_core::events::{
    EventKind, Severity, TelemetryEvent, BACKPRESSURE_SUMMARY, TURN_COMPLETED, TURN_FAILED,
    TURN_STARTED,
};
use patchlings_core::hashing::{salted_hash, REGION_UNKNOWN};
use patchlings_core::models::chapter::{ChapterStatus, ChapterSummary, OpenChapter};
use patchlings_core::models::world::{FileState, WorldState};

use crate::chapters::ChapterBook;

/// Stateless dispatch over accepted events. One per engine.
pub struct Reducer {
    threshold: u32,
    workspace_salt: String,
}

impl Reducer {
    pub fn new(threshold: u32, workspace_salt: String) -> Self {
        Self {
            threshold,
            workspace_salt,
        }
    }

    /// Apply one accepted event. Returns any chapters it closed, in close
    /// order.
    pub fn reduce(
        &self,
        world: &mut WorldState,
        book: &mut ChapterBook,
        event: &TelemetryEvent,
    ) -> Vec<ChapterSummary> {
        let mut closed = Vec::new();

        {
            let run = world.ensure_run(&event.run);
            run.last_ts = Some(event.ts.clone());
            run.event_count += 1;
        }
        world.counters.events += 1;
        world.updated_at = event.ts.clone();

        match event.name.as_str() {
            TURN_STARTED => {
                // A new start interrupts whatever was open.
                if let Some(summary) = self.close_chapter(
                    world,
                    book,
                    &event.run,
                    ChapterStatus::Interrupted,
                    &event.ts,
                    event.seq,
                ) {
                    closed.push(summary);
                }
                let turn_index = {
                    let run = world.ensure_run(&event.run);
                    run.chapter_count += 1;
                    run.chapter_count
                };
                book.open_chapter(OpenChapter::open(
                    &event.run,
                    turn_index,
                    &event.ts,
                    event.seq,
                    derive_title(event),
                    1,
                ));
            }
            TURN_COMPLETED => {
                if let Some(summary) = self.close_chapter(
                    world,
                    book,
                    &event.run,
                    ChapterStatus::Completed,
                    &event.ts,
                    event.seq,
                ) {
                    closed.push(summary);
                }
            }
            TURN_FAILED => {
                if let Some(summary) = self.close_chapter(
                    world,
                    book,
                    &event.run,
                    ChapterStatus::Failed,
                    &event.ts,
                    event.seq,
                ) {
                    closed.push(summary);
                }
            }
            _ => self.fold_into_chapter(world, book, event),
        }

        closed
    }

    fn close_chapter(
        &self,
        world: &mut WorldState,
        book: &mut ChapterBook,
        run_id: &str,
        status: ChapterStatus,
        completed_ts: &str,
        seq_end: i64,
    ) -> Option<ChapterSummary> {
        let open = book.take_open(run_id)?;
        let summary = open.close(status, completed_ts, seq_end, self.threshold);
        world.counters.chapters += 1;
        book.record_closed(summary.clone());
        Some(summary)
    }

    /// Non-turn events land in the open chapter, opening one implicitly.
    fn fold_into_chapter(
        &self,
        world: &mut WorldState,
        book: &mut ChapterBook,
        event: &TelemetryEvent,
    ) {
        if book.open_for(&event.run).is_none() {
            let turn_index = {
                let run = world.ensure_run(&event.run);
                run.chapter_count += 1;
                run.chapter_count
            };
            book.open_chapter(OpenChapter::open(
                &event.run,
                turn_index,
                &event.ts,
                event.seq,
                derive_title(event),
                0,
            ));
        }
        if let Some(chapter) = book.open_for_mut(&event.run) {
            chapter.touch(&event.ts, event.seq);
        }

        if event.is_internal() && event.name == BACKPRESSURE_SUMMARY {
            world.counters.backpressure_summaries += 1;
            if let Some(chapter) = book.open_for_mut(&event.run) {
                chapter.summaries_emitted += 1;
            }
        }

        match event.kind {
            EventKind::Tool => self.reduce_tool(world, book, event),
            EventKind::File => self.reduce_file(world, book, event),
            EventKind::Test => reduce_test(world, book, event),
            // log, git, spawn, metric: no counter side effects beyond the
            // global ones above. turn-kind events with non-boundary names
            // fall through the same way.
            _ => {}
        }

        // An error-kind event or an error-severity event counts once.
        if event.kind == EventKind::Error || event.severity == Some(Severity::Error) {
            world.ensure_run(&event.run).errors += 1;
            if let Some(chapter) = book.open_for_mut(&event.run) {
                chapter.errors += 1;
            }
        }
    }

    fn reduce_tool(&self, world: &mut WorldState, book: &mut ChapterBook, event: &TelemetryEvent) {
        let tool_name = event
            .attr_str("tool_name")
            .or_else(|| event.attr_str("tool"))
            .or_else(|| event.attr_str("adapter_tool"))
            .unwrap_or(&event.name)
            .to_string();

        world.ensure_run(&event.run).tool_invocations += 1;
        let patchling_id = salted_hash(&tool_name, &self.workspace_salt);
        world.patchlings.entry(patchling_id).or_default().invocations += 1;
        if let Some(chapter) = book.open_for_mut(&event.run) {
            *chapter.tools_used.entry(tool_name).or_insert(0) += 1;
        }
    }

    fn reduce_file(&self, world: &mut WorldState, book: &mut ChapterBook, event: &TelemetryEvent) {
        let Some(attrs) = &event.attrs else { return };
        let (path_id, region_id) = resolve_file_ids(attrs);
        let Some(path_id) = path_id else {
            // No path id resolved: skip file accounting entirely.
            return;
        };

        world.ensure_run(&event.run).file_touches += 1;

        if !world.files.contains_key(&path_id) {
            let region = region_id.unwrap_or_else(|| REGION_UNKNOWN.to_string());
            world.regions.entry(region.clone()).or_default().file_count += 1;
            world.files.insert(
                path_id.clone(),
                FileState {
                    region_id: region,
                    touches: 0,
                    last_event: None,
                },
            );
        }

        // The region assigned at first observation, never the incoming one.
        let mut assigned_region = None;
        if let Some(file) = world.files.get_mut(&path_id) {
            file.touches += 1;
            file.last_event = Some(event.name.clone());
            assigned_region = Some(file.region_id.clone());
        }
        if let Some(region) = assigned_region {
            world.regions.entry(region).or_default().touches += 1;
        }

        if let Some(chapter) = book.open_for_mut(&event.run) {
            chapter.files_touched.insert(path_id);
        }
    }
}

fn reduce_test(world: &mut WorldState, book: &mut ChapterBook, event: &TelemetryEvent) {
    let name = event.name.to_ascii_lowercase();
    if name.contains("pass") {
        world.ensure_run(&event.run).tests_passed += 1;
        if let Some(chapter) = book.open_for_mut(&event.run) {
            chapter.tests_passed += 1;
        }
    } else if name.contains("fail") {
        world.ensure_run(&event.run).tests_failed += 1;
        if let Some(chapter) = book.open_for_mut(&event.run) {
            chapter.tests_failed += 1;
        }
    }
}

/// Safe title from redacted attrs: a hashed prompt identifier wins, then a
/// short free-form label. Raw prompt text never reaches this point.
fn derive_title(event: &TelemetryEvent) -> Option<String> {
    for key in ["prompt_hash", "prompt_stable_hash", "prompt_id"] {
        if let Some(value) = event.attr_str(key) {
            return Some(format!("Prompt {value}"));
        }
    }
    for key in ["label", "turn_label"] {
        if let Some(value) = event.attr_str(key) {
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}

/// Scan redacted attrs for the file and region ids. Workspace-stable hashes
/// are preferred so the world's file map aggregates across runs; run-scoped
/// `*path*_hash` keys are the fallback.
fn resolve_file_ids(attrs: &Map<String, Value>) -> (Option<String>, Option<String>) {
    let mut path_id = None;
    let mut region_id = None;

    for (key, value) in attrs {
        let Some(text) = value.as_str() else { continue };
        if path_id.is_none() && key.ends_with("_stable_hash") && !key.ends_with("_stable_dir_hash")
        {
            path_id = Some(text.to_string());
        }
        if region_id.is_none() && key.ends_with("_stable_dir_hash") {
            region_id = Some(text.to_string());
        }
    }

    if path_id.is_none() {
        for (key, value) in attrs {
            let Some(text) = value.as_str() else { continue };
            if key.ends_with("_hash")
                && !key.ends_with("_dir_hash")
                && !key.ends_with("_stable_hash")
                && key.contains("path")
            {
                path_id = Some(text.to_string());
                break;
            }
        }
    }
    if region_id.is_none() {
        for (key, value) in attrs {
            let Some(text) = value.as_str() else { continue };
            if key.ends_with("_dir_hash")
                && !key.ends_with("_stable_dir_hash")
                && key.contains("path")
            {
                region_id = Some(text.to_string());
                break;
            }
        }
    }

    (path_id, region_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const T0: &str = "2026-01-01T00:00:00.000Z";
    const T1: &str = "2026-01-01T00:00:01.000Z";

    fn reducer() -> Reducer {
        Reducer::new(120, "workspace-salt".to_string())
    }

    fn event(run: &str, seq: i64, kind: EventKind, name: &str) -> TelemetryEvent {
        TelemetryEvent {
            v: 1,
            run: run.to_string(),
            seq,
            ts: T0.to_string(),
            kind,
            name: name.to_string(),
            severity: None,
            attrs: None,
            internal: None,
            upstream_seq: None,
            extra: Map::new(),
        }
    }

    fn with_attrs(mut e: TelemetryEvent, attrs: Value) -> TelemetryEvent {
        e.attrs = Some(attrs.as_object().unwrap().clone());
        e
    }

    fn world() -> WorldState {
        WorldState::new("ws".to_string(), T0.to_string())
    }

    #[test]
    fn turn_started_opens_sequential_indexes() {
        let (r, mut w, mut book) = (reducer(), world(), ChapterBook::new(10));
        r.reduce(&mut w, &mut book, &event("run-1", 0, EventKind::Turn, TURN_STARTED));
        assert_eq!(book.open_for("run-1").unwrap().turn_index, 1);
        r.reduce(&mut w, &mut book, &event("run-1", 1, EventKind::Turn, TURN_COMPLETED));
        r.reduce(&mut w, &mut book, &event("run-1", 2, EventKind::Turn, TURN_STARTED));
        assert_eq!(book.open_for("run-1").unwrap().turn_index, 2);
        assert_eq!(w.runs["run-1"].chapter_count, 2);
    }

    #[test]
    fn restart_interrupts_open_chapter() {
        let (r, mut w, mut book) = (reducer(), world(), ChapterBook::new(10));
        r.reduce(&mut w, &mut book, &event("run-1", 0, EventKind::Turn, TURN_STARTED));
        let mut second = event("run-1", 1, EventKind::Turn, TURN_STARTED);
        second.ts = T1.to_string();
        let closed = r.reduce(&mut w, &mut book, &second);
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].status, ChapterStatus::Interrupted);
        assert_eq!(closed[0].seq_end, 1);
        assert_eq!(closed[0].completed_ts, T1);
        assert_eq!(book.open_for("run-1").unwrap().turn_index, 2);
    }

    #[test]
    fn terminal_without_open_chapter_is_noop() {
        let (r, mut w, mut book) = (reducer(), world(), ChapterBook::new(10));
        let closed = r.reduce(&mut w, &mut book, &event("run-1", 0, EventKind::Turn, TURN_COMPLETED));
        assert!(closed.is_empty());
        assert_eq!(w.counters.chapters, 0);
        // The event itself still counts.
        assert_eq!(w.counters.events, 1);
    }

    #[test]
    fn non_turn_event_opens_implicit_chapter() {
        let (r, mut w, mut book) = (reducer(), world(), ChapterBook::new(10));
        r.reduce(&mut w, &mut book, &event("run-1", 3, EventKind::Git, "git.commit"));
        let open = book.open_for("run-1").unwrap();
        assert_eq!(open.turn_index, 1);
        assert_eq!(open.started_seq, 3);
        assert_eq!(open.event_count, 1);
    }

    #[test]
    fn tool_name_resolution_order() {
        let (r, mut w, mut book) = (reducer(), world(), ChapterBook::new(10));
        let e = with_attrs(
            event("run-1", 0, EventKind::Tool, "tool.start"),
            json!({"tool": "fallback", "tool_name": "shell"}),
        );
        r.reduce(&mut w, &mut book, &e);
        let e2 = with_attrs(
            event("run-1", 1, EventKind::Tool, "tool.start"),
            json!({"adapter_tool": "adapter"}),
        );
        r.reduce(&mut w, &mut book, &e2);
        r.reduce(&mut w, &mut book, &event("run-1", 2, EventKind::Tool, "tool.bare"));

        let chapter = book.open_for("run-1").unwrap();
        assert_eq!(chapter.tools_used.get("shell"), Some(&1));
        assert_eq!(chapter.tools_used.get("adapter"), Some(&1));
        assert_eq!(chapter.tools_used.get("tool.bare"), Some(&1));
        assert_eq!(w.runs["run-1"].tool_invocations, 3);
        assert_eq!(
            w.patchlings[&salted_hash("shell", "workspace-salt")].invocations,
            1
        );
    }

    #[test]
    fn file_region_assigned_on_first_observation() {
        let (r, mut w, mut book) = (reducer(), world(), ChapterBook::new(10));
        let first = with_attrs(
            event("run-1", 0, EventKind::File, "file.write"),
            json!({"path_stable_hash": "fff", "path_stable_dir_hash": "ddd"}),
        );
        r.reduce(&mut w, &mut book, &first);
        // Same file reappears claiming a different directory.
        let second = with_attrs(
            event("run-1", 1, EventKind::File, "file.read"),
            json!({"path_stable_hash": "fff", "path_stable_dir_hash": "other"}),
        );
        r.reduce(&mut w, &mut book, &second);

        assert_eq!(w.files["fff"].region_id, "ddd");
        assert_eq!(w.files["fff"].touches, 2);
        assert_eq!(w.files["fff"].last_event.as_deref(), Some("file.read"));
        assert_eq!(w.regions["ddd"].file_count, 1);
        assert_eq!(w.regions["ddd"].touches, 2);
        assert!(!w.regions.contains_key("other"));
        assert_eq!(w.runs["run-1"].file_touches, 2);
    }

    #[test]
    fn file_without_region_lands_in_unknown() {
        let (r, mut w, mut book) = (reducer(), world(), ChapterBook::new(10));
        let e = with_attrs(
            event("run-1", 0, EventKind::File, "file.write"),
            json!({"path_hash": "abc"}),
        );
        r.reduce(&mut w, &mut book, &e);
        assert_eq!(w.files["abc"].region_id, REGION_UNKNOWN);
        assert_eq!(w.regions[REGION_UNKNOWN].file_count, 1);
    }

    #[test]
    fn file_without_path_id_skips_accounting() {
        let (r, mut w, mut book) = (reducer(), world(), ChapterBook::new(10));
        let e = with_attrs(
            event("run-1", 0, EventKind::File, "file.write"),
            json!({"note": "no path here"}),
        );
        r.reduce(&mut w, &mut book, &e);
        assert!(w.files.is_empty());
        assert_eq!(w.runs["run-1"].file_touches, 0);
        // The chapter still counted the event.
        assert_eq!(book.open_for("run-1").unwrap().event_count, 1);
    }

    #[test]
    fn stable_hash_preferred_over_run_hash() {
        let attrs = json!({
            "path_hash": "run-scoped",
            "path_dir_hash": "run-dir",
            "path_stable_hash": "stable",
            "path_stable_dir_hash": "stable-dir",
        });
        let (path, region) = resolve_file_ids(attrs.as_object().unwrap());
        assert_eq!(path.as_deref(), Some("stable"));
        assert_eq!(region.as_deref(), Some("stable-dir"));
    }

    #[test]
    fn run_hash_fallback_requires_path_in_key() {
        let attrs = json!({"file_hash": "x", "file_dir_hash": "y"});
        let (path, region) = resolve_file_ids(attrs.as_object().unwrap());
        assert_eq!(path, None);
        assert_eq!(region, None);

        let attrs = json!({"path_hash": "x", "path_dir_hash": "y"});
        let (path, region) = resolve_file_ids(attrs.as_object().unwrap());
        assert_eq!(path.as_deref(), Some("x"));
        assert_eq!(region.as_deref(), Some("y"));
    }

    #[test]
    fn test_events_count_pass_and_fail() {
        let (r, mut w, mut book) = (reducer(), world(), ChapterBook::new(10));
        r.reduce(&mut w, &mut book, &event("run-1", 0, EventKind::Test, "test.passed"));
        r.reduce(&mut w, &mut book, &event("run-1", 1, EventKind::Test, "test.failed"));
        r.reduce(&mut w, &mut book, &event("run-1", 2, EventKind::Test, "test.skipped"));
        let run = &w.runs["run-1"];
        assert_eq!(run.tests_passed, 1);
        assert_eq!(run.tests_failed, 1);
    }

    #[test]
    fn error_kind_and_severity_count_once() {
        let (r, mut w, mut book) = (reducer(), world(), ChapterBook::new(10));
        // kind=error, no severity
        r.reduce(&mut w, &mut book, &event("run-1", 0, EventKind::Error, "error.tool"));
        // severity=error on a non-error kind
        let mut sev = event("run-1", 1, EventKind::Log, "log.bad");
        sev.severity = Some(Severity::Error);
        r.reduce(&mut w, &mut book, &sev);
        // both at once: still one increment
        let mut both = event("run-1", 2, EventKind::Error, "error.fatal");
        both.severity = Some(Severity::Error);
        r.reduce(&mut w, &mut book, &both);

        assert_eq!(w.runs["run-1"].errors, 3);
        assert_eq!(book.open_for("run-1").unwrap().errors, 3);
    }

    #[test]
    fn title_prefers_prompt_hash_over_label() {
        let (r, mut w, mut book) = (reducer(), world(), ChapterBook::new(10));
        let e = with_attrs(
            event("run-1", 0, EventKind::Turn, TURN_STARTED),
            json!({"label": "friendly", "prompt_hash": "ab12cd34ef56"}),
        );
        r.reduce(&mut w, &mut book, &e);
        assert_eq!(
            book.open_for("run-1").unwrap().title.as_deref(),
            Some("Prompt ab12cd34ef56")
        );
    }

    #[test]
    fn title_falls_back_to_label() {
        let (r, mut w, mut book) = (reducer(), world(), ChapterBook::new(10));
        let e = with_attrs(
            event("run-1", 0, EventKind::Turn, TURN_STARTED),
            json!({"turn_label": "fix the tests"}),
        );
        r.reduce(&mut w, &mut book, &e);
        assert_eq!(
            book.open_for("run-1").unwrap().title.as_deref(),
            Some("fix the tests")
        );
    }

    #[test]
    fn internal_summary_updates_chapter_and_world() {
        let (r, mut w, mut book) = (reducer(), world(), ChapterBook::new(10));
        r.reduce(&mut w, &mut book, &event("run-1", 0, EventKind::Turn, TURN_STARTED));
        let mut summary = event("run-1", 1_000_000_001, EventKind::Metric, BACKPRESSURE_SUMMARY);
        summary.internal = Some(true);
        r.reduce(&mut w, &mut book, &summary);
        assert_eq!(w.counters.backpressure_summaries, 1);
        assert_eq!(book.open_for("run-1").unwrap().summaries_emitted, 1);
    }

    #[test]
    fn world_counters_track_every_accepted_event() {
        let (r, mut w, mut book) = (reducer(), world(), ChapterBook::new(10));
        r.reduce(&mut w, &mut book, &event("run-1", 0, EventKind::Turn, TURN_STARTED));
        r.reduce(&mut w, &mut book, &event("run-1", 1, EventKind::Git, "git.commit"));
        r.reduce(&mut w, &mut book, &event("run-2", 0, EventKind::Spawn, "spawn.agent"));
        assert_eq!(w.counters.events, 3);
        assert_eq!(w.runs["run-1"].event_count, 2);
        assert_eq!(w.runs["run-2"].event_count, 1);
        assert_eq!(w.updated_at, T0);
        assert_eq!(w.runs["run-1"].last_ts.as_deref(), Some(T0));
    }
}
