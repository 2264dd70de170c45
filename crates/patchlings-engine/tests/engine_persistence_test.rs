//! Engine + filesystem storage: durable artifacts, restart behavior,
//! recording rotation.

use serde_json::{json, Map, Value};

use patchlings_core::config::EngineOptions;
use patchlings_core::events::{EventKind, TelemetryEvent};
use patchlings_engine::StoryEngine;

const T0: &str = "2026-01-01T00:00:00.000Z";

fn ev(seq: i64, ts: &str, kind: EventKind, name: &str) -> TelemetryEvent {
    TelemetryEvent {
        v: 1,
        run: "run-1".to_string(),
        seq,
        ts: ts.to_string(),
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

fn fs_options(root: &std::path::Path) -> EngineOptions {
    EngineOptions {
        root: Some(root.to_path_buf()),
        record_telemetry: Some(true),
        ..Default::default()
    }
}

#[test]
fn batch_writes_world_chapters_salts_and_recordings() {
    let tmp = tempfile::tempdir().unwrap();
    let mut engine = StoryEngine::create(fs_options(tmp.path())).unwrap();

    let result = engine.ingest_batch(vec![
        ev(0, T0, EventKind::Turn, "turn.started"),
        with_attrs(
            ev(1, T0, EventKind::File, "file.write"),
            json!({"path": "src/a.ts"}),
        ),
        ev(2, T0, EventKind::Turn, "turn.completed"),
    ]);
    assert_eq!(result.closed_chapters.len(), 1);

    let dir = tmp.path().join(".patchlings");
    assert!(dir.join("world.json").exists());
    assert!(dir.join("chapters.ndjson").exists());
    assert!(dir.join("salts.json").exists());
    assert!(dir.join("recordings/run-1.jsonl").exists());

    let chapters = std::fs::read_to_string(dir.join("chapters.ndjson")).unwrap();
    assert_eq!(chapters.lines().count(), 1);
    let recording = std::fs::read_to_string(dir.join("recordings/run-1.jsonl")).unwrap();
    assert_eq!(recording.lines().count(), 3);

    let stats = engine.shutdown();
    assert_eq!(stats.failures, 0);
    assert!(stats.worlds_written >= 1);
}

#[test]
fn restart_reloads_world_chapters_and_salts() {
    let tmp = tempfile::tempdir().unwrap();

    let (workspace_salt, run_salt, world_before) = {
        let mut engine = StoryEngine::create(fs_options(tmp.path())).unwrap();
        engine.ingest_batch(vec![
            ev(0, T0, EventKind::Turn, "turn.started"),
            ev(1, T0, EventKind::Turn, "turn.completed"),
            ev(2, T0, EventKind::Turn, "turn.started"),
        ]);
        let salt = engine.get_run_salt("run-1");
        (
            engine.get_workspace_salt().to_string(),
            salt,
            engine.get_world().clone(),
        )
    };

    let mut engine = StoryEngine::create(fs_options(tmp.path())).unwrap();
    // Identifiers survive restarts.
    assert_eq!(engine.get_workspace_salt(), workspace_salt);
    assert_eq!(engine.get_run_salt("run-1"), run_salt);

    let world = engine.get_world();
    assert_eq!(world.workspace_id, world_before.workspace_id);
    assert_eq!(world.created_at, world_before.created_at);
    assert_eq!(world.counters.events, 3);
    // One chapter closed; the chapter open at "crash" time is simply gone.
    assert_eq!(world.counters.chapters, 1);
    let chapters = engine.get_chapters(None);
    assert_eq!(chapters.len(), 1);
    assert_eq!(chapters[0].chapter_id, "run-1:1");
}

#[test]
fn recordings_rotate_at_size_budget() {
    let tmp = tempfile::tempdir().unwrap();
    let options = EngineOptions {
        root: Some(tmp.path().to_path_buf()),
        record_telemetry: Some(true),
        max_recording_bytes: Some(256),
        ..Default::default()
    };
    let mut engine = StoryEngine::create(options).unwrap();

    let events: Vec<TelemetryEvent> = (0..12)
        .map(|seq| ev(seq, T0, EventKind::Git, "git.commit"))
        .collect();
    engine.ingest_batch(events);
    engine.shutdown();

    let dir = tmp.path().join(".patchlings/recordings");
    assert!(dir.join("run-1.jsonl").exists());
    assert!(dir.join("run-1-1.jsonl").exists());

    // Every rotated file stays within the limit, and no line is lost.
    let mut total_lines = 0;
    let mut index = 0u32;
    loop {
        let name = if index == 0 {
            "run-1.jsonl".to_string()
        } else {
            format!("run-1-{index}.jsonl")
        };
        let path = dir.join(name);
        if !path.exists() {
            break;
        }
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.len() as u64 <= 256, "rotated file exceeds limit");
        total_lines += content.lines().count();
        index += 1;
    }
    assert_eq!(total_lines, 12);
}

#[test]
fn memory_mode_persists_nothing_to_disk() {
    let tmp = tempfile::tempdir().unwrap();
    let options = EngineOptions {
        root: Some(tmp.path().to_path_buf()),
        storage: Some(patchlings_core::config::StorageMode::Memory),
        ..Default::default()
    };
    let mut engine = StoryEngine::create(options).unwrap();
    engine.ingest_batch(vec![
        ev(0, T0, EventKind::Turn, "turn.started"),
        ev(1, T0, EventKind::Turn, "turn.completed"),
    ]);
    engine.shutdown();
    assert!(!tmp.path().join(".patchlings").exists());
}
