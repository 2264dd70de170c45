//! Filesystem and in-memory store round-trips.

use std::collections::BTreeMap;

use patchlings_core::models::chapter::{
    BackpressureReport, ChapterStatus, ChapterSummary, TestCounts,
};
use patchlings_core::models::salts::{RunSaltEntry, SaltsFile};
use patchlings_core::models::world::WorldState;
use patchlings_core::traits::StoryStore;
use patchlings_storage::paths::{recording_file_name, StoryPaths};
use patchlings_storage::{FsStore, MemoryStore};

fn summary(run: &str, turn_index: u64) -> ChapterSummary {
    ChapterSummary {
        v: 1,
        run: run.to_string(),
        chapter_id: format!("{run}:{turn_index}"),
        turn_index,
        status: ChapterStatus::Completed,
        started_ts: "2026-01-01T00:00:00.000Z".to_string(),
        completed_ts: "2026-01-01T00:00:01.000Z".to_string(),
        duration_ms: 1000,
        seq_start: 0,
        seq_end: 3,
        files_touched: vec![],
        tools_used: BTreeMap::new(),
        tests: TestCounts::default(),
        errors: 0,
        backpressure: BackpressureReport {
            threshold: 120,
            ..Default::default()
        },
        title: None,
    }
}

#[test]
fn fs_store_world_round_trip() {
    let tmp = tempfile::tempdir().unwrap();
    let store = FsStore::new(StoryPaths::new(tmp.path(), ".patchlings"));

    assert!(store.load_world().unwrap().is_none());

    let mut world = WorldState::new("ws-id".into(), "2026-01-01T00:00:00.000Z".into());
    world.ensure_run("run-1").event_count = 4;
    store.write_world(&world).unwrap();

    let loaded = store.load_world().unwrap().unwrap();
    assert_eq!(loaded, world);

    // Pretty-printed with 2-space indentation.
    let raw = std::fs::read_to_string(tmp.path().join(".patchlings/world.json")).unwrap();
    assert!(raw.starts_with("{\n  \"v\": 1"));
}

#[test]
fn fs_store_chapters_append_in_order() {
    let tmp = tempfile::tempdir().unwrap();
    let store = FsStore::new(StoryPaths::new(tmp.path(), ".patchlings"));

    for i in 1..=5 {
        store.append_chapter(&summary("run-1", i)).unwrap();
    }

    let all = store.load_recent_chapters(100).unwrap();
    assert_eq!(all.len(), 5);
    assert_eq!(
        all.iter().map(|c| c.turn_index).collect::<Vec<_>>(),
        vec![1, 2, 3, 4, 5]
    );

    // Limit keeps the most recent, oldest first.
    let recent = store.load_recent_chapters(2).unwrap();
    assert_eq!(
        recent.iter().map(|c| c.turn_index).collect::<Vec<_>>(),
        vec![4, 5]
    );
}

#[test]
fn fs_store_skips_torn_chapter_line() {
    let tmp = tempfile::tempdir().unwrap();
    let store = FsStore::new(StoryPaths::new(tmp.path(), ".patchlings"));
    store.append_chapter(&summary("run-1", 1)).unwrap();

    // Simulate a crash mid-append.
    use std::io::Write;
    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .open(tmp.path().join(".patchlings/chapters.ndjson"))
        .unwrap();
    file.write_all(b"{\"v\":1,\"run\":\"tr").unwrap();
    drop(file);

    let loaded = store.load_recent_chapters(100).unwrap();
    assert_eq!(loaded.len(), 1);
}

#[test]
fn fs_store_salts_round_trip() {
    let tmp = tempfile::tempdir().unwrap();
    let store = FsStore::new(StoryPaths::new(tmp.path(), ".patchlings"));

    let mut salts = SaltsFile {
        workspace_salt: "abcd".into(),
        runs: BTreeMap::new(),
    };
    salts.runs.insert(
        "run-1".into(),
        RunSaltEntry {
            salt: "eeff".into(),
            created_at: "2026-01-01T00:00:00.000Z".into(),
        },
    );
    store.write_salts(&salts).unwrap();
    assert_eq!(store.load_salts().unwrap().unwrap(), salts);
}

#[test]
fn fs_store_recordings_append_per_file() {
    let tmp = tempfile::tempdir().unwrap();
    let store = FsStore::new(StoryPaths::new(tmp.path(), ".patchlings"));

    let base = recording_file_name("run-1", 0);
    let rotated = recording_file_name("run-1", 1);
    store.append_recording(&base, "{\"seq\":0}").unwrap();
    store.append_recording(&base, "{\"seq\":1}").unwrap();
    store.append_recording(&rotated, "{\"seq\":2}").unwrap();

    let dir = tmp.path().join(".patchlings/recordings");
    let first = std::fs::read_to_string(dir.join("run-1.jsonl")).unwrap();
    assert_eq!(first, "{\"seq\":0}\n{\"seq\":1}\n");
    let second = std::fs::read_to_string(dir.join("run-1-1.jsonl")).unwrap();
    assert_eq!(second, "{\"seq\":2}\n");
}

#[test]
fn memory_store_mirrors_fs_semantics() {
    let store = MemoryStore::new();
    assert!(store.load_world().unwrap().is_none());
    assert!(store.load_salts().unwrap().is_none());

    let world = WorldState::new("ws".into(), "2026-01-01T00:00:00.000Z".into());
    store.write_world(&world).unwrap();
    assert_eq!(store.load_world().unwrap().unwrap(), world);

    for i in 1..=3 {
        store.append_chapter(&summary("run-1", i)).unwrap();
    }
    assert_eq!(store.chapter_count(), 3);
    let recent = store.load_recent_chapters(2).unwrap();
    assert_eq!(
        recent.iter().map(|c| c.turn_index).collect::<Vec<_>>(),
        vec![2, 3]
    );

    store.append_recording("run-1.jsonl", "line-a").unwrap();
    store.append_recording("run-1.jsonl", "line-b").unwrap();
    assert_eq!(store.recording_lines("run-1.jsonl"), vec!["line-a", "line-b"]);
}
