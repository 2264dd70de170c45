//! In-memory story store for the `memory` storage mode and for tests.

use std::collections::BTreeMap;
use std::sync::Mutex;

use patchlings_core::errors::StorageError;
use patchlings_core::models::chapter::ChapterSummary;
use patchlings_core::models::salts::SaltsFile;
use patchlings_core::models::world::WorldState;
use patchlings_core::traits::StoryStore;

#[derive(Default)]
struct MemoryInner {
    world: Option<WorldState>,
    salts: Option<SaltsFile>,
    chapters: Vec<ChapterSummary>,
    recordings: BTreeMap<String, Vec<String>>,
}

/// Story store that never touches disk. Contents are inspectable, which the
/// persistence tests rely on.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded lines for a file, for assertions.
    pub fn recording_lines(&self, file_name: &str) -> Vec<String> {
        let inner = self.inner.lock().expect("memory store poisoned");
        inner.recordings.get(file_name).cloned().unwrap_or_default()
    }

    /// All chapter lines ever appended, in order.
    pub fn chapter_count(&self) -> usize {
        self.inner.lock().expect("memory store poisoned").chapters.len()
    }
}

impl StoryStore for MemoryStore {
    fn load_world(&self) -> Result<Option<WorldState>, StorageError> {
        Ok(self.inner.lock().expect("memory store poisoned").world.clone())
    }

    fn load_salts(&self) -> Result<Option<SaltsFile>, StorageError> {
        Ok(self.inner.lock().expect("memory store poisoned").salts.clone())
    }

    fn load_recent_chapters(&self, limit: usize) -> Result<Vec<ChapterSummary>, StorageError> {
        let inner = self.inner.lock().expect("memory store poisoned");
        let start = inner.chapters.len().saturating_sub(limit);
        Ok(inner.chapters[start..].to_vec())
    }

    fn write_world(&self, world: &WorldState) -> Result<(), StorageError> {
        self.inner.lock().expect("memory store poisoned").world = Some(world.clone());
        Ok(())
    }

    fn append_chapter(&self, chapter: &ChapterSummary) -> Result<(), StorageError> {
        self.inner
            .lock()
            .expect("memory store poisoned")
            .chapters
            .push(chapter.clone());
        Ok(())
    }

    fn append_recording(&self, file_name: &str, line: &str) -> Result<(), StorageError> {
        self.inner
            .lock()
            .expect("memory store poisoned")
            .recordings
            .entry(file_name.to_string())
            .or_default()
            .push(line.to_string());
        Ok(())
    }

    fn write_salts(&self, salts: &SaltsFile) -> Result<(), StorageError> {
        self.inner.lock().expect("memory store poisoned").salts = Some(salts.clone());
        Ok(())
    }
}
