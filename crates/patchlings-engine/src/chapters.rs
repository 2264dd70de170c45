//! The chapter book: one open chapter per run, plus the in-memory log of
//! recently closed summaries.

use std::collections::{BTreeMap, VecDeque};

use patchlings_core::models::chapter::{ChapterSummary, OpenChapter};

/// Holds every run's open chapter and the recent closed-summary window.
pub struct ChapterBook {
    open: BTreeMap<String, OpenChapter>,
    recent: VecDeque<ChapterSummary>,
    max_in_memory: usize,
}

impl ChapterBook {
    pub fn new(max_in_memory: usize) -> Self {
        Self {
            open: BTreeMap::new(),
            recent: VecDeque::new(),
            max_in_memory,
        }
    }

    /// Seed the recent window from storage at startup, oldest first.
    pub fn seed_recent(&mut self, chapters: Vec<ChapterSummary>) {
        for chapter in chapters {
            self.record_closed(chapter);
        }
    }

    pub fn open_chapter(&mut self, chapter: OpenChapter) {
        self.open.insert(chapter.run.clone(), chapter);
    }

    pub fn open_for(&self, run_id: &str) -> Option<&OpenChapter> {
        self.open.get(run_id)
    }

    pub fn open_for_mut(&mut self, run_id: &str) -> Option<&mut OpenChapter> {
        self.open.get_mut(run_id)
    }

    /// Remove and return the run's open chapter, if any.
    pub fn take_open(&mut self, run_id: &str) -> Option<OpenChapter> {
        self.open.remove(run_id)
    }

    /// Append a closed summary, trimming to the most recent window.
    pub fn record_closed(&mut self, summary: ChapterSummary) {
        self.recent.push_back(summary);
        while self.recent.len() > self.max_in_memory {
            self.recent.pop_front();
        }
    }

    /// Recent summaries in close order; `limit` keeps the newest.
    pub fn recent(&self, limit: Option<usize>) -> Vec<ChapterSummary> {
        let limit = limit.unwrap_or(self.recent.len());
        let start = self.recent.len().saturating_sub(limit);
        self.recent.iter().skip(start).cloned().collect()
    }

    /// Recent summaries for one run, close order, newest `limit` kept.
    pub fn recent_for_run(&self, run_id: &str, limit: Option<usize>) -> Vec<ChapterSummary> {
        let matching: Vec<ChapterSummary> = self
            .recent
            .iter()
            .filter(|c| c.run == run_id)
            .cloned()
            .collect();
        let limit = limit.unwrap_or(matching.len());
        let start = matching.len().saturating_sub(limit);
        matching[start..].to_vec()
    }
}
