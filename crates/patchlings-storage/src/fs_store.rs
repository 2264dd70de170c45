//! Filesystem-backed story store.
//!
//! Overwrite documents are written whole; NDJSON files are opened in append
//! mode per write, which keeps the store stateless and restart-safe. The
//! single-writer discipline lives in [`crate::writer`], not here.

use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use tracing::warn;

use patchlings_core::errors::StorageError;
use patchlings_core::models::chapter::ChapterSummary;
use patchlings_core::models::salts::SaltsFile;
use patchlings_core::models::world::WorldState;
use patchlings_core::traits::StoryStore;

use crate::paths::StoryPaths;

/// Story store rooted at a `.patchlings/` directory.
pub struct FsStore {
    paths: StoryPaths,
}

impl FsStore {
    pub fn new(paths: StoryPaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &StoryPaths {
        &self.paths
    }

    fn ensure_dir(&self, dir: &Path) -> Result<(), StorageError> {
        fs::create_dir_all(dir).map_err(|e| io_err(dir, e))
    }
}

impl StoryStore for FsStore {
    fn load_world(&self) -> Result<Option<WorldState>, StorageError> {
        let path = self.paths.world_file();
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
        let world = serde_json::from_str(&raw).map_err(|e| corrupt(&path, e))?;
        Ok(Some(world))
    }

    fn load_salts(&self) -> Result<Option<SaltsFile>, StorageError> {
        let path = self.paths.salts_file();
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
        let salts = serde_json::from_str(&raw).map_err(|e| corrupt(&path, e))?;
        Ok(Some(salts))
    }

    fn load_recent_chapters(&self, limit: usize) -> Result<Vec<ChapterSummary>, StorageError> {
        let path = self.paths.chapters_file();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let file = fs::File::open(&path).map_err(|e| io_err(&path, e))?;
        let mut chapters: Vec<ChapterSummary> = Vec::new();
        for (line_no, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| io_err(&path, e))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(chapter) => chapters.push(chapter),
                Err(e) => {
                    // A torn tail line from a crash is expected; skip it.
                    warn!(line = line_no + 1, error = %e, "skipping unreadable chapter line");
                }
            }
        }
        if chapters.len() > limit {
            chapters.drain(..chapters.len() - limit);
        }
        Ok(chapters)
    }

    fn write_world(&self, world: &WorldState) -> Result<(), StorageError> {
        self.ensure_dir(self.paths.patchlings_dir())?;
        let path = self.paths.world_file();
        let pretty = serde_json::to_string_pretty(world)?;
        fs::write(&path, pretty + "\n").map_err(|e| io_err(&path, e))
    }

    fn append_chapter(&self, chapter: &ChapterSummary) -> Result<(), StorageError> {
        self.ensure_dir(self.paths.patchlings_dir())?;
        let path = self.paths.chapters_file();
        let line = serde_json::to_string(chapter)?;
        append_line(&path, &line)
    }

    fn append_recording(&self, file_name: &str, line: &str) -> Result<(), StorageError> {
        let dir = self.paths.recordings_dir();
        self.ensure_dir(&dir)?;
        append_line(&self.paths.recording_file(file_name), line)
    }

    fn write_salts(&self, salts: &SaltsFile) -> Result<(), StorageError> {
        self.ensure_dir(self.paths.patchlings_dir())?;
        let path = self.paths.salts_file();
        let pretty = serde_json::to_string_pretty(salts)?;
        fs::write(&path, pretty + "\n").map_err(|e| io_err(&path, e))
    }
}

fn append_line(path: &Path, line: &str) -> Result<(), StorageError> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| io_err(path, e))?;
    file.write_all(line.as_bytes())
        .and_then(|_| file.write_all(b"\n"))
        .map_err(|e| io_err(path, e))
}

fn io_err(path: &Path, e: std::io::Error) -> StorageError {
    StorageError::Io {
        path: path.display().to_string(),
        message: e.to_string(),
    }
}

fn corrupt(path: &Path, e: serde_json::Error) -> StorageError {
    StorageError::Corrupt {
        path: path.display().to_string(),
        message: e.to_string(),
    }
}
