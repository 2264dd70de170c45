//! The `.patchlings/` directory layout.
//!
//! ```text
//! <root>/<dir>/world.json        overwritten every batch
//! <root>/<dir>/chapters.ndjson   append-only
//! <root>/<dir>/salts.json        rewritten when a run salt is minted
//! <root>/<dir>/recordings/       per-run jsonl, size-rotated
//! ```

use std::path::{Path, PathBuf};

/// Resolved locations of a workspace's story artifacts.
#[derive(Debug, Clone)]
pub struct StoryPaths {
    root: PathBuf,
    patchlings_dir: PathBuf,
}

impl StoryPaths {
    pub fn new(root: &Path, dir_name: &str) -> Self {
        Self {
            root: root.to_path_buf(),
            patchlings_dir: root.join(dir_name),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn patchlings_dir(&self) -> &Path {
        &self.patchlings_dir
    }

    /// The directory holding the story artifacts (world + chapters).
    pub fn story_dir(&self) -> &Path {
        &self.patchlings_dir
    }

    pub fn recordings_dir(&self) -> PathBuf {
        self.patchlings_dir.join("recordings")
    }

    pub fn world_file(&self) -> PathBuf {
        self.patchlings_dir.join("world.json")
    }

    pub fn chapters_file(&self) -> PathBuf {
        self.patchlings_dir.join("chapters.ndjson")
    }

    pub fn salts_file(&self) -> PathBuf {
        self.patchlings_dir.join("salts.json")
    }

    pub fn recording_file(&self, file_name: &str) -> PathBuf {
        self.recordings_dir().join(file_name)
    }
}

/// Recording file name for a run at a rotation index.
/// Index 0 has no suffix: `<run>.jsonl`, then `<run>-1.jsonl`, ...
pub fn recording_file_name(run_id: &str, index: u32) -> String {
    if index == 0 {
        format!("{run_id}.jsonl")
    } else {
        format!("{run_id}-{index}.jsonl")
    }
}
