//! Persistence trait implemented by the storage crate.
//!
//! Defined here so the engine depends on the contract, not a backend.
//! `world.json` and `salts.json` are overwrite documents; chapters and
//! recordings are append-only.

use crate::errors::StorageError;
use crate::models::chapter::ChapterSummary;
use crate::models::salts::SaltsFile;
use crate::models::world::WorldState;

/// Durable storage for one workspace's story artifacts.
///
/// Implementations must keep appends ordered per file; the engine guarantees
/// a single writer.
pub trait StoryStore: Send + Sync {
    fn load_world(&self) -> Result<Option<WorldState>, StorageError>;

    fn load_salts(&self) -> Result<Option<SaltsFile>, StorageError>;

    /// The last `limit` chapter summaries, oldest first.
    fn load_recent_chapters(&self, limit: usize) -> Result<Vec<ChapterSummary>, StorageError>;

    fn write_world(&self, world: &WorldState) -> Result<(), StorageError>;

    fn append_chapter(&self, chapter: &ChapterSummary) -> Result<(), StorageError>;

    /// Append one serialized event line to the named recording file.
    fn append_recording(&self, file_name: &str, line: &str) -> Result<(), StorageError>;

    fn write_salts(&self, salts: &SaltsFile) -> Result<(), StorageError>;
}
