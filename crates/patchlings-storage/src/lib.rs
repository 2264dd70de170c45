//! # patchlings-storage
//!
//! Persistence for the story engine: the `.patchlings/` directory layout,
//! a filesystem store, an in-memory store for tests and the `memory`
//! storage mode, and the dedicated writer thread that serializes all
//! durable writes.

pub mod fs_store;
pub mod memory_store;
pub mod paths;
pub mod writer;

pub use fs_store::FsStore;
pub use memory_store::MemoryStore;
pub use paths::StoryPaths;
pub use writer::{StoryWriter, WriteCommand, WriteStats};
