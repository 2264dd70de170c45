//! # patchlings-core
//!
//! Foundation crate for the Patchlings story engine.
//! Defines the telemetry event model and validator, world/chapter/salt
//! models, salted hashing, config, errors, and the storage trait.
//! Every other crate in the workspace depends on this.

pub mod config;
pub mod errors;
pub mod events;
pub mod hashing;
pub mod models;
pub mod tracing;
pub mod traits;

// Re-export the most commonly used types at the crate root.
pub use config::{EngineOptions, FixedSalts, StorageMode};
pub use errors::{StorageError, StoryError, ValidationError};
pub use events::{EventKind, Severity, TelemetryEvent, SCHEMA_VERSION};
pub use models::chapter::{ChapterStatus, ChapterSummary, OpenChapter};
pub use models::salts::SaltsFile;
pub use models::world::WorldState;
pub use traits::StoryStore;
