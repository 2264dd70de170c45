//! Engine configuration.
//!
//! All knobs arrive through [`EngineOptions`] at construction; the single
//! environment variable `PATCHLINGS_ALLOW_CONTENT` supplies the default for
//! the content gate. Options are read once — event processing never consults
//! mutable process-wide state.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Environment variable that sets the global `allow_content` default.
pub const ALLOW_CONTENT_ENV: &str = "PATCHLINGS_ALLOW_CONTENT";

/// Where durable artifacts live.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    #[default]
    Fs,
    Memory,
}

/// Pinned salts for deterministic tests and cross-machine stable ids.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedSalts {
    pub workspace: String,
    #[serde(default)]
    pub runs: BTreeMap<String, String>,
}

/// Options for `StoryEngine::create`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineOptions {
    /// Workspace root. Defaults to the current directory.
    pub root: Option<PathBuf>,
    /// Internal directory name. Defaults to ".patchlings".
    pub patchlings_dir: Option<String>,
    /// Events-per-second threshold before low-value folding. Default: 120.
    pub threshold: Option<u32>,
    /// Append accepted events to per-run recordings. Default: false.
    pub record_telemetry: Option<bool>,
    pub storage: Option<StorageMode>,
    /// Closed chapters kept in memory. Default: 500.
    pub max_chapters_in_memory: Option<usize>,
    /// Recording rotation size. Default: 2,000,000 bytes.
    pub max_recording_bytes: Option<u64>,
    /// Override the content gate. Defaults to `PATCHLINGS_ALLOW_CONTENT`.
    pub allow_content: Option<bool>,
    pub fixed_salts: Option<FixedSalts>,
    /// Pins the world's `created_at` for byte-equality tests.
    pub fixed_created_at: Option<String>,
}

impl EngineOptions {
    pub fn effective_root(&self) -> PathBuf {
        self.root
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
    }

    pub fn effective_patchlings_dir(&self) -> String {
        self.patchlings_dir
            .clone()
            .unwrap_or_else(|| ".patchlings".to_string())
    }

    pub fn effective_threshold(&self) -> u32 {
        self.threshold.unwrap_or(120)
    }

    pub fn effective_record_telemetry(&self) -> bool {
        self.record_telemetry.unwrap_or(false)
    }

    pub fn effective_storage(&self) -> StorageMode {
        self.storage.unwrap_or_default()
    }

    pub fn effective_max_chapters_in_memory(&self) -> usize {
        self.max_chapters_in_memory.unwrap_or(500)
    }

    pub fn effective_max_recording_bytes(&self) -> u64 {
        self.max_recording_bytes.unwrap_or(2_000_000)
    }

    /// Resolve the content gate once: explicit option, else environment,
    /// else false. Secret-key redaction is unconditional either way.
    pub fn effective_allow_content(&self) -> bool {
        if let Some(allow) = self.allow_content {
            return allow;
        }
        std::env::var(ALLOW_CONTENT_ENV)
            .map(|v| {
                let v = v.trim().to_ascii_lowercase();
                v == "1" || v == "true" || v == "yes"
            })
            .unwrap_or(false)
    }
}
