//! Salt management.
//!
//! Precedence at construction: a fixed-salt configuration is used verbatim;
//! else a persisted `salts.json` is loaded; else a fresh workspace salt is
//! generated and persisted. Run salts are minted lazily on first request
//! and flushed to storage at batch boundaries. Identifiers stay stable
//! across restarts because salts, once written, are never regenerated.

use std::collections::BTreeMap;

use chrono::{SecondsFormat, Utc};
use rand::rngs::OsRng;
use rand::RngCore;

use patchlings_core::config::FixedSalts;
use patchlings_core::errors::StorageError;
use patchlings_core::models::salts::{RunSaltEntry, SaltsFile};
use patchlings_core::traits::StoryStore;

const SALT_BYTES: usize = 16;

/// Owns the workspace salt and the run-salt map for one engine instance.
pub struct SaltManager {
    workspace_salt: String,
    runs: BTreeMap<String, RunSaltEntry>,
    fixed_runs: BTreeMap<String, String>,
    dirty: bool,
}

impl SaltManager {
    /// Resolve salts per the precedence above. Generating a fresh workspace
    /// salt marks the manager dirty so the first batch persists it.
    pub fn load(
        store: &dyn StoryStore,
        fixed: Option<&FixedSalts>,
    ) -> Result<Self, StorageError> {
        if let Some(fixed) = fixed {
            return Ok(Self {
                workspace_salt: fixed.workspace.clone(),
                runs: BTreeMap::new(),
                fixed_runs: fixed.runs.clone(),
                dirty: false,
            });
        }

        if let Some(persisted) = store.load_salts()? {
            return Ok(Self {
                workspace_salt: persisted.workspace_salt,
                runs: persisted.runs,
                fixed_runs: BTreeMap::new(),
                dirty: false,
            });
        }

        Ok(Self {
            workspace_salt: generate_salt(),
            runs: BTreeMap::new(),
            fixed_runs: BTreeMap::new(),
            dirty: true,
        })
    }

    pub fn workspace_salt(&self) -> &str {
        &self.workspace_salt
    }

    /// The salt for a run, minting one on first request.
    pub fn run_salt(&mut self, run_id: &str) -> String {
        if let Some(entry) = self.runs.get(run_id) {
            return entry.salt.clone();
        }
        let salt = self
            .fixed_runs
            .get(run_id)
            .cloned()
            .unwrap_or_else(generate_salt);
        self.runs.insert(
            run_id.to_string(),
            RunSaltEntry {
                salt: salt.clone(),
                created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            },
        );
        self.dirty = true;
        salt
    }

    /// If anything was minted since the last call, return the document to
    /// persist and clear the dirty flag.
    pub fn take_dirty(&mut self) -> Option<SaltsFile> {
        if !self.dirty {
            return None;
        }
        self.dirty = false;
        Some(SaltsFile {
            workspace_salt: self.workspace_salt.clone(),
            runs: self.runs.clone(),
        })
    }
}

/// 16 random bytes from the OS entropy source, hex-encoded.
fn generate_salt() -> String {
    let mut bytes = [0u8; SALT_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}
