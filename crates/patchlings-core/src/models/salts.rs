//! The persisted salts document (`salts.json`).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Salt storage: one workspace salt plus lazily minted per-run salts.
/// Created on first use, thereafter read-only for the workspace lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaltsFile {
    pub workspace_salt: String,
    #[serde(default)]
    pub runs: BTreeMap<String, RunSaltEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSaltEntry {
    pub salt: String,
    pub created_at: String,
}
