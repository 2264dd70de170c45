//! Privacy-preserving attribute redaction.
//!
//! A pure transform over event attributes, parameterized by the run salt
//! and optionally the workspace salt. Rules apply in order:
//!
//! 1. keys matching a secret marker are dropped unconditionally;
//! 2. already-hashed keys (`*_hash*`) pass primitives through unchanged;
//! 3. content keys are dropped unless the content gate is open;
//! 4. path-like string values are replaced with salted hashes;
//! 5. remaining primitive scalars pass through, nested values are dropped.
//!
//! Running the transform twice with the same salts yields the same output.

use serde_json::{Map, Value};

use patchlings_core::events::TelemetryEvent;
use patchlings_core::hashing::{hash_dir, hash_path};

/// Case-insensitive substrings that mark a key as secret-bearing.
const SECRET_MARKERS: [&str; 10] = [
    "token",
    "secret",
    "authorization",
    "cookie",
    "header",
    "password",
    "api_key",
    "api-key",
    "apikey",
    "session",
];

/// Keys whose values are free-form content, dropped unless allowed.
const CONTENT_KEYS: [&str; 12] = [
    "prompt", "content", "body", "payload", "stdin", "stdout", "stderr", "command", "args",
    "arg", "diff", "patch",
];

/// Keys whose string values are treated as filesystem paths.
const PATH_KEYS: [&str; 8] = [
    "path",
    "file",
    "file_name",
    "cwd",
    "workspace",
    "repo",
    "target",
    "source",
];

/// Attribute redactor. Construct once per engine; `allow_content` is
/// resolved at construction and never re-read.
#[derive(Debug, Clone, Copy)]
pub struct Redactor {
    allow_content: bool,
}

impl Redactor {
    pub fn new(allow_content: bool) -> Self {
        Self { allow_content }
    }

    /// Redact an event's attributes, leaving every other field untouched.
    pub fn redact_event(
        &self,
        event: &TelemetryEvent,
        run_salt: &str,
        workspace_salt: Option<&str>,
    ) -> TelemetryEvent {
        let mut out = event.clone();
        if let Some(attrs) = &event.attrs {
            out.attrs = Some(self.redact_attrs(attrs, run_salt, workspace_salt));
        }
        out
    }

    /// Redact a flat attribute map.
    pub fn redact_attrs(
        &self,
        attrs: &Map<String, Value>,
        run_salt: &str,
        workspace_salt: Option<&str>,
    ) -> Map<String, Value> {
        let mut out = Map::new();
        for (key, value) in attrs {
            let lower = key.to_ascii_lowercase();

            if SECRET_MARKERS.iter().any(|m| lower.contains(m)) {
                continue;
            }

            if lower.contains("_hash") {
                if is_primitive(value) {
                    out.insert(key.clone(), value.clone());
                }
                continue;
            }

            if CONTENT_KEYS.contains(&lower.as_str()) && !self.allow_content {
                continue;
            }

            if PATH_KEYS.contains(&lower.as_str()) {
                if let Some(path) = value.as_str() {
                    out.insert(format!("{key}_hash"), hash_path(path, run_salt).into());
                    out.insert(format!("{key}_dir_hash"), hash_dir(path, run_salt).into());
                    if let Some(ws) = workspace_salt {
                        out.insert(format!("{key}_stable_hash"), hash_path(path, ws).into());
                        out.insert(format!("{key}_stable_dir_hash"), hash_dir(path, ws).into());
                    }
                    if self.allow_content {
                        out.insert(key.clone(), value.clone());
                    }
                    continue;
                }
            }

            if is_primitive(value) {
                out.insert(key.clone(), value.clone());
            }
        }
        out
    }
}

fn is_primitive(value: &Value) -> bool {
    !(value.is_object() || value.is_array())
}
