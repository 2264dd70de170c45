//! Salted identifier hashing.
//!
//! Every id that leaves the engine (workspace, file, region, patchling) is
//! `sha256(salt || "|" || value)` truncated to 12 hex characters. Paths are
//! normalized before hashing so `./a/b` and `a/b` produce the same id.

use sha2::{Digest, Sha256};

/// Length of a truncated identifier in hex characters.
pub const ID_HEX_LEN: usize = 12;

/// Region id assigned to files whose directory could not be resolved.
pub const REGION_UNKNOWN: &str = "region.unknown";

/// Hash a value under a salt: `sha256(salt | value)` truncated to 12 hex chars.
pub fn salted_hash(value: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b"|");
    hasher.update(value.as_bytes());
    let digest = hasher.finalize();
    let mut out = hex::encode(digest);
    out.truncate(ID_HEX_LEN);
    out
}

/// Normalize a path for hashing: forward slashes only, redundant segments
/// collapsed. `..` pops the previous segment when one exists.
pub fn normalize_path(path: &str) -> String {
    let unified = path.replace('\\', "/");
    let mut segments: Vec<&str> = Vec::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.last().is_some_and(|s| *s != "..") {
                    segments.pop();
                } else {
                    segments.push("..");
                }
            }
            other => segments.push(other),
        }
    }
    if segments.is_empty() {
        ".".to_string()
    } else {
        segments.join("/")
    }
}

/// The normalized path minus its final segment, or "." if none remains.
pub fn parent_dir(normalized: &str) -> String {
    match normalized.rsplit_once('/') {
        Some((dir, _)) if !dir.is_empty() => dir.to_string(),
        _ => ".".to_string(),
    }
}

/// Hash a path under a salt, normalizing first.
pub fn hash_path(path: &str, salt: &str) -> String {
    salted_hash(&normalize_path(path), salt)
}

/// Hash the directory of a path under a salt.
pub fn hash_dir(path: &str, salt: &str) -> String {
    salted_hash(&parent_dir(&normalize_path(path)), salt)
}
