//! Structural validation of raw telemetry records.
//!
//! Adapters call [`validate_event`] on each parsed line before handing the
//! batch to the engine; malformed records never reach the core. The engine
//! re-checks typed events with [`ensure_valid`] as a guard.

use chrono::DateTime;
use serde_json::Value;

use crate::errors::ValidationError;

use super::event::TelemetryEvent;
use super::SCHEMA_VERSION;

const KINDS: [&str; 9] = [
    "turn", "tool", "file", "git", "test", "spawn", "log", "error", "metric",
];
const SEVERITIES: [&str; 4] = ["debug", "info", "warn", "error"];

/// Validate a raw JSON record against the telemetry v1 schema and parse it.
///
/// Unknown top-level fields are preserved unchanged on the returned event.
pub fn validate_event(raw: &Value) -> Result<TelemetryEvent, ValidationError> {
    let obj = raw.as_object().ok_or(ValidationError::NotAnObject)?;

    let v = obj.get("v").ok_or(ValidationError::MissingField { field: "v" })?;
    if v.as_u64() != Some(SCHEMA_VERSION as u64) {
        return Err(ValidationError::UnsupportedVersion { found: v.to_string() });
    }

    let run = require_str(obj, "run")?;
    if run.is_empty() {
        return Err(ValidationError::InvalidField {
            field: "run",
            message: "must be non-empty".to_string(),
        });
    }

    let seq = obj
        .get("seq")
        .ok_or(ValidationError::MissingField { field: "seq" })?
        .as_i64()
        .ok_or_else(|| invalid("seq", "must be an integer"))?;
    if seq < 0 {
        return Err(invalid("seq", "must be non-negative"));
    }

    let ts = require_str(obj, "ts")?;
    if DateTime::parse_from_rfc3339(ts).is_err() {
        return Err(invalid("ts", "must be an ISO-8601 timestamp"));
    }

    let kind = require_str(obj, "kind")?;
    if !KINDS.contains(&kind) {
        return Err(invalid("kind", "unknown kind"));
    }

    let name = require_str(obj, "name")?;
    if name.is_empty() {
        return Err(invalid("name", "must be non-empty"));
    }

    if let Some(severity) = obj.get("severity") {
        let severity = severity
            .as_str()
            .ok_or_else(|| invalid("severity", "must be a string"))?;
        if !SEVERITIES.contains(&severity) {
            return Err(invalid("severity", "unknown severity"));
        }
    }

    if let Some(attrs) = obj.get("attrs") {
        if !attrs.is_object() {
            return Err(invalid("attrs", "must be an object"));
        }
    }

    if let Some(internal) = obj.get("internal") {
        if !internal.is_boolean() {
            return Err(invalid("internal", "must be a boolean"));
        }
    }

    if let Some(upstream) = obj.get("upstream_seq") {
        if upstream.as_i64().is_none() {
            return Err(invalid("upstream_seq", "must be an integer"));
        }
    }

    serde_json::from_value(raw.clone())
        .map_err(|e| invalid("record", &e.to_string()))
}

/// Guard for already-typed events: the checks the type system cannot express.
pub fn ensure_valid(event: &TelemetryEvent) -> Result<(), ValidationError> {
    if event.v != SCHEMA_VERSION {
        return Err(ValidationError::UnsupportedVersion {
            found: event.v.to_string(),
        });
    }
    if event.run.is_empty() {
        return Err(invalid("run", "must be non-empty"));
    }
    if event.seq < 0 {
        return Err(invalid("seq", "must be non-negative"));
    }
    if event.name.is_empty() {
        return Err(invalid("name", "must be non-empty"));
    }
    if event.ts_millis().is_none() {
        return Err(invalid("ts", "must be an ISO-8601 timestamp"));
    }
    Ok(())
}

fn require_str<'a>(
    obj: &'a serde_json::Map<String, Value>,
    field: &'static str,
) -> Result<&'a str, ValidationError> {
    obj.get(field)
        .ok_or(ValidationError::MissingField { field })?
        .as_str()
        .ok_or_else(|| invalid(field, "must be a string"))
}

fn invalid(field: &'static str, message: &str) -> ValidationError {
    ValidationError::InvalidField {
        field,
        message: message.to_string(),
    }
}
