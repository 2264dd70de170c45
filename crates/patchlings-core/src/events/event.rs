//! The v1 telemetry event as it appears on the wire.

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Categorical event kinds. Lowercase on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Turn,
    Tool,
    File,
    Git,
    Test,
    Spawn,
    Log,
    Error,
    Metric,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Turn => "turn",
            Self::Tool => "tool",
            Self::File => "file",
            Self::Git => "git",
            Self::Test => "test",
            Self::Spawn => "spawn",
            Self::Log => "log",
            Self::Error => "error",
            Self::Metric => "metric",
        }
    }
}

/// Event severity. Lowercase on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Debug,
    Info,
    Warn,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// A single telemetry record conforming to the v1 schema.
///
/// Unknown top-level fields survive a round-trip via the flattened `extra`
/// map, so newer producers stay readable by this engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    /// Schema version. Always 1.
    pub v: u32,
    /// Run identifier. Non-empty.
    pub run: String,
    /// Source-assigned sequence number, monotonically increasing per run.
    pub seq: i64,
    /// RFC-3339 timestamp. Kept as a string so replays are byte-stable.
    pub ts: String,
    pub kind: EventKind,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attrs: Option<Map<String, Value>>,
    /// Set on events synthesized by the engine itself.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub internal: Option<bool>,
    /// For synthesized events: the highest external seq ingested at the time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream_seq: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TelemetryEvent {
    /// Parse `ts` to epoch milliseconds. `None` only for records that
    /// bypassed validation.
    pub fn ts_millis(&self) -> Option<i64> {
        DateTime::parse_from_rfc3339(&self.ts)
            .ok()
            .map(|dt| dt.timestamp_millis())
    }

    /// The sequence number used for deduplication: `upstream_seq` when
    /// present, else `seq`.
    pub fn upstream_or_seq(&self) -> i64 {
        self.upstream_seq.unwrap_or(self.seq)
    }

    /// Whether this event was synthesized by the engine.
    pub fn is_internal(&self) -> bool {
        self.internal == Some(true)
    }

    /// Low-value events are eligible for backpressure folding: any log-kind
    /// event, any debug-severity event, or any event whose name contains
    /// progress/delta/heartbeat.
    pub fn is_low_value(&self) -> bool {
        if self.kind == EventKind::Log || self.severity == Some(Severity::Debug) {
            return true;
        }
        let name = self.name.to_ascii_lowercase();
        name.contains("progress") || name.contains("delta") || name.contains("heartbeat")
    }

    /// Look up a string attribute.
    pub fn attr_str(&self, key: &str) -> Option<&str> {
        self.attrs.as_ref()?.get(key)?.as_str()
    }
}
