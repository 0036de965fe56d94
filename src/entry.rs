//! This module defines the canonical log entry produced by every capture source.
use chrono::{DateTime, SubsecRound, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// The severity of a captured entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Trace,
    Info,
    Warn,
    Error,
    Debug,
}

impl Severity {
    /// The upper-case label used by the export line format.
    pub fn label(self) -> &'static str {
        match self {
            Severity::Trace => "TRACE",
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
            Severity::Debug => "DEBUG",
        }
    }

    /// Ranks severities from most to least verbose, for filtering.
    ///
    /// `Debug` sits between `Trace` and `Info`, the way `tracing` orders them.
    pub fn rank(self) -> u8 {
        match self {
            Severity::Trace => 0,
            Severity::Debug => 1,
            Severity::Info => 2,
            Severity::Warn => 3,
            Severity::Error => 4,
        }
    }

    /// Parses a label case-insensitively.
    pub fn parse(label: &str) -> Option<Self> {
        match label.to_ascii_lowercase().as_str() {
            "trace" => Some(Severity::Trace),
            "info" => Some(Severity::Info),
            "warn" | "warning" => Some(Severity::Warn),
            "error" => Some(Severity::Error),
            "debug" => Some(Severity::Debug),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl From<tracing::Level> for Severity {
    fn from(level: tracing::Level) -> Self {
        match level {
            tracing::Level::TRACE => Severity::Trace,
            tracing::Level::DEBUG => Severity::Debug,
            tracing::Level::INFO => Severity::Info,
            tracing::Level::WARN => Severity::Warn,
            tracing::Level::ERROR => Severity::Error,
        }
    }
}

/// One opaque secondary value attached to an entry.
///
/// The core never inspects these; viewers decide how to render them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum AuxValue {
    /// A plain string argument.
    Text(String),
    /// A structured argument, already serialized.
    Json(serde_json::Value),
    /// A value that could only be rendered through `Debug`.
    Debug(String),
    /// A named field recorded by a structured logging call.
    Field { name: String, value: String },
    /// Stack or backtrace text.
    Stack(String),
    /// A source location (`file:line:column`).
    Location(String),
    /// An environment or request snapshot taken at capture time.
    Context(serde_json::Value),
}

impl AuxValue {
    /// Renders the value for the single-line export format.
    pub fn render(&self) -> String {
        match self {
            AuxValue::Text(text) | AuxValue::Debug(text) => text.clone(),
            AuxValue::Json(value) | AuxValue::Context(value) => value.to_string(),
            AuxValue::Field { name, value } => format!("{}={}", name, value),
            AuxValue::Stack(stack) => stack.replace('\n', " | "),
            AuxValue::Location(location) => format!("at {}", location),
        }
    }
}

/// Represents a single captured observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Unique id: creation millisecond, a process sequence number and a random suffix.
    pub id: String,
    /// Creation time, serialized as epoch milliseconds.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    /// The primary human-readable message.
    pub message: String,
    /// Secondary values in original order, followed by any context extras.
    pub auxiliary: Vec<AuxValue>,
}

static ENTRY_SEQUENCE: AtomicU64 = AtomicU64::new(0);

impl LogEntry {
    pub(crate) fn new(severity: Severity, message: String, auxiliary: Vec<AuxValue>) -> Arc<Self> {
        let timestamp = Utc::now().trunc_subsecs(3);
        Arc::new(Self {
            id: generate_id(&timestamp),
            timestamp,
            severity,
            message,
            auxiliary,
        })
    }

    /// Epoch milliseconds of the creation time.
    pub fn timestamp_millis(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }
}

fn generate_id(timestamp: &DateTime<Utc>) -> String {
    let sequence = ENTRY_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(char::from)
        .collect();
    format!("{}-{:x}-{}", timestamp.timestamp_millis(), sequence, suffix)
}
