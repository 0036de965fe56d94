//! Turns the arguments of one interception event into a `LogEntry`.
use crate::entry::{AuxValue, LogEntry, Severity};
use serde::Serialize;
use std::fmt::Debug;
use std::sync::Arc;

/// One positional argument of a captured call.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Text(String),
    Json(serde_json::Value),
    /// Fallback rendering for values that failed to serialize.
    Debug(String),
}

impl Arg {
    pub fn text(text: impl Into<String>) -> Self {
        Arg::Text(text.into())
    }

    /// Serializes `value`, falling back to its `Debug` form when serialization fails.
    pub fn json<T: Serialize + Debug + ?Sized>(value: &T) -> Self {
        match serde_json::to_value(value) {
            Ok(serde_json::Value::String(text)) => Arg::Text(text),
            Ok(json) => Arg::Json(json),
            Err(_) => Arg::Debug(format!("{:?}", value)),
        }
    }

    pub fn debug<T: Debug + ?Sized>(value: &T) -> Self {
        Arg::Debug(format!("{:?}", value))
    }

    fn into_message(self) -> String {
        match self {
            Arg::Text(text) | Arg::Debug(text) => text,
            Arg::Json(json) => json.to_string(),
        }
    }

    fn into_aux(self) -> AuxValue {
        match self {
            Arg::Text(text) => AuxValue::Text(text),
            Arg::Json(json) => AuxValue::Json(json),
            Arg::Debug(text) => AuxValue::Debug(text),
        }
    }
}

impl From<&str> for Arg {
    fn from(text: &str) -> Self {
        Arg::Text(text.to_string())
    }
}

impl From<String> for Arg {
    fn from(text: String) -> Self {
        Arg::Text(text)
    }
}

impl From<serde_json::Value> for Arg {
    fn from(json: serde_json::Value) -> Self {
        Arg::Json(json)
    }
}

/// Contextual extras appended after the positional arguments.
#[derive(Debug, Clone, Default)]
pub struct CaptureContext {
    pub location: Option<String>,
    pub stack: Option<String>,
    pub environment: Option<serde_json::Value>,
    /// Extra named values (e.g. `tracing` fields, request metadata).
    pub fields: Vec<(String, String)>,
}

impl CaptureContext {
    fn is_empty(&self) -> bool {
        self.location.is_none()
            && self.stack.is_none()
            && self.environment.is_none()
            && self.fields.is_empty()
    }
}

/// The raw capture of one interception event.
#[derive(Debug, Clone)]
pub struct Capture {
    pub severity: Severity,
    pub args: Vec<Arg>,
    pub context: CaptureContext,
}

impl Capture {
    pub fn new(severity: Severity, args: Vec<Arg>) -> Self {
        Self {
            severity,
            args,
            context: CaptureContext::default(),
        }
    }

    /// Shorthand for a capture with a single text argument.
    pub fn message(severity: Severity, message: impl Into<String>) -> Self {
        Self::new(severity, vec![Arg::Text(message.into())])
    }

    pub fn with_arg(mut self, arg: impl Into<Arg>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.context.location = Some(location.into());
        self
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.context.stack = Some(stack.into());
        self
    }

    pub fn with_environment(mut self, environment: serde_json::Value) -> Self {
        self.context.environment = Some(environment);
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.fields.push((name.into(), value.into()));
        self
    }
}

/// Builds immutable entries with one stable shape for every source.
#[derive(Debug, Default, Clone, Copy)]
pub struct Normalizer;

impl Normalizer {
    /// Normalizes a capture.
    ///
    /// The first argument becomes the message, the rest become auxiliary
    /// values in order, and context extras trail them as further auxiliary
    /// items: fields, then location, then stack, then environment.
    pub fn normalize(&self, capture: Capture) -> Arc<LogEntry> {
        let Capture {
            severity,
            args,
            context,
        } = capture;

        let mut args = args.into_iter();
        let message = args.next().map(Arg::into_message).unwrap_or_default();
        let mut auxiliary: Vec<AuxValue> = args.map(Arg::into_aux).collect();

        if !context.is_empty() {
            auxiliary.extend(
                context
                    .fields
                    .into_iter()
                    .map(|(name, value)| AuxValue::Field { name, value }),
            );
            if let Some(location) = context.location {
                auxiliary.push(AuxValue::Location(location));
            }
            if let Some(stack) = context.stack {
                auxiliary.push(AuxValue::Stack(stack));
            }
            if let Some(environment) = context.environment {
                auxiliary.push(AuxValue::Context(environment));
            }
        }

        LogEntry::new(severity, message, auxiliary)
    }
}
