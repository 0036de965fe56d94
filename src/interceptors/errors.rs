//! The host's global error-notification channel.
//!
//! Hosts forward every error event they observe through `dispatch`. Events
//! whose target is a content-loading element are recorded as resource-load
//! failures; everything else is recorded as an uncaught exception.
use crate::capture::{CaptureSink, InstallFlag, Interceptor};
use crate::entry::{LogEntry, Severity};
use crate::error::Result;
use crate::normalizer::{Arg, Capture};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// The element an error event was raised on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventTarget {
    /// Lower-case element tag, e.g. `img` or `script`.
    pub tag: String,
    /// The `rel` attribute, used to tell stylesheets from other links.
    pub rel: Option<String>,
    /// The resource reference (`src` or `href`).
    pub reference: Option<String>,
}

impl EventTarget {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            rel: None,
            reference: None,
        }
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn with_rel(mut self, rel: impl Into<String>) -> Self {
        self.rel = Some(rel.into());
        self
    }

    /// The kind of resource this element loads, if it loads one.
    pub fn resource_kind(&self) -> Option<ResourceKind> {
        match self.tag.to_ascii_lowercase().as_str() {
            "img" | "image" => Some(ResourceKind::Image),
            "script" => Some(ResourceKind::Script),
            "link" => match self.rel.as_deref() {
                Some(rel) if rel.eq_ignore_ascii_case("stylesheet") => Some(ResourceKind::Stylesheet),
                Some(_) => None,
                None => Some(ResourceKind::Stylesheet),
            },
            "style" => Some(ResourceKind::Stylesheet),
            "iframe" | "frame" | "embed" | "object" => Some(ResourceKind::Frame),
            "audio" | "video" | "source" => Some(ResourceKind::Media),
            _ => None,
        }
    }
}

/// What a failed element was loading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Image,
    Script,
    Stylesheet,
    Frame,
    Media,
}

impl ResourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Image => "image",
            ResourceKind::Script => "script",
            ResourceKind::Stylesheet => "stylesheet",
            ResourceKind::Frame => "frame",
            ResourceKind::Media => "media",
        }
    }
}

/// One notification on the host's global error channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostErrorEvent {
    pub message: String,
    /// Source file of the failing code.
    pub source: Option<String>,
    pub line: Option<u32>,
    pub column: Option<u32>,
    pub stack: Option<String>,
    pub target: Option<EventTarget>,
}

impl HostErrorEvent {
    /// An uncaught error with a message and no element target.
    pub fn exception(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    /// A failed resource load on `target`.
    pub fn resource(target: EventTarget) -> Self {
        Self {
            target: Some(target),
            ..Self::default()
        }
    }

    /// Sets the source position of the failing code.
    pub fn at(mut self, source: impl Into<String>, line: u32, column: u32) -> Self {
        self.source = Some(source.into());
        self.line = Some(line);
        self.column = Some(column);
        self
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    fn location(&self) -> Option<String> {
        let source = self.source.as_deref()?;
        Some(match (self.line, self.column) {
            (Some(line), Some(column)) => format!("{}:{}:{}", source, line, column),
            (Some(line), None) => format!("{}:{}", source, line),
            _ => source.to_string(),
        })
    }
}

/// Receives host error events and records them.
pub struct ErrorEventInterceptor {
    sink: CaptureSink,
    installed: InstallFlag,
}

impl ErrorEventInterceptor {
    pub fn new(sink: CaptureSink) -> Self {
        Self {
            sink,
            installed: InstallFlag::default(),
        }
    }

    /// Records `event`. Returns the entry, or `None` when not installed or dropped.
    pub fn dispatch(&self, event: &HostErrorEvent) -> Option<Arc<LogEntry>> {
        if !self.installed.get() {
            return None;
        }

        let resource = event
            .target
            .as_ref()
            .and_then(|target| target.resource_kind().map(|kind| (kind, target)));

        let capture = match resource {
            Some((kind, target)) => {
                let reference = target.reference.as_deref().unwrap_or("<unknown>");
                Capture::new(
                    Severity::Error,
                    vec![Arg::Text(format!("Resource failed to load: {}", reference))],
                )
                .with_field("resource", kind.as_str())
                .with_field("element", target.tag.clone())
            }
            None => {
                let message = if event.message.is_empty() {
                    "Uncaught error".to_string()
                } else {
                    format!("Uncaught error: {}", event.message)
                };
                let mut capture = Capture::new(Severity::Error, vec![Arg::Text(message)]);
                if let Some(location) = event.location() {
                    capture = capture.with_location(location);
                }
                if let Some(stack) = &event.stack {
                    capture = capture.with_stack(stack.clone());
                }
                capture
            }
        };

        self.sink.capture(capture)
    }
}

impl Interceptor for ErrorEventInterceptor {
    fn name(&self) -> &'static str {
        "error-events"
    }

    fn install(&self) -> Result<()> {
        self.installed.set(true);
        Ok(())
    }

    fn uninstall(&self) {
        self.installed.set(false);
    }

    fn is_installed(&self) -> bool {
        self.installed.get()
    }
}
