//! This module provides a `tracing` layer that captures every event recorded
//! through the host's `tracing` subscriber.
//!
//! The layer is composed next to the host's own layers, so formatting and
//! any other output keep happening exactly as before.
use crate::capture::{CaptureSink, Interceptor};
use crate::entry::Severity;
use crate::error::Result;
use crate::normalizer::{Arg, Capture};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{Event, Subscriber};
use tracing_subscriber::{layer::Context, registry::LookupSpan, Layer};

/// A `tracing` layer that feeds events into the capture pipeline.
#[derive(Clone)]
pub struct CaptureLayer {
    sink: CaptureSink,
    installed: Arc<AtomicBool>,
}

impl CaptureLayer {
    /// Creates a new `CaptureLayer`, initially uninstalled.
    pub fn new(sink: CaptureSink) -> Self {
        Self {
            sink,
            installed: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl Interceptor for CaptureLayer {
    fn name(&self) -> &'static str {
        "tracing"
    }

    fn install(&self) -> Result<()> {
        self.installed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn uninstall(&self) {
        self.installed.store(false, Ordering::SeqCst);
    }

    fn is_installed(&self) -> bool {
        self.installed.load(Ordering::SeqCst)
    }
}

impl<S> Layer<S> for CaptureLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    /// Handles a `tracing` event.
    ///
    /// The `message` field becomes the entry message; every other field is
    /// appended as a named auxiliary value in recorded order, followed by
    /// the event target and the names of the enclosing spans.
    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        if !self.installed.load(Ordering::SeqCst) {
            return;
        }

        let metadata = event.metadata();

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let mut capture = Capture::new(
            Severity::from(*metadata.level()),
            vec![Arg::Text(visitor.message.unwrap_or_default())],
        );
        for (name, value) in visitor.fields {
            capture = capture.with_field(name, value);
        }
        capture = capture.with_field("target", metadata.target());

        if let Some(scope) = ctx.event_scope(event) {
            let spans: Vec<&str> = scope.from_root().map(|span| span.name()).collect();
            if !spans.is_empty() {
                capture = capture.with_field("spans", spans.join(":"));
            }
        }

        if let (Some(file), Some(line)) = (metadata.file(), metadata.line()) {
            capture = capture.with_location(format!("{}:{}", file, line));
        }

        self.sink.capture(capture);
    }
}

/// A `tracing::field::Visit` implementation splitting the message from the other fields.
#[derive(Default)]
struct FieldVisitor {
    message: Option<String>,
    fields: Vec<(String, String)>,
}

impl FieldVisitor {
    fn push(&mut self, field: &tracing::field::Field, value: String) {
        if field.name() == "message" {
            self.message = Some(value);
        } else {
            self.fields.push((field.name().to_string(), value));
        }
    }
}

impl tracing::field::Visit for FieldVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        self.push(field, format!("{:?}", value));
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.push(field, value.to_string());
    }

    fn record_i64(&mut self, field: &tracing::field::Field, value: i64) {
        self.push(field, value.to_string());
    }

    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        self.push(field, value.to_string());
    }

    fn record_bool(&mut self, field: &tracing::field::Field, value: bool) {
        self.push(field, value.to_string());
    }

    fn record_error(
        &mut self,
        field: &tracing::field::Field,
        value: &(dyn std::error::Error + 'static),
    ) {
        self.push(field, value.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::AuxValue;
    use crate::store::LogStore;
    use tracing_subscriber::layer::SubscriberExt;

    #[test]
    fn captures_message_fields_and_target() {
        let store = Arc::new(LogStore::new(100, None));
        let layer = CaptureLayer::new(CaptureSink::new(store.clone()));
        layer.install().unwrap();

        let subscriber = tracing_subscriber::registry().with(layer.clone());
        tracing::subscriber::with_default(subscriber, || {
            let span = tracing::info_span!("import");
            let _entered = span.enter();
            tracing::warn!(asset = "cat.png", bytes = 42_u64, "thumbnail missing");
        });

        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 1);
        let entry = &snapshot[0];
        assert_eq!(entry.severity, Severity::Warn);
        assert_eq!(entry.message, "thumbnail missing");
        assert_eq!(
            &entry.auxiliary[..4],
            &[
                AuxValue::Field {
                    name: "asset".into(),
                    value: "cat.png".into()
                },
                AuxValue::Field {
                    name: "bytes".into(),
                    value: "42".into()
                },
                AuxValue::Field {
                    name: "target".into(),
                    value: module_path!().into()
                },
                AuxValue::Field {
                    name: "spans".into(),
                    value: "import".into()
                },
            ]
        );
        assert!(matches!(entry.auxiliary.last(), Some(AuxValue::Location(_))));
    }

    #[test]
    fn uninstalled_layer_records_nothing() {
        let store = Arc::new(LogStore::new(100, None));
        let layer = CaptureLayer::new(CaptureSink::new(store.clone()));

        let subscriber = tracing_subscriber::registry().with(layer);
        tracing::subscriber::with_default(subscriber, || {
            tracing::error!("ignored");
        });
        assert!(store.is_empty());
    }

    #[test]
    fn events_from_subscribers_are_not_recaptured() {
        let store = Arc::new(LogStore::new(100, None));
        let layer = CaptureLayer::new(CaptureSink::new(store.clone()));
        layer.install().unwrap();
        store
            .subscribe(|snapshot| {
                tracing::debug!(count = snapshot.len(), "viewer refreshed");
            })
            .detach();

        let subscriber = tracing_subscriber::registry().with(layer);
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("one");
            tracing::info!("two");
        });
        assert_eq!(store.len(), 2);
    }
}
