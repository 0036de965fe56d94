//! Wrappers around the host's own logging channels.
use crate::capture::{CaptureSink, InstallFlag, Interceptor};
use crate::entry::Severity;
use crate::error::Result;
use crate::normalizer::{Arg, Capture};

/// A host logging channel: anything that accepts a severity and arguments.
pub trait LogChannel: Send + Sync {
    /// Emits one call with its arguments.
    fn write(&self, severity: Severity, args: &[Arg]);
}

impl<F> LogChannel for F
where
    F: Fn(Severity, &[Arg]) + Send + Sync,
{
    fn write(&self, severity: Severity, args: &[Arg]) {
        self(severity, args)
    }
}

/// Captures every call, then forwards it untouched to the original channel.
pub struct InterceptedChannel<C> {
    original: C,
    sink: CaptureSink,
    installed: InstallFlag,
}

impl<C: LogChannel> InterceptedChannel<C> {
    /// Wraps `original`. Nothing is captured until the channel is installed.
    pub fn new(original: C, sink: CaptureSink) -> Self {
        Self {
            original,
            sink,
            installed: InstallFlag::default(),
        }
    }

    pub fn trace(&self, args: &[Arg]) {
        self.write(Severity::Trace, args)
    }

    pub fn debug(&self, args: &[Arg]) {
        self.write(Severity::Debug, args)
    }

    pub fn info(&self, args: &[Arg]) {
        self.write(Severity::Info, args)
    }

    pub fn warn(&self, args: &[Arg]) {
        self.write(Severity::Warn, args)
    }

    pub fn error(&self, args: &[Arg]) {
        self.write(Severity::Error, args)
    }

    /// The wrapped channel.
    pub fn original(&self) -> &C {
        &self.original
    }
}

impl<C: LogChannel> LogChannel for InterceptedChannel<C> {
    fn write(&self, severity: Severity, args: &[Arg]) {
        if self.installed.get() {
            self.sink.capture(Capture::new(severity, args.to_vec()));
        }
        self.original.write(severity, args);
    }
}

impl<C: LogChannel> Interceptor for InterceptedChannel<C> {
    fn name(&self) -> &'static str {
        "log-channel"
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::AuxValue;
    use crate::store::LogStore;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    type Calls = Arc<Mutex<Vec<(Severity, Vec<Arg>)>>>;

    fn recording_channel() -> (Calls, impl LogChannel) {
        let calls: Calls = Arc::new(Mutex::new(Vec::new()));
        let sink = calls.clone();
        let channel = move |severity: Severity, args: &[Arg]| {
            sink.lock().unwrap().push((severity, args.to_vec()));
        };
        (calls, channel)
    }

    #[test]
    fn captures_then_forwards_once() {
        let store = Arc::new(LogStore::new(100, None));
        let (calls, original) = recording_channel();
        let channel = InterceptedChannel::new(original, CaptureSink::new(store.clone()));
        channel.install().unwrap();

        let args = vec![
            Arg::text("saving asset"),
            Arg::json(&json!({"id": 7})),
            Arg::text("retry"),
        ];
        channel.info(&args);

        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].message, "saving asset");
        assert_eq!(
            snapshot[0].auxiliary,
            vec![AuxValue::Json(json!({"id": 7})), AuxValue::Text("retry".into())]
        );

        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0], (Severity::Info, args));
    }

    #[test]
    fn uninstalled_channel_still_forwards() {
        let store = Arc::new(LogStore::new(100, None));
        let (calls, original) = recording_channel();
        let channel = InterceptedChannel::new(original, CaptureSink::new(store.clone()));

        channel.warn(&[Arg::text("not captured")]);
        channel.install().unwrap();
        channel.uninstall();
        channel.error(&[Arg::text("still not captured")]);

        assert!(store.is_empty());
        assert_eq!(calls.lock().unwrap().len(), 2);
    }

    #[test]
    fn channel_logging_from_a_subscriber_does_not_recurse() {
        let store = Arc::new(LogStore::new(100, None));
        let (calls, original) = recording_channel();
        let channel = Arc::new(InterceptedChannel::new(original, CaptureSink::new(store.clone())));
        channel.install().unwrap();

        let inner = channel.clone();
        store
            .subscribe(move |snapshot| {
                if !snapshot.is_empty() {
                    inner.debug(&[Arg::text("viewer refreshed")]);
                }
            })
            .detach();

        channel.info(&[Arg::text("hello")]);
        assert_eq!(store.len(), 1);
        // Both calls reached the original channel.
        assert_eq!(calls.lock().unwrap().len(), 2);
    }
}
