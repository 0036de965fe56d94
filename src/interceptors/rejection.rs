//! Tracks failures of asynchronous work whose result nobody awaits.
use crate::capture::{CaptureSink, Interceptor};
use crate::entry::Severity;
use crate::error::Result;
use crate::interceptors::panic::panic_message;
use crate::normalizer::{Arg, Capture};
use futures::FutureExt;
use std::error::Error as StdError;
use std::fmt::{Debug, Display};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Records unhandled async failures: `Err` results and panics of detached tasks.
#[derive(Clone)]
pub struct RejectionTracker {
    sink: CaptureSink,
    installed: Arc<AtomicBool>,
}

impl RejectionTracker {
    /// Creates an uninstalled tracker feeding `sink`.
    pub fn new(sink: CaptureSink) -> Self {
        Self {
            sink,
            installed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Spawns `future` detached. An `Err` output or a panic is recorded.
    ///
    /// Must be called within a tokio runtime.
    pub fn spawn_detached<F, T, E>(&self, future: F) -> JoinHandle<()>
    where
        F: Future<Output = std::result::Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Display + Debug + Send + 'static,
    {
        let tracker = self.clone();
        tokio::spawn(async move {
            match AssertUnwindSafe(future).catch_unwind().await {
                Ok(Ok(_)) => {}
                Ok(Err(reason)) => tracker.record_reason(&reason, None),
                Err(payload) => tracker.record_panic(panic_message(payload.as_ref())),
            }
        })
    }

    /// Watches a task handle that will never be awaited elsewhere.
    pub fn watch<T, E>(&self, handle: JoinHandle<std::result::Result<T, E>>) -> JoinHandle<()>
    where
        T: Send + 'static,
        E: Display + Debug + Send + 'static,
    {
        let tracker = self.clone();
        tokio::spawn(async move {
            match handle.await {
                Ok(Ok(_)) => {}
                Ok(Err(reason)) => tracker.record_reason(&reason, None),
                Err(join_error) if join_error.is_panic() => {
                    tracker.record_panic(panic_message(join_error.into_panic().as_ref()))
                }
                // Cancelled tasks did not fail.
                Err(_) => {}
            }
        })
    }

    /// Records an error the host could not hand to anyone, and returns it unchanged.
    pub fn observe<T, E>(&self, result: std::result::Result<T, E>) -> std::result::Result<T, E>
    where
        E: StdError,
    {
        if let Err(reason) = &result {
            self.record_reason(reason, source_chain(reason));
        }
        result
    }

    fn record_reason<E: Display + Debug + ?Sized>(&self, reason: &E, stack: Option<String>) {
        if !self.installed.load(Ordering::SeqCst) {
            return;
        }
        let mut capture = Capture::new(
            Severity::Error,
            vec![
                Arg::Text(format!("Unhandled rejection: {}", reason)),
                Arg::debug(reason),
            ],
        );
        if let Some(stack) = stack {
            capture = capture.with_stack(stack);
        }
        self.sink.capture(capture);
    }

    fn record_panic(&self, message: String) {
        if !self.installed.load(Ordering::SeqCst) {
            return;
        }
        self.sink.capture(
            Capture::new(
                Severity::Error,
                vec![Arg::Text(format!("Unhandled rejection: task panicked: {}", message))],
            )
            .with_field("reason", "panic"),
        );
    }
}

/// Renders the `source()` chain of an error, one cause per line.
fn source_chain(error: &dyn StdError) -> Option<String> {
    let mut causes = Vec::new();
    let mut current = error.source();
    while let Some(cause) = current {
        causes.push(format!("caused by: {}", cause));
        current = cause.source();
    }
    if causes.is_empty() {
        None
    } else {
        Some(causes.join("\n"))
    }
}

impl Interceptor for RejectionTracker {
    fn name(&self) -> &'static str {
        "async-rejections"
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::AuxValue;
    use crate::store::LogStore;
    use std::fmt;

    #[derive(Debug)]
    struct FetchFailed {
        inner: std::io::Error,
    }

    impl fmt::Display for FetchFailed {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "fetch failed")
        }
    }

    impl StdError for FetchFailed {
        fn source(&self) -> Option<&(dyn StdError + 'static)> {
            Some(&self.inner)
        }
    }

    fn tracker() -> (Arc<LogStore>, RejectionTracker) {
        let store = Arc::new(LogStore::new(100, None));
        let tracker = RejectionTracker::new(CaptureSink::new(store.clone()));
        tracker.install().unwrap();
        (store, tracker)
    }

    #[tokio::test]
    async fn detached_error_is_recorded() {
        let (store, tracker) = tracker();
        tracker
            .spawn_detached(async { Err::<(), _>("quota exhausted".to_string()) })
            .await
            .unwrap();

        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].message, "Unhandled rejection: quota exhausted");
        assert_eq!(
            snapshot[0].auxiliary,
            vec![AuxValue::Debug("\"quota exhausted\"".into())]
        );
    }

    #[tokio::test]
    async fn detached_success_records_nothing() {
        let (store, tracker) = tracker();
        tracker
            .spawn_detached(async { Ok::<_, String>(5) })
            .await
            .unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn watched_panicking_task_is_recorded() {
        let _lock = crate::interceptors::panic::tests::HOOK_LOCK
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let (store, tracker) = tracker();
        let handle = tokio::spawn(async {
            if true {
                panic!("decoder crashed");
            }
            Ok::<(), String>(())
        });
        tracker.watch(handle).await.unwrap();

        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(
            snapshot[0].message,
            "Unhandled rejection: task panicked: decoder crashed"
        );
    }

    #[test]
    fn observe_returns_result_unchanged_and_records_cause() {
        let (store, tracker) = tracker();
        let error = FetchFailed {
            inner: std::io::Error::new(std::io::ErrorKind::TimedOut, "socket timeout"),
        };
        let result: std::result::Result<u8, FetchFailed> = tracker.observe(Err(error));

        assert_eq!(result.unwrap_err().inner.kind(), std::io::ErrorKind::TimedOut);
        let snapshot = store.snapshot();
        assert_eq!(snapshot[0].message, "Unhandled rejection: fetch failed");
        assert_eq!(
            snapshot[0].auxiliary.last(),
            Some(&AuxValue::Stack("caused by: socket timeout".into()))
        );

        assert_eq!(tracker.observe::<_, FetchFailed>(Ok(3)).unwrap(), 3);
        assert_eq!(store.len(), 1);
    }
}
