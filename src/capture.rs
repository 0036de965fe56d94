//! The single entry point every interceptor and the scanner feed.
//!
//! A capture runs normalize → store → persist → publish synchronously on
//! the calling thread. A thread-local flag marks that thread as capturing
//! for the duration; anything that tries to capture again from inside
//! (a subscriber logging through `tracing`, a panic hook firing for a
//! panicking subscriber) is dropped instead of re-entering the pipeline.
use crate::entry::LogEntry;
use crate::error::Result;
use crate::normalizer::{Capture, Normalizer};
use crate::store::LogStore;
use std::cell::Cell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

thread_local! {
    static CAPTURING: Cell<bool> = const { Cell::new(false) };
}

struct ReentryGuard;

impl ReentryGuard {
    fn enter() -> Option<Self> {
        let already = CAPTURING.with(|flag| flag.replace(true));
        if already {
            None
        } else {
            Some(ReentryGuard)
        }
    }
}

impl Drop for ReentryGuard {
    fn drop(&mut self) {
        CAPTURING.with(|flag| flag.set(false));
    }
}

/// Returns `true` while the current thread is inside the capture pipeline.
pub fn is_capturing() -> bool {
    CAPTURING.with(|flag| flag.get())
}

/// Runs `f` with captures on this thread suppressed, as if inside one.
pub(crate) fn suppressing_captures<R>(f: impl FnOnce() -> R) -> R {
    let _guard = ReentryGuard::enter();
    f()
}

/// Shared handle to the normalizer and store.
#[derive(Clone)]
pub struct CaptureSink {
    normalizer: Normalizer,
    store: Arc<LogStore>,
}

impl CaptureSink {
    /// Creates a sink feeding `store` through the default normalizer.
    pub fn new(store: Arc<LogStore>) -> Self {
        Self {
            normalizer: Normalizer,
            store,
        }
    }

    /// Records one capture. Never panics and never re-enters itself.
    ///
    /// Returns the stored entry, or `None` when the capture was dropped.
    pub fn capture(&self, capture: Capture) -> Option<Arc<LogEntry>> {
        let _guard = ReentryGuard::enter()?;
        catch_unwind(AssertUnwindSafe(|| {
            let entry = self.normalizer.normalize(capture);
            self.store.insert(entry.clone());
            entry
        }))
        .ok()
    }

    /// Clears the store under the same reentrancy protection as a capture.
    pub fn clear(&self) {
        match ReentryGuard::enter() {
            Some(_guard) => {
                let _ = catch_unwind(AssertUnwindSafe(|| self.store.clear()));
            }
            // Already inside a delivery on this thread; the buffer lock is
            // free, so clearing directly is safe.
            None => self.store.clear(),
        }
    }

    /// The store this sink feeds.
    pub fn store(&self) -> &Arc<LogStore> {
        &self.store
    }
}

/// A transparent observer attached to one host signal source.
///
/// Installing starts capture; uninstalling stops it and restores whatever
/// the interceptor replaced. Wrapped calls keep working either way.
pub trait Interceptor: Send + Sync {
    /// Stable identifier, used in diagnostics and `ConsoleCore::interceptor_names`.
    fn name(&self) -> &'static str;

    /// Attaches to the signal source.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot be attached. Installing twice is a no-op.
    fn install(&self) -> Result<()>;

    /// Detaches from the signal source. Uninstalling twice is a no-op.
    fn uninstall(&self);

    /// Whether captures from this source currently reach the sink.
    fn is_installed(&self) -> bool;
}

/// Tracks installed interceptors so they can all be detached at teardown.
#[derive(Default)]
pub struct InterceptorRegistry {
    interceptors: Mutex<Vec<Arc<dyn Interceptor>>>,
}

impl InterceptorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `interceptor` and keeps it for teardown.
    ///
    /// # Errors
    ///
    /// Returns the interceptor's install error; it is not kept in that case.
    pub fn register<I: Interceptor + 'static>(&self, interceptor: Arc<I>) -> Result<Arc<I>> {
        interceptor.install()?;
        if let Ok(mut interceptors) = self.interceptors.lock() {
            interceptors.push(interceptor.clone());
        }
        Ok(interceptor)
    }

    /// Names of the installed interceptors, oldest first.
    pub fn names(&self) -> Vec<&'static str> {
        self.interceptors
            .lock()
            .map(|interceptors| interceptors.iter().map(|i| i.name()).collect())
            .unwrap_or_default()
    }

    /// Uninstalls every interceptor, newest first.
    pub fn uninstall_all(&self) {
        let drained: Vec<Arc<dyn Interceptor>> = match self.interceptors.lock() {
            Ok(mut interceptors) => interceptors.drain(..).collect(),
            Err(_) => return,
        };
        for interceptor in drained.iter().rev() {
            interceptor.uninstall();
        }
    }
}

/// Install state shared by the simple interceptors.
#[derive(Debug, Default)]
pub(crate) struct InstallFlag(AtomicBool);

impl InstallFlag {
    pub(crate) fn set(&self, installed: bool) -> bool {
        self.0.swap(installed, Ordering::SeqCst)
    }

    pub(crate) fn get(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
