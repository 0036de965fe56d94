//! The service object the host constructs once and tears down at exit.
use crate::broadcast::{Snapshot, Subscription};
use crate::capture::{CaptureSink, InterceptorRegistry};
use crate::config::CoreConfig;
use crate::entry::LogEntry;
use crate::error::{CoreError, Result};
use crate::interceptors::{
    CaptureLayer, ErrorEventInterceptor, InterceptedChannel, LogChannel, NetworkInterceptor,
    PanicInterceptor, RejectionTracker,
};
use crate::normalizer::Capture;
use crate::persistence::{KeyedStore, PersistenceAdapter, SledStore};
use crate::scanner::{default_heuristics, Scanner, ScannerHandle, ViewProbe};
use crate::store::LogStore;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Owns the history and every installed interceptor.
///
/// Dropping the core tears it down.
pub struct ConsoleCore {
    config: CoreConfig,
    sink: CaptureSink,
    registry: InterceptorRegistry,
    /// Reads back what this or another process persisted.
    recovery: Option<PersistenceAdapter>,
    scanner: Mutex<Option<ScannerHandle>>,
}

impl ConsoleCore {
    /// Builds the core, opening the `sled` database when persistence is enabled.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the database
    /// cannot be opened.
    pub fn new(config: CoreConfig) -> Result<Self> {
        config.validate()?;
        let backend: Option<Arc<dyn KeyedStore>> = match &config.persistence.path {
            Some(path) if config.persistence.enabled => Some(Arc::new(SledStore::open(path)?)),
            _ => None,
        };
        Self::with_keyed_store(config, backend)
    }

    /// Builds the core over an already opened keyed store.
    ///
    /// The store is used only when persistence is enabled in `config`.
    pub fn with_keyed_store(config: CoreConfig, backend: Option<Arc<dyn KeyedStore>>) -> Result<Self> {
        if config.capacity == 0 {
            return Err(CoreError::Config("capacity must be at least 1".into()));
        }
        let backend = backend.filter(|_| config.persistence.enabled);
        let adapter = |store: &Arc<dyn KeyedStore>| {
            let adapter = PersistenceAdapter::new(store.clone()).with_key(config.persistence.key.clone());
            match config.persistence.quota_bytes {
                Some(quota) => adapter.with_quota(quota),
                None => adapter,
            }
        };

        let store = Arc::new(LogStore::new(config.capacity, backend.as_ref().map(adapter)));
        let recovery = backend.as_ref().map(adapter);

        Ok(Self {
            sink: CaptureSink::new(store),
            registry: InterceptorRegistry::new(),
            recovery,
            scanner: Mutex::new(None),
            config,
        })
    }

    /// The validated configuration the core was built with.
    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// The capture entry point shared by every interceptor.
    pub fn sink(&self) -> &CaptureSink {
        &self.sink
    }

    /// The live history.
    pub fn store(&self) -> &Arc<LogStore> {
        self.sink.store()
    }

    /// Records a capture from a host-specific adapter.
    pub fn capture(&self, capture: Capture) -> Option<Arc<LogEntry>> {
        self.sink.capture(capture)
    }

    /// Registers `callback`, delivering the current history to it immediately.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&[Arc<LogEntry>]) + Send + Sync + 'static,
    {
        self.store().subscribe(callback)
    }

    /// Channel form of `subscribe`; the first message is the current history.
    pub fn subscribe_channel(&self) -> (Subscription, mpsc::UnboundedReceiver<Snapshot>) {
        self.store().subscribe_channel()
    }

    /// Copies the current history, oldest first.
    pub fn snapshot(&self) -> Snapshot {
        self.store().snapshot()
    }

    /// Empties the history, including the persisted copy.
    pub fn clear(&self) {
        self.sink.clear();
    }

    /// Reads the persisted history without touching the live one.
    ///
    /// Returns an empty history when persistence is disabled.
    ///
    /// # Errors
    ///
    /// Returns an error if the persisted copy cannot be read or decoded.
    pub fn recover(&self) -> Result<Vec<LogEntry>> {
        match &self.recovery {
            Some(adapter) => adapter.recover(),
            None => Ok(Vec::new()),
        }
    }

    /// Seeds the live history with the persisted one. Returns the number of
    /// entries retained.
    ///
    /// # Errors
    ///
    /// Returns the `recover` error; the live history is untouched then.
    pub fn restore_persisted(&self) -> Result<usize> {
        let entries = self.recover()?;
        self.store().restore(entries);
        Ok(self.store().len())
    }

    /// Installs the chained panic hook. Teardown removes it again.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Poisoned` if a previous install panicked midway.
    pub fn install_panic_hook(&self) -> Result<Arc<PanicInterceptor>> {
        let interceptor = PanicInterceptor::new(self.sink.clone());
        let interceptor = if self.config.capture_backtraces {
            interceptor
        } else {
            interceptor.without_backtrace()
        };
        self.registry.register(Arc::new(interceptor))
    }

    /// Wraps a host logging channel. Use the returned channel in its place.
    pub fn intercept_channel<C>(&self, original: C) -> Result<Arc<InterceptedChannel<C>>>
    where
        C: LogChannel + 'static,
    {
        self.registry
            .register(Arc::new(InterceptedChannel::new(original, self.sink.clone())))
    }

    /// Returns an installed layer to compose into the host's `tracing` subscriber.
    pub fn tracing_layer(&self) -> Result<CaptureLayer> {
        let layer = self
            .registry
            .register(Arc::new(CaptureLayer::new(self.sink.clone())))?;
        Ok(layer.as_ref().clone())
    }

    /// An installed sink for the host's error events.
    pub fn error_events(&self) -> Result<Arc<ErrorEventInterceptor>> {
        self.registry
            .register(Arc::new(ErrorEventInterceptor::new(self.sink.clone())))
    }

    /// An installed tracker for detached task failures.
    pub fn rejections(&self) -> Result<Arc<RejectionTracker>> {
        self.registry
            .register(Arc::new(RejectionTracker::new(self.sink.clone())))
    }

    /// A network interceptor classifying failures with the configured allow-list.
    pub fn network(&self) -> Result<Arc<NetworkInterceptor>> {
        self.registry.register(Arc::new(NetworkInterceptor::new(
            self.sink.clone(),
            self.config.expected_errors.clone(),
        )))
    }

    /// Starts the periodic layout scan over `probe`, replacing any running scan.
    ///
    /// Returns `Ok(false)` when the scanner is disabled in the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error when called outside a tokio runtime.
    pub fn start_scanner(&self, probe: Arc<dyn ViewProbe>) -> Result<bool> {
        let settings = &self.config.scanner;
        if !settings.enabled {
            return Ok(false);
        }
        tokio::runtime::Handle::try_current()
            .map_err(|e| CoreError::Scan(format!("no tokio runtime: {}", e)))?;

        let scanner = Arc::new(Scanner::with_heuristics(
            probe,
            self.sink.clone(),
            default_heuristics(f64::from(settings.threshold_px)),
        ));
        let handle = scanner.spawn(settings.warmup(), settings.interval());
        let mut slot = self.scanner.lock().map_err(|_| CoreError::Poisoned)?;
        if let Some(previous) = slot.replace(handle) {
            previous.stop();
        }
        Ok(true)
    }

    /// Names of the installed interceptors, oldest first.
    pub fn interceptor_names(&self) -> Vec<&'static str> {
        self.registry.names()
    }

    /// Uninstalls every interceptor and stops the scanner.
    pub fn teardown(&self) {
        self.registry.uninstall_all();
        if let Ok(mut slot) = self.scanner.lock() {
            if let Some(handle) = slot.take() {
                handle.stop();
            }
        }
    }
}

impl Drop for ConsoleCore {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::Interceptor;
    use crate::entry::Severity;
    use crate::interceptors::{ExpectedError, RequestInfo};
    use crate::persistence::MemoryStore;
    use crate::scanner::StaticProbe;
    use std::time::Duration;

    fn persistent_config() -> CoreConfig {
        let mut config = CoreConfig::default();
        config.persistence.enabled = true;
        config
    }

    #[test]
    fn capture_reaches_snapshot_and_subscribers() {
        let core = ConsoleCore::new(CoreConfig::default()).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let _subscription = core.subscribe(move |snapshot| {
            seen_clone.lock().unwrap().push(snapshot.len());
        });

        core.capture(Capture::message(Severity::Info, "ready"));
        core.clear();

        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 0]);
        assert!(core.snapshot().is_empty());
    }

    #[test]
    fn persisted_history_survives_into_a_second_core() {
        let backend = Arc::new(MemoryStore::new());
        let first = ConsoleCore::with_keyed_store(persistent_config(), Some(backend.clone())).unwrap();
        first.capture(Capture::message(Severity::Error, "first window"));
        drop(first);

        let second = ConsoleCore::with_keyed_store(persistent_config(), Some(backend.clone())).unwrap();
        assert_eq!(second.recover().unwrap()[0].message, "first window");
        assert_eq!(second.restore_persisted().unwrap(), 1);

        second.clear();
        assert!(!backend.contains("console_logs"));
    }

    #[test]
    fn backend_is_ignored_when_persistence_is_disabled() {
        let backend = Arc::new(MemoryStore::new());
        let core = ConsoleCore::with_keyed_store(CoreConfig::default(), Some(backend.clone())).unwrap();
        core.capture(Capture::message(Severity::Info, "volatile"));
        assert!(!backend.contains("console_logs"));
        assert!(core.recover().unwrap().is_empty());
    }

    #[test]
    fn teardown_uninstalls_every_interceptor() {
        let core = ConsoleCore::new(CoreConfig::default()).unwrap();
        let channel = core.intercept_channel(|_: Severity, _: &[crate::normalizer::Arg]| {}).unwrap();
        let events = core.error_events().unwrap();
        let network = core.network().unwrap();
        assert_eq!(core.interceptor_names(), vec!["log-channel", "error-events", "network"]);

        core.teardown();
        assert!(!channel.is_installed());
        assert!(!events.is_installed());
        assert!(!network.is_installed());
        assert!(core.interceptor_names().is_empty());
    }

    #[tokio::test]
    async fn network_interceptor_uses_configured_allow_list() {
        let mut config = CoreConfig::default();
        config
            .expected_errors
            .push(ExpectedError::exact("api.example.com", 404));
        let core = ConsoleCore::new(config).unwrap();
        let network = core.network().unwrap();

        let request = RequestInfo::get("https://api.example.com/items/7");
        let _ = network
            .observe(&request, async { Ok::<_, String>(404u16) })
            .await;

        assert_eq!(core.snapshot()[0].severity, Severity::Warn);
    }

    #[tokio::test(start_paused = true)]
    async fn scanner_starts_only_when_enabled_and_stops_at_teardown() {
        let probe = Arc::new(StaticProbe::default());
        let disabled = ConsoleCore::new(CoreConfig::default()).unwrap();
        assert!(!disabled.start_scanner(probe.clone()).unwrap());

        let mut config = CoreConfig::default();
        config.scanner.enabled = true;
        let core = ConsoleCore::new(config).unwrap();
        assert!(core.start_scanner(probe).unwrap());

        tokio::time::sleep(Duration::from_secs(3)).await;
        core.teardown();
        assert!(core.scanner.lock().unwrap().is_none());
    }

    #[test]
    fn scanner_outside_runtime_is_an_error() {
        let mut config = CoreConfig::default();
        config.scanner.enabled = true;
        let core = ConsoleCore::new(config).unwrap();
        assert!(matches!(
            core.start_scanner(Arc::new(StaticProbe::default())),
            Err(CoreError::Scan(_))
        ));
    }
}
