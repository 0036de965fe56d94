//! Captures uncaught panics through the process panic hook.
use crate::capture::{CaptureSink, Interceptor};
use crate::entry::Severity;
use crate::error::{CoreError, Result};
use crate::normalizer::{Arg, Capture};
use std::backtrace::Backtrace;
use std::panic::{self, PanicHookInfo};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

type Hook = Box<dyn Fn(&PanicHookInfo<'_>) + Sync + Send + 'static>;

/// Installs a panic hook that records the panic, then runs the previous hook.
///
/// Uninstalling puts the previous hook back only while ours is still the
/// active one. If the host replaced it in the meantime, the host's hook
/// stays and ours is reduced to forwarding to the hook it wrapped.
pub struct PanicInterceptor {
    sink: CaptureSink,
    capture_backtrace: bool,
    installed: Mutex<Option<InstalledHook>>,
}

struct InstalledHook {
    chained: Arc<Hook>,
    /// Address of our boxed hook, used to recognize it in `take_hook`.
    address: usize,
    enabled: Arc<AtomicBool>,
}

fn hook_address(hook: &Hook) -> usize {
    std::ptr::from_ref(&**hook).cast::<()>() as usize
}

impl PanicInterceptor {
    /// Creates an uninstalled interceptor feeding `sink`, with backtraces.
    pub fn new(sink: CaptureSink) -> Self {
        Self {
            sink,
            capture_backtrace: true,
            installed: Mutex::new(None),
        }
    }

    /// Skips the forced backtrace capture (it is slow on large binaries).
    pub fn without_backtrace(mut self) -> Self {
        self.capture_backtrace = false;
        self
    }
}

/// Extracts the panic message from the payload.
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "Box<dyn Any>".to_string()
    }
}

fn panic_capture(info: &PanicHookInfo<'_>, with_backtrace: bool) -> Capture {
    let message = panic_message(info.payload());
    let thread = thread::current();
    let mut capture = Capture::new(
        Severity::Error,
        vec![Arg::Text(format!("Uncaught panic: {}", message))],
    )
    .with_field("thread", thread.name().unwrap_or("<unnamed>"));

    if let Some(location) = info.location() {
        capture = capture.with_location(format!(
            "{}:{}:{}",
            location.file(),
            location.line(),
            location.column()
        ));
    }
    if with_backtrace {
        capture = capture.with_stack(Backtrace::force_capture().to_string());
    }
    capture
}

impl Interceptor for PanicInterceptor {
    fn name(&self) -> &'static str {
        "panic-hook"
    }

    fn install(&self) -> Result<()> {
        let mut installed = self.installed.lock().map_err(|_| CoreError::Poisoned)?;
        if installed.is_some() {
            return Ok(());
        }

        let chained: Arc<Hook> = Arc::new(panic::take_hook());
        let enabled = Arc::new(AtomicBool::new(true));

        let sink = self.sink.clone();
        let with_backtrace = self.capture_backtrace;
        let active = enabled.clone();
        let forward = chained.clone();
        let hook: Hook = Box::new(move |info| {
            if active.load(Ordering::SeqCst) {
                let _ = panic::catch_unwind(panic::AssertUnwindSafe(|| {
                    sink.capture(panic_capture(info, with_backtrace));
                }));
            }
            forward(info);
        });
        let address = hook_address(&hook);
        panic::set_hook(hook);

        *installed = Some(InstalledHook {
            chained,
            address,
            enabled,
        });
        Ok(())
    }

    fn uninstall(&self) {
        let Ok(mut installed) = self.installed.lock() else {
            return;
        };
        let Some(hook) = installed.take() else {
            return;
        };
        hook.enabled.store(false, Ordering::SeqCst);

        let current = panic::take_hook();
        if hook_address(&current) == hook.address {
            let chained = hook.chained;
            panic::set_hook(Box::new(move |info| chained(info)));
        } else {
            panic::set_hook(current);
        }
    }

    fn is_installed(&self) -> bool {
        self.installed.lock().map(|i| i.is_some()).unwrap_or(false)
    }
}
