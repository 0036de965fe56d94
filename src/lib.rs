//! In-process log capture for client applications.
//!
//! Interceptors observe the host's logging channels, panics, error events,
//! detached tasks and outbound network calls. Every observation is normalized
//! into a `LogEntry`, kept in a bounded history, optionally persisted, and
//! broadcast to subscribers such as a log viewer.
pub mod broadcast;
pub mod capture;
pub mod config;
pub mod console;
pub mod entry;
pub mod error;
pub mod export;
pub mod interceptors;
pub mod normalizer;
pub mod persistence;
pub mod scanner;
pub mod store;

pub use crate::broadcast::{Snapshot, Subscription};
pub use crate::capture::{CaptureSink, Interceptor};
pub use crate::config::CoreConfig;
pub use crate::console::ConsoleCore;
pub use crate::entry::{AuxValue, LogEntry, Severity};
pub use crate::error::{CoreError, Result};
pub use crate::export::{format_line, LogFilter};
pub use crate::normalizer::{Arg, Capture};
