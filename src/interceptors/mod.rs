//! This module contains the source interceptors.
//!
//! Every interceptor implements `Interceptor` so the core can install it on
//! construction and detach it again at teardown.
pub mod channel;
pub mod errors;
pub mod expected;
pub mod layer;
pub mod network;
pub mod panic;
pub mod rejection;

pub use channel::{InterceptedChannel, LogChannel};
pub use errors::{ErrorEventInterceptor, EventTarget, HostErrorEvent, ResourceKind};
pub use expected::{ExpectedError, ExpectedErrors, HostMatch, StatusMatch};
pub use layer::CaptureLayer;
pub use network::{CallOutcome, CaptureNetworkLayer, NetworkInterceptor, RequestInfo, ResponseStatus};
pub use panic::PanicInterceptor;
pub use rejection::RejectionTracker;
