//! Wrappers around outbound network calls.
//!
//! Three call styles are covered: awaited futures (`observe`), completion
//! callbacks (`wrap_callback`) and `tower` services (`CaptureNetworkLayer`).
//! Each measures the call, records non-success statuses and transport
//! failures, and hands the caller exactly the outcome the wrapped call
//! produced. A call dropped before it completes (a cancelled future, a
//! callback that is never invoked) is recorded as aborted.
use crate::capture::{CaptureSink, Interceptor};
use crate::entry::{LogEntry, Severity};
use crate::error::Result;
use crate::interceptors::expected::ExpectedErrors;
use crate::normalizer::{Arg, Capture};
use futures::future::BoxFuture;
use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tower::{Layer, Service};

/// What the wrapper knows about an outgoing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestInfo {
    pub method: String,
    pub url: String,
    pub host: String,
}

impl RequestInfo {
    /// Describes a request, taking the host from `url` when it parses.
    ///
    /// # Arguments
    ///
    /// * `method` - The HTTP method, e.g. `"GET"`.
    /// * `url` - The full request URL. An unparsable URL leaves `host` empty.
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        let url = url.into();
        let host = url
            .parse::<http::Uri>()
            .ok()
            .and_then(|uri| uri.host().map(str::to_string))
            .unwrap_or_default();
        Self {
            method: method.into(),
            url,
            host,
        }
    }

    /// Shorthand for a `GET` request.
    pub fn get(url: impl Into<String>) -> Self {
        Self::new("GET", url)
    }

    fn from_http<B>(request: &http::Request<B>) -> Self {
        let uri = request.uri();
        Self {
            method: request.method().to_string(),
            url: uri.to_string(),
            host: uri.host().map(str::to_string).unwrap_or_default(),
        }
    }
}

/// A response that carries an HTTP status code.
pub trait ResponseStatus {
    /// The numeric HTTP status.
    fn status_code(&self) -> u16;
}

impl<B> ResponseStatus for http::Response<B> {
    fn status_code(&self) -> u16 {
        self.status().as_u16()
    }
}

impl ResponseStatus for http::StatusCode {
    fn status_code(&self) -> u16 {
        self.as_u16()
    }
}

impl ResponseStatus for u16 {
    fn status_code(&self) -> u16 {
        *self
    }
}

/// How a call ended, as far as classification is concerned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallOutcome {
    /// The call completed with this HTTP status.
    Status(u16),
    /// The transport failed with this error.
    Failed(String),
    /// The call was dropped before it completed.
    Aborted,
}

impl CallOutcome {
    fn from_result<R: ResponseStatus, E: Display>(result: &std::result::Result<R, E>) -> Self {
        match result {
            Ok(response) => CallOutcome::Status(response.status_code()),
            Err(error) => CallOutcome::Failed(error.to_string()),
        }
    }
}

fn is_success(status: u16) -> bool {
    (200..400).contains(&status)
}

/// Records failed outbound calls into a `CaptureSink`.
///
/// Clones share the install state, so a wrapper handed out before
/// `uninstall` stops recording as soon as it runs.
#[derive(Clone)]
pub struct NetworkInterceptor {
    sink: CaptureSink,
    expected: Arc<ExpectedErrors>,
    installed: Arc<AtomicBool>,
}

impl NetworkInterceptor {
    /// Creates an interceptor, initially uninstalled.
    ///
    /// # Arguments
    ///
    /// * `sink` - Where failed calls are recorded.
    /// * `expected` - Host and status pairs downgraded from `error` to `warn`.
    pub fn new(sink: CaptureSink, expected: ExpectedErrors) -> Self {
        Self {
            sink,
            expected: Arc::new(expected),
            installed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The allow-list used to classify failed statuses.
    pub fn expected(&self) -> &ExpectedErrors {
        &self.expected
    }

    /// Awaits `future`, records its outcome, and returns the output untouched.
    ///
    /// Dropping the returned future before it completes records the call
    /// as aborted.
    pub async fn observe<F, R, E>(&self, request: &RequestInfo, future: F) -> std::result::Result<R, E>
    where
        F: Future<Output = std::result::Result<R, E>>,
        R: ResponseStatus,
        E: Display,
    {
        let pending = PendingCall::start(self.clone(), request.clone());
        let result = future.await;
        pending.finish(&CallOutcome::from_result(&result));
        result
    }

    /// Wraps a completion callback; the clock starts when the wrapper is made.
    ///
    /// Dropping the wrapper without calling it records the call as aborted.
    pub fn wrap_callback<R, E, C>(
        &self,
        request: RequestInfo,
        callback: C,
    ) -> impl FnOnce(std::result::Result<R, E>) + Send + 'static
    where
        R: ResponseStatus + 'static,
        E: Display + 'static,
        C: FnOnce(std::result::Result<R, E>) + Send + 'static,
    {
        let pending = PendingCall::start(self.clone(), request);
        move |result| {
            pending.finish(&CallOutcome::from_result(&result));
            callback(result)
        }
    }

    /// Records one finished call. Successful statuses are not recorded.
    ///
    /// Returns the stored entry, or `None` when nothing was recorded.
    pub fn record(
        &self,
        request: &RequestInfo,
        outcome: &CallOutcome,
        elapsed: Duration,
    ) -> Option<Arc<LogEntry>> {
        if !self.installed.load(Ordering::SeqCst) {
            return None;
        }

        let duration_ms = elapsed.as_millis().to_string();
        let capture = match outcome {
            CallOutcome::Status(status) if is_success(*status) => return None,
            CallOutcome::Status(status) => Capture::new(
                self.expected.classify(&request.host, *status),
                vec![Arg::Text(format!(
                    "{} {} failed with status {}",
                    request.method, request.url, status
                ))],
            )
            .with_field("status", status.to_string()),
            CallOutcome::Failed(error) => Capture::new(
                Severity::Error,
                vec![Arg::Text(format!(
                    "{} {} failed: {}",
                    request.method, request.url, error
                ))],
            ),
            CallOutcome::Aborted => Capture::new(
                Severity::Error,
                vec![Arg::Text(format!("{} {} aborted", request.method, request.url))],
            ),
        };

        self.sink.capture(
            capture
                .with_field("host", request.host.clone())
                .with_field("duration_ms", duration_ms),
        )
    }

    /// A `tower` layer recording calls made through the wrapped service.
    pub fn layer(&self) -> CaptureNetworkLayer {
        CaptureNetworkLayer {
            interceptor: self.clone(),
        }
    }
}

/// A call in flight. Recorded as aborted if dropped before `finish`.
struct PendingCall {
    interceptor: NetworkInterceptor,
    request: RequestInfo,
    started: Instant,
    finished: bool,
}

impl PendingCall {
    fn start(interceptor: NetworkInterceptor, request: RequestInfo) -> Self {
        Self {
            interceptor,
            request,
            started: Instant::now(),
            finished: false,
        }
    }

    fn finish(mut self, outcome: &CallOutcome) {
        self.finished = true;
        self.interceptor
            .record(&self.request, outcome, self.started.elapsed());
    }
}

impl Drop for PendingCall {
    fn drop(&mut self) {
        if !self.finished {
            self.interceptor
                .record(&self.request, &CallOutcome::Aborted, self.started.elapsed());
        }
    }
}

impl Interceptor for NetworkInterceptor {
    fn name(&self) -> &'static str {
        "network"
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

/// `tower` middleware recording failed outbound HTTP calls.
#[derive(Clone)]
pub struct CaptureNetworkLayer {
    interceptor: NetworkInterceptor,
}

impl<S> Layer<S> for CaptureNetworkLayer {
    type Service = CaptureNetworkService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CaptureNetworkService {
            inner,
            interceptor: self.interceptor.clone(),
        }
    }
}

/// Service produced by `CaptureNetworkLayer`.
#[derive(Clone)]
pub struct CaptureNetworkService<S> {
    inner: S,
    interceptor: NetworkInterceptor,
}

impl<S, ReqBody, ResBody> Service<http::Request<ReqBody>> for CaptureNetworkService<S>
where
    S: Service<http::Request<ReqBody>, Response = http::Response<ResBody>>,
    S::Future: Send + 'static,
    S::Error: Display + Send + 'static,
    ResBody: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, std::result::Result<S::Response, S::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: http::Request<ReqBody>) -> Self::Future {
        let info = RequestInfo::from_http(&request);
        let interceptor = self.interceptor.clone();
        let future = self.inner.call(request);
        Box::pin(async move { interceptor.observe(&info, future).await })
    }
}
