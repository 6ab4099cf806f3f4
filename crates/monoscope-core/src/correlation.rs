//! Per-request correlation state and error reporting.
//!
//! Every intercepted request gets a fresh [`CorrelationState`]: a message id
//! and an append-only error list. The interceptor makes it reachable two ways:
//!
//! - as a request extension, so anything holding the request (or its parts)
//!   can call [`report_error`]
//! - as a task-local for the duration of the handler future, so code deeper in
//!   the call graph can call [`report_error_current`] without plumbing
//!
//! ```rust,ignore
//! use monoscope_core::report_error;
//!
//! async fn handler(req: http::Request<Body>) {
//!     if let Err(err) = charge_card().await {
//!         report_error(&req, &err);
//!     }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::error::Error;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

tokio::task_local! {
    static CURRENT: CorrelationState;
}

/// An error reported while a request was being handled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportedError {
    /// Unix timestamp in milliseconds
    pub when: u64,
    /// Type of the reported error
    pub error_type: String,
    /// Display text of the reported error
    pub message: String,
    /// Display text of the innermost `source()` in the chain
    pub root_error: String,
    /// Backtrace at report time, empty when backtraces are disabled
    pub stack_trace: String,
}

impl ReportedError {
    /// Build a record from a concrete error type.
    pub fn from_error<E: Error + 'static>(err: &E) -> Self {
        Self::from_dyn(err, std::any::type_name::<E>())
    }

    /// Build a record from a type-erased error.
    pub fn from_dyn(err: &(dyn Error + 'static), error_type: &str) -> Self {
        let mut root: &(dyn Error + 'static) = err;
        while let Some(source) = root.source() {
            root = source;
        }

        Self {
            when: now_millis(),
            error_type: error_type.to_string(),
            message: err.to_string(),
            root_error: root.to_string(),
            stack_trace: stack_trace(),
        }
    }

    /// Build a record from a plain message.
    pub fn from_message(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            when: now_millis(),
            error_type: error_type.into(),
            root_error: message.clone(),
            message,
            stack_trace: stack_trace(),
        }
    }

    /// Build a record from a caught panic payload.
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = if let Some(message) = payload.downcast_ref::<&'static str>() {
            (*message).to_string()
        } else if let Some(message) = payload.downcast_ref::<String>() {
            message.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self::from_message("panic", message)
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn stack_trace() -> String {
    let backtrace = Backtrace::capture();
    match backtrace.status() {
        BacktraceStatus::Captured => backtrace.to_string(),
        _ => String::new(),
    }
}

#[derive(Debug)]
struct Inner {
    message_id: Uuid,
    errors: Mutex<Vec<ReportedError>>,
}

/// Message id and error list for one request.
///
/// Cloning is cheap and every clone appends to the same list, so the state
/// can be handed to tasks the handler spawns.
#[derive(Debug, Clone)]
pub struct CorrelationState {
    inner: Arc<Inner>,
}

impl CorrelationState {
    /// Start correlation for a new request: fresh v4 message id, no errors.
    pub fn begin() -> Self {
        Self {
            inner: Arc::new(Inner {
                message_id: Uuid::new_v4(),
                errors: Mutex::new(Vec::new()),
            }),
        }
    }

    /// The request's message id.
    pub fn message_id(&self) -> Uuid {
        self.inner.message_id
    }

    /// Append an error to the list.
    pub fn report(&self, error: ReportedError) {
        self.inner
            .errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(error);
    }

    /// Copy of the errors reported so far.
    pub fn snapshot(&self) -> Vec<ReportedError> {
        self.inner
            .errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of errors reported so far.
    pub fn error_count(&self) -> usize {
        self.inner
            .errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// The state installed for the current task, if any.
    pub fn current() -> Option<Self> {
        CURRENT.try_with(Clone::clone).ok()
    }

    /// Run `future` with this state installed as the task-local current one.
    pub async fn scope<F: Future>(self, future: F) -> F::Output {
        CURRENT.scope(self, future).await
    }
}

/// Anything through which the current request's correlation state is reachable.
pub trait CorrelationCarrier {
    /// Look up the correlation state.
    fn correlation(&self) -> Option<&CorrelationState>;
}

impl CorrelationCarrier for CorrelationState {
    fn correlation(&self) -> Option<&CorrelationState> {
        Some(self)
    }
}

impl CorrelationCarrier for http::Extensions {
    fn correlation(&self) -> Option<&CorrelationState> {
        self.get::<CorrelationState>()
    }
}

impl CorrelationCarrier for http::request::Parts {
    fn correlation(&self) -> Option<&CorrelationState> {
        self.extensions.correlation()
    }
}

impl<B> CorrelationCarrier for http::Request<B> {
    fn correlation(&self) -> Option<&CorrelationState> {
        self.extensions().correlation()
    }
}

impl<T: CorrelationCarrier> CorrelationCarrier for Option<T> {
    fn correlation(&self) -> Option<&CorrelationState> {
        self.as_ref().and_then(CorrelationCarrier::correlation)
    }
}

/// Record `err` against the request reachable through `ctx`.
///
/// Without correlation state the error is dropped silently. Never panics.
pub fn report_error<C, E>(ctx: &C, err: &E)
where
    C: CorrelationCarrier + ?Sized,
    E: Error + 'static,
{
    match ctx.correlation() {
        Some(state) => state.report(ReportedError::from_error(err)),
        None => tracing::trace!(
            target: "monoscope::correlation",
            error = %err,
            "no correlation state; error dropped"
        ),
    }
}

/// Record `err` against the request whose handler is currently running.
///
/// Outside an intercepted handler the error is dropped silently.
pub fn report_error_current<E: Error + 'static>(err: &E) {
    report_error(&CorrelationState::current(), err);
}
