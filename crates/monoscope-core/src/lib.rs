//! # monoscope-core
//!
//! Framework-agnostic HTTP telemetry capture for Monoscope.
//!
//! Every request that goes through an [`Interceptor`] yields exactly one
//! [`Payload`]: the request and response as observed (bodies optionally
//! buffered), with configured headers removed and configured JSON fields
//! masked, correlated with a per-request message id and every error reported
//! while the request was handled. The payload is attached to a server span
//! named [`SPAN_NAME`] and the span is ended.
//!
//! Framework adapters (see `monoscope-tower`) only translate their request
//! and response types into the capability interface here: an
//! `http::Request`, a [`ResponseWriter`], and a [`RouteMatch`] extension.
//!
//! ## Features
//!
//! - `env` - `Config::from_env()` reading `MONOSCOPE_*` variables
//! - `otel` - [`OtelTracer`] span backend using the global OpenTelemetry provider
//!
//! ## Example
//!
//! ```rust,ignore
//! use monoscope_core::{BufferedResponse, Config, Interceptor, ResponseWriter};
//!
//! let interceptor = Interceptor::with_tracing(
//!     Config::new().capture_request_body(true).redact_request_body(["$.password"]),
//!     "MyFramework",
//! );
//!
//! let (response, ()) = interceptor
//!     .intercept(request, BufferedResponse::new(), |req, res| {
//!         Box::pin(async move {
//!             res.write_status(http::StatusCode::CREATED);
//!             res.write(b"{}").ok();
//!         })
//!     })
//!     .await;
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod capture;
pub mod config;
pub mod correlation;
pub mod error;
pub mod interceptor;
pub mod payload;
pub mod recorder;
pub mod redact;
pub mod span;

// Configuration from environment variables
#[cfg(feature = "env")]
pub mod env;

// OpenTelemetry span backend
#[cfg(feature = "otel")]
pub mod otel;

pub use capture::{CapturedRequest, CapturedResponse, HeaderFields, RouteMatch};
pub use config::{Config, UnparseableBodyPolicy};
pub use correlation::{
    report_error, report_error_current, CorrelationCarrier, CorrelationState, ReportedError,
};
pub use error::{BoxError, MonoscopeError, Result};
pub use interceptor::{InterceptedBody, Interceptor};
pub use payload::{AttributeValue, Payload, SDK_TOWER};
pub use recorder::{BufferedResponse, RecordingHandle, ResponseRecorder, ResponseWriter};
pub use redact::{FieldPath, REDACTION_MARKER};
pub use span::{
    FinishedSpan, InMemoryTracer, SpanEmitter, SpanHandle, SpanKind, Tracer, TracingTracer,
    SPAN_NAME,
};

#[cfg(feature = "otel")]
pub use otel::OtelTracer;
