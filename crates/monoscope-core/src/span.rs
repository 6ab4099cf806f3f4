//! Span emission.
//!
//! The tracing backend is pluggable through [`Tracer`]/[`SpanHandle`]. The
//! interceptor wraps the handle in a [`SpanEmitter`], whose `finish` consumes
//! it: a span gets exactly one payload and is ended exactly once.

use crate::payload::Payload;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::field::Empty;

/// Name of the server span opened for every request.
pub const SPAN_NAME: &str = "monoscope.http";

/// Span kind, mirroring the OpenTelemetry kinds this crate uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanKind {
    /// Inbound request handling
    Server,
    /// Outbound call
    Client,
    /// Work inside the process
    Internal,
}

impl SpanKind {
    /// Lower-case name as used by `otel.kind`.
    pub fn as_str(&self) -> &'static str {
        match self {
            SpanKind::Server => "server",
            SpanKind::Client => "client",
            SpanKind::Internal => "internal",
        }
    }
}

impl fmt::Display for SpanKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Creates spans. Implementations must be cheap to call once per request.
pub trait Tracer: Send + Sync + 'static {
    /// Open a span.
    fn start_span(&self, name: &str, kind: SpanKind) -> Box<dyn SpanHandle>;
}

/// An open span.
pub trait SpanHandle: Send {
    /// Attach the request's payload.
    fn attach(&mut self, payload: &Payload);

    /// End the span.
    fn end(self: Box<Self>);

    /// A `tracing` span the handler future should run inside, if the backend
    /// has one. Events logged by the handler then nest under the request.
    fn tracing_span(&self) -> tracing::Span {
        tracing::Span::none()
    }
}

/// The span for one request, open until [`finish`](Self::finish) is called.
pub struct SpanEmitter {
    handle: Box<dyn SpanHandle>,
}

impl SpanEmitter {
    /// Open a span named [`SPAN_NAME`].
    pub fn open(tracer: &dyn Tracer, kind: SpanKind) -> Self {
        Self {
            handle: tracer.start_span(SPAN_NAME, kind),
        }
    }

    /// See [`SpanHandle::tracing_span`].
    pub fn tracing_span(&self) -> tracing::Span {
        self.handle.tracing_span()
    }

    /// Attach the payload and end the span.
    pub fn finish(mut self, payload: &Payload) {
        self.handle.attach(payload);
        self.handle.end();
    }
}

impl fmt::Debug for SpanEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpanEmitter").finish_non_exhaustive()
    }
}

/// Tracer backed by the `tracing` crate.
///
/// Spans carry `otel.*` fields, so a `tracing-opentelemetry` layer exports
/// them as OpenTelemetry server spans.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingTracer;

impl TracingTracer {
    /// Create a new tracing-backed tracer.
    pub fn new() -> Self {
        Self
    }
}

impl Tracer for TracingTracer {
    fn start_span(&self, name: &str, kind: SpanKind) -> Box<dyn SpanHandle> {
        let span = tracing::info_span!(
            target: "monoscope::span",
            "monoscope.http",
            otel.name = name,
            otel.kind = kind.as_str(),
            otel.status_code = Empty,
            http.request.method = Empty,
            http.route = Empty,
            http.response.status_code = Empty,
            monoscope.msg_id = Empty,
            monoscope.errors = Empty,
        );
        Box::new(TracingSpan { span })
    }
}

struct TracingSpan {
    span: tracing::Span,
}

impl SpanHandle for TracingSpan {
    fn attach(&mut self, payload: &Payload) {
        let span = &self.span;
        span.record("http.request.method", payload.method.as_str());
        span.record("http.route", payload.route());
        span.record("http.response.status_code", payload.status_code);
        span.record("monoscope.msg_id", tracing::field::display(payload.msg_id));
        span.record("monoscope.errors", payload.errors.len());
        if payload.status_code >= 500 {
            span.record("otel.status_code", "ERROR");
        }

        tracing::info!(
            target: "monoscope::span",
            parent: span,
            msg_id = %payload.msg_id,
            sdk_type = %payload.sdk_type,
            method = %payload.method,
            route = %payload.route(),
            status = payload.status_code,
            duration_ms = payload.duration_ns / 1_000_000,
            errors = payload.errors.len(),
            "request captured"
        );
    }

    fn end(self: Box<Self>) {}

    fn tracing_span(&self) -> tracing::Span {
        self.span.clone()
    }
}

/// A span collected by [`InMemoryTracer`].
#[derive(Debug, Clone)]
pub struct FinishedSpan {
    /// Span name
    pub name: String,
    /// Span kind
    pub kind: SpanKind,
    /// Payloads attached before the span ended
    pub payloads: Vec<Payload>,
}

/// Tracer that keeps finished spans in memory.
///
/// Useful for tests and local debugging. Clones share the same storage.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTracer {
    finished: Arc<Mutex<Vec<FinishedSpan>>>,
}

impl InMemoryTracer {
    /// Create an empty tracer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Spans ended so far, oldest first.
    pub fn finished_spans(&self) -> Vec<FinishedSpan> {
        self.finished
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Payloads from every finished span, oldest first.
    pub fn payloads(&self) -> Vec<Payload> {
        self.finished_spans()
            .into_iter()
            .flat_map(|span| span.payloads)
            .collect()
    }

    /// Drop everything collected so far.
    pub fn clear(&self) {
        self.finished
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl Tracer for InMemoryTracer {
    fn start_span(&self, name: &str, kind: SpanKind) -> Box<dyn SpanHandle> {
        Box::new(InMemorySpan {
            span: FinishedSpan {
                name: name.to_string(),
                kind,
                payloads: Vec::new(),
            },
            sink: self.finished.clone(),
        })
    }
}

struct InMemorySpan {
    span: FinishedSpan,
    sink: Arc<Mutex<Vec<FinishedSpan>>>,
}

impl SpanHandle for InMemorySpan {
    fn attach(&mut self, payload: &Payload) {
        self.span.payloads.push(payload.clone());
    }

    fn end(self: Box<Self>) {
        let InMemorySpan { span, sink } = *self;
        sink.lock().unwrap_or_else(PoisonError::into_inner).push(span);
    }
}
