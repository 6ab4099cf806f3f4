//! OpenTelemetry span backend.
//!
//! Spans go to whatever tracer provider the application has installed
//! globally. Every payload field becomes an attribute (see
//! [`Payload::attributes`]), and 5xx responses set the span status to error.

use crate::payload::{AttributeValue, Payload};
use crate::span::{SpanHandle, SpanKind, Tracer};
use opentelemetry::global::{self, BoxedSpan, BoxedTracer};
use opentelemetry::trace::{Span as _, SpanKind as OtelSpanKind, Status, Tracer as _};
use opentelemetry::KeyValue;

/// Tracer that exports through the global OpenTelemetry provider.
pub struct OtelTracer {
    tracer: BoxedTracer,
}

impl OtelTracer {
    /// Tracer scoped to `service_name`.
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            tracer: global::tracer(service_name.into()),
        }
    }
}

impl std::fmt::Debug for OtelTracer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OtelTracer").finish_non_exhaustive()
    }
}

impl Tracer for OtelTracer {
    fn start_span(&self, name: &str, kind: SpanKind) -> Box<dyn SpanHandle> {
        let kind = match kind {
            SpanKind::Server => OtelSpanKind::Server,
            SpanKind::Client => OtelSpanKind::Client,
            SpanKind::Internal => OtelSpanKind::Internal,
        };
        let span = self
            .tracer
            .span_builder(name.to_string())
            .with_kind(kind)
            .start(&self.tracer);
        Box::new(OtelSpan { span })
    }
}

struct OtelSpan {
    span: BoxedSpan,
}

impl SpanHandle for OtelSpan {
    fn attach(&mut self, payload: &Payload) {
        for (key, value) in payload.attributes() {
            let attribute = match value {
                AttributeValue::Str(value) => KeyValue::new(key, value),
                AttributeValue::Int(value) => KeyValue::new(key, value),
            };
            self.span.set_attribute(attribute);
        }
        if payload.status_code >= 500 {
            self.span
                .set_status(Status::error(format!("HTTP {}", payload.status_code)));
        }
    }

    fn end(mut self: Box<Self>) {
        self.span.end();
    }
}
