//! The per-request orchestrator.
//!
//! [`Interceptor::intercept`] runs one request through the pipeline:
//!
//! 1. open the server span and start correlation
//! 2. capture the request (buffering the body when configured)
//! 3. run the handler against a [`ResponseRecorder`], inside the task-local
//!    correlation scope and the tracing span
//! 4. build the payload from what was recorded and emit it exactly once
//!
//! The payload is emitted on every exit path: normal return, panic (which is
//! re-raised afterwards) and cancellation (the future dropped mid-flight).

use crate::capture::{capture_headers, CapturedRequest, CapturedResponse};
use crate::config::Config;
use crate::correlation::{CorrelationState, ReportedError};
use crate::error::BoxError;
use crate::payload::Payload;
use crate::recorder::{RecordingHandle, ResponseRecorder, ResponseWriter};
use crate::span::{SpanEmitter, SpanKind, Tracer, TracingTracer};
use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use http::{Request, StatusCode};
use http_body_util::{BodyExt, Either, Full};
use hyper::body::Body;
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;

/// Request body type seen by intercepted handlers.
///
/// `Left` holds the buffered copy when request body capture is on, `Right`
/// the untouched original body otherwise.
pub type InterceptedBody<B> = Either<Full<Bytes>, B>;

/// Status recorded for requests whose handler never finished.
const CLIENT_CLOSED_REQUEST: u16 = 499;

/// Wraps request handlers with capture, redaction, correlation and span
/// emission.
///
/// Cheap to clone; clones share the config and the tracer.
#[derive(Clone)]
pub struct Interceptor {
    config: Arc<Config>,
    tracer: Arc<dyn Tracer>,
    sdk_type: Arc<str>,
}

impl Interceptor {
    /// Create an interceptor emitting through `tracer`, tagging payloads
    /// with `sdk_type`.
    pub fn new(config: Config, tracer: impl Tracer, sdk_type: impl Into<String>) -> Self {
        Self {
            config: Arc::new(config),
            tracer: Arc::new(tracer),
            sdk_type: Arc::from(sdk_type.into()),
        }
    }

    /// Create an interceptor backed by [`TracingTracer`].
    pub fn with_tracing(config: Config, sdk_type: impl Into<String>) -> Self {
        Self::new(config, TracingTracer::new(), sdk_type)
    }

    /// The configuration in use.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The producing-SDK tag.
    pub fn sdk_type(&self) -> &str {
        &self.sdk_type
    }

    /// Run `handler` for `request`, observing everything it writes to
    /// `writer`.
    ///
    /// Returns the writer (so the caller can finish the response) together
    /// with the handler's own result, unchanged. A panic in the handler is
    /// resumed after the payload has been emitted.
    pub async fn intercept<B, W, R, F>(&self, request: Request<B>, writer: W, handler: F) -> (W, R)
    where
        B: Body,
        B::Error: Into<BoxError>,
        W: ResponseWriter,
        F: for<'a> FnOnce(Request<InterceptedBody<B>>, &'a mut ResponseRecorder<W>) -> BoxFuture<'a, R>,
    {
        let emitter = SpanEmitter::open(self.tracer.as_ref(), SpanKind::Server);
        let span = emitter.tracing_span();
        let correlation = CorrelationState::begin();

        let (mut parts, body) = request.into_parts();
        parts.extensions.insert(correlation.clone());

        let mut recorder = ResponseRecorder::new(writer, self.config.capture_response_body);
        let mut exchange = Exchange {
            config: &self.config,
            sdk_type: &self.sdk_type,
            correlation: correlation.clone(),
            started: Instant::now(),
            request: Some(CapturedRequest::from_parts(&parts)),
            recording: recorder.handle(),
            emitter: Some(emitter),
        };

        let body = if self.config.capture_request_body {
            let bytes = match AssertUnwindSafe(body.collect()).catch_unwind().await {
                Ok(Ok(collected)) => collected.to_bytes(),
                Ok(Err(error)) => {
                    let error: BoxError = error.into();
                    tracing::warn!(
                        target: "monoscope::interceptor",
                        error = %error,
                        "failed to read request body; capturing it as empty"
                    );
                    correlation.report(ReportedError::from_dyn(error.as_ref(), "body"));
                    Bytes::new()
                }
                Err(panic) => {
                    let response =
                        recorded_response(&recorder, StatusCode::INTERNAL_SERVER_ERROR);
                    exchange.panicked(panic, "request body panicked", response)
                }
            };
            exchange.set_request_body(bytes.clone());
            Either::Left(Full::new(bytes))
        } else {
            Either::Right(body)
        };
        let request = Request::from_parts(parts, body);

        let outcome = {
            let handled = handler(request, &mut recorder);
            correlation
                .clone()
                .scope(AssertUnwindSafe(handled).catch_unwind())
                .instrument(span)
                .await
        };

        match outcome {
            Ok(result) => {
                exchange.complete(recorded_response(&recorder, recorder.status_code()));
                (recorder.into_inner(), result)
            }
            Err(panic) => {
                let response = recorded_response(&recorder, StatusCode::INTERNAL_SERVER_ERROR);
                exchange.panicked(panic, "handler panicked", response)
            }
        }
    }
}

impl fmt::Debug for Interceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interceptor")
            .field("config", &self.config)
            .field("sdk_type", &self.sdk_type)
            .finish_non_exhaustive()
    }
}

fn recorded_response<W: ResponseWriter>(
    recorder: &ResponseRecorder<W>,
    status: StatusCode,
) -> CapturedResponse {
    CapturedResponse {
        status,
        headers: capture_headers(recorder.headers()),
        body: recorder.captured_body(),
    }
}

/// One in-flight request. Emits on `complete`, or on drop if the request
/// never got that far.
struct Exchange<'a> {
    config: &'a Config,
    sdk_type: &'a str,
    correlation: CorrelationState,
    started: Instant,
    request: Option<CapturedRequest>,
    recording: RecordingHandle,
    emitter: Option<SpanEmitter>,
}

impl Exchange<'_> {
    fn set_request_body(&mut self, body: Bytes) {
        if let Some(request) = self.request.take() {
            self.request = Some(request.with_body(body));
        }
    }

    fn complete(mut self, response: CapturedResponse) {
        if let Some(emitter) = self.emitter.take() {
            self.emit(emitter, response);
        }
    }

    /// Report the panic, emit with `response`, then resume unwinding.
    fn panicked(
        self,
        panic: Box<dyn Any + Send>,
        context: &'static str,
        response: CapturedResponse,
    ) -> ! {
        let reported = ReportedError::from_panic(panic.as_ref());
        tracing::error!(
            target: "monoscope::interceptor",
            msg_id = %self.correlation.message_id(),
            panic = %reported.message,
            "{}",
            context
        );
        self.correlation.report(reported);
        self.complete(response);
        std::panic::resume_unwind(panic)
    }

    fn emit(&mut self, emitter: SpanEmitter, response: CapturedResponse) {
        let payload = Payload::build(
            self.sdk_type,
            self.request.take().unwrap_or_default(),
            response,
            self.config,
            &self.correlation,
            self.started.elapsed(),
        );

        if self.config.debug {
            match payload.to_json() {
                Ok(json) => tracing::debug!(
                    target: "monoscope::interceptor",
                    payload = %json,
                    "payload built"
                ),
                Err(error) => tracing::debug!(
                    target: "monoscope::interceptor",
                    %error,
                    "payload could not be serialized for logging"
                ),
            }
        }

        emitter.finish(&payload);
    }
}

impl Drop for Exchange<'_> {
    fn drop(&mut self) {
        let Some(emitter) = self.emitter.take() else {
            return;
        };

        tracing::debug!(
            target: "monoscope::interceptor",
            msg_id = %self.correlation.message_id(),
            "request cancelled before the handler finished"
        );
        self.correlation.report(ReportedError::from_message(
            "cancelled",
            "request cancelled",
        ));
        // Whatever reached the writer before the drop is kept.
        let response = CapturedResponse {
            status: StatusCode::from_u16(CLIENT_CLOSED_REQUEST)
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            headers: capture_headers(&self.recording.headers()),
            body: self.recording.body(),
        };
        self.emit(emitter, response);
    }
}
