//! Tower layer and service.

use bytes::Bytes;
use http::{Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Body;
use monoscope_core::{
    report_error, BoxError, BufferedResponse, Config, CorrelationState, InterceptedBody,
    Interceptor, MonoscopeError, ReportedError, ResponseRecorder, ResponseWriter, Tracer,
    TracingTracer, SDK_TOWER,
};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tower::{Layer, Service};

/// Layer that applies [`MonoscopeService`].
///
/// # Example
///
/// ```rust,ignore
/// use monoscope_core::Config;
/// use monoscope_tower::MonoscopeLayer;
///
/// let service = tower::ServiceBuilder::new()
///     .layer(MonoscopeLayer::new(
///         Config::new()
///             .service_name("checkout")
///             .capture_request_body(true)
///             .redact_headers(["Authorization"]),
///     ))
///     .service(app);
/// ```
#[derive(Clone, Debug)]
pub struct MonoscopeLayer {
    interceptor: Interceptor,
}

impl MonoscopeLayer {
    /// Create a layer emitting spans through `tracing`.
    pub fn new(config: Config) -> Self {
        Self::with_tracer(config, TracingTracer::new())
    }

    /// Create a layer emitting spans through `tracer`.
    pub fn with_tracer(config: Config, tracer: impl Tracer) -> Self {
        Self {
            interceptor: Interceptor::new(config, tracer, SDK_TOWER),
        }
    }

    /// Create a layer configured from `MONOSCOPE_*` environment variables.
    #[cfg(feature = "env")]
    pub fn from_env() -> monoscope_core::Result<Self> {
        Ok(Self::new(Config::from_env()?))
    }

    /// The interceptor shared by every service this layer produces.
    pub fn interceptor(&self) -> &Interceptor {
        &self.interceptor
    }
}

impl<S> Layer<S> for MonoscopeLayer {
    type Service = MonoscopeService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MonoscopeService {
            inner,
            interceptor: self.interceptor.clone(),
        }
    }
}

/// Middleware that records every exchange of the wrapped service.
///
/// The inner service receives `Request<InterceptedBody<ReqBody>>`. Its
/// response body is collected and replayed through the recorder, so the
/// outgoing response is always a buffered `Response<Full<Bytes>>`.
#[derive(Clone, Debug)]
pub struct MonoscopeService<S> {
    inner: S,
    interceptor: Interceptor,
}

impl<S> MonoscopeService<S> {
    /// Get a reference to the inner service.
    pub fn get_ref(&self) -> &S {
        &self.inner
    }
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for MonoscopeService<S>
where
    S: Service<Request<InterceptedBody<ReqBody>>, Response = Response<ResBody>>
        + Clone
        + Send
        + 'static,
    S::Future: Send,
    S::Error: fmt::Display + Send + 'static,
    ReqBody: Body + Send + 'static,
    ReqBody::Data: Send,
    ReqBody::Error: Into<BoxError>,
    ResBody: Body + Send + 'static,
    ResBody::Data: Send,
    ResBody::Error: fmt::Display,
{
    type Response = Response<Full<Bytes>>;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        // Keep the instance that was driven to readiness.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let interceptor = self.interceptor.clone();

        Box::pin(async move {
            let (response, result) = interceptor
                .intercept(req, BufferedResponse::new(), move |req, recorder| {
                    Box::pin(async move {
                        let correlation = req.extensions().get::<CorrelationState>().cloned();
                        match inner.call(req).await {
                            Ok(response) => {
                                replay(response, recorder, &correlation).await;
                                Ok(())
                            }
                            Err(error) => {
                                if let Some(state) = &correlation {
                                    state.report(ReportedError::from_message(
                                        std::any::type_name::<S::Error>(),
                                        error.to_string(),
                                    ));
                                }
                                recorder.record_status(StatusCode::INTERNAL_SERVER_ERROR);
                                Err(error)
                            }
                        }
                    })
                })
                .await;

            result.map(|()| response.into_response())
        })
    }
}

/// Copy an inner response into the recorder: headers and extensions first,
/// then status, then the collected body.
async fn replay<B>(
    response: Response<B>,
    recorder: &mut ResponseRecorder<BufferedResponse>,
    correlation: &Option<CorrelationState>,
) where
    B: Body,
    B::Error: fmt::Display,
{
    let (parts, body) = response.into_parts();
    *recorder.headers_mut() = parts.headers;
    *recorder.get_mut().extensions_mut() = parts.extensions;
    recorder.record_status(parts.status);

    let bytes = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(error) => {
            let error = MonoscopeError::Body(error.to_string());
            tracing::warn!(
                target: "monoscope::tower",
                %error,
                "failed to read response body; replaying it as empty"
            );
            report_error(correlation, &error);
            return;
        }
    };

    if !bytes.is_empty() {
        if let Err(error) = recorder.record_write(&bytes) {
            tracing::warn!(target: "monoscope::tower", %error, "failed to replay response body");
        }
    }
}
