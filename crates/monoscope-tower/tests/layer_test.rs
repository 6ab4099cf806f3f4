use bytes::Bytes;
use futures_util::FutureExt;
use http::{Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use monoscope_core::{InMemoryTracer, REDACTION_MARKER};
use monoscope_tower::{report_error, Config, InterceptedBody, MonoscopeLayer, RouteMatch};
use std::convert::Infallible;
use std::fmt;
use std::panic::AssertUnwindSafe;
use tower::{service_fn, Layer, ServiceBuilder, ServiceExt};

type Req = Request<InterceptedBody<Full<Bytes>>>;

#[derive(Debug)]
struct UpstreamDown;

impl fmt::Display for UpstreamDown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "upstream unavailable")
    }
}

impl std::error::Error for UpstreamDown {}

fn post(uri: &str, body: &'static str) -> Request<Full<Bytes>> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .header("Authorization", "Bearer secret")
        .body(Full::new(Bytes::from_static(body.as_bytes())))
        .unwrap()
}

#[tokio::test]
async fn test_exchange_captured_and_redacted() {
    let tracer = InMemoryTracer::new();
    let config = Config::new()
        .service_name("accounts")
        .capture_request_body(true)
        .capture_response_body(true)
        .redact_headers(["authorization", "Set-Cookie"])
        .redact_request_body(["$.password"])
        .redact_response_body(["$.token"]);

    let service = ServiceBuilder::new()
        .layer(MonoscopeLayer::with_tracer(config, tracer.clone()))
        .service(service_fn(|req: Req| async move {
            let body = req.into_body().collect().await.unwrap().to_bytes();
            let login: serde_json::Value = serde_json::from_slice(&body).unwrap();
            let reply = format!(r#"{{"user":{},"token":"t-123"}}"#, login["username"]);

            let response = Response::builder()
                .status(StatusCode::CREATED)
                .header("set-cookie", "session=abc")
                .header("x-request-kind", "login")
                .body(Full::new(Bytes::from(reply)))
                .unwrap();
            Ok::<_, Infallible>(response)
        }));

    let response = service
        .oneshot(post(
            "/login",
            r#"{"password":"secret123","username":"john"}"#,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(response.headers()["set-cookie"], "session=abc");
    let sent = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(sent, r#"{"user":"john","token":"t-123"}"#);

    let payloads = tracer.payloads();
    assert_eq!(payloads.len(), 1);
    let payload = &payloads[0];
    assert_eq!(payload.service_name, "accounts");
    assert_eq!(payload.status_code, 201);
    assert!(!payload.request_headers.contains_key("authorization"));
    assert!(!payload.response_headers.contains_key("set-cookie"));
    assert_eq!(payload.response_headers["x-request-kind"], vec!["login"]);

    let request_body: serde_json::Value =
        serde_json::from_slice(payload.request_body.as_ref().unwrap()).unwrap();
    assert_eq!(request_body["password"], REDACTION_MARKER);
    assert_eq!(request_body["username"], "john");

    let response_body: serde_json::Value =
        serde_json::from_slice(payload.response_body.as_ref().unwrap()).unwrap();
    assert_eq!(response_body["token"], REDACTION_MARKER);
    assert_eq!(response_body["user"], "john");
}

#[tokio::test]
async fn test_inner_error_returned_unchanged_and_reported() {
    let tracer = InMemoryTracer::new();
    let layer = MonoscopeLayer::with_tracer(Config::new(), tracer.clone());
    let service = layer.layer(service_fn(|_req: Req| async {
        Err::<Response<Full<Bytes>>, _>(UpstreamDown)
    }));

    let result = service.oneshot(post("/charge", "{}")).await;

    assert_eq!(result.unwrap_err().to_string(), "upstream unavailable");
    let payload = &tracer.payloads()[0];
    assert_eq!(payload.status_code, 500);
    assert_eq!(payload.errors.len(), 1);
    assert!(payload.errors[0].error_type.ends_with("UpstreamDown"));
    assert_eq!(payload.errors[0].message, "upstream unavailable");
}

async fn explode(_req: Req) -> Result<Response<Full<Bytes>>, Infallible> {
    panic!("inner service exploded")
}

#[tokio::test]
async fn test_inner_panic_emits_once_and_propagates() {
    let tracer = InMemoryTracer::new();
    let layer = MonoscopeLayer::with_tracer(Config::new(), tracer.clone());
    let service = layer.layer(service_fn(explode));

    let outcome = AssertUnwindSafe(service.oneshot(post("/charge", "{}")))
        .catch_unwind()
        .await;

    let panic = outcome.err().expect("panic must propagate");
    assert_eq!(panic.downcast_ref::<&str>(), Some(&"inner service exploded"));

    let payloads = tracer.payloads();
    assert_eq!(payloads.len(), 1);
    assert_eq!(payloads[0].status_code, 500);
    assert_eq!(payloads[0].errors.len(), 1);
    assert_eq!(payloads[0].errors[0].error_type, "panic");
    assert_eq!(payloads[0].errors[0].message, "inner service exploded");
}

#[tokio::test]
async fn test_errors_reported_by_inner_service_reach_payload() {
    let tracer = InMemoryTracer::new();
    let layer = MonoscopeLayer::with_tracer(Config::new(), tracer.clone());
    let service = layer.layer(service_fn(|req: Req| async move {
        report_error(&req, &UpstreamDown);
        let response = Response::builder()
            .status(StatusCode::BAD_GATEWAY)
            .body(Full::new(Bytes::new()))
            .unwrap();
        Ok::<_, Infallible>(response)
    }));

    let response = service.oneshot(post("/proxy", "{}")).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let payload = &tracer.payloads()[0];
    assert_eq!(payload.status_code, 502);
    assert_eq!(payload.errors[0].message, "upstream unavailable");
}

#[tokio::test]
async fn test_route_match_from_outer_router_is_recorded() {
    let tracer = InMemoryTracer::new();
    let layer = MonoscopeLayer::with_tracer(Config::new(), tracer.clone());
    let service = layer.layer(service_fn(|_req: Req| async {
        Ok::<_, Infallible>(Response::new(Full::new(Bytes::new())))
    }));

    let mut req = Request::get("/orders/7/items?limit=5")
        .body(Full::new(Bytes::new()))
        .unwrap();
    req.extensions_mut()
        .insert(RouteMatch::new("/orders/{id}/items").param("id", "7"));
    service.oneshot(req).await.unwrap();

    let payload = &tracer.payloads()[0];
    assert_eq!(payload.route(), "/orders/{id}/items");
    assert_eq!(payload.path_params["id"], "7");
    assert_eq!(payload.query_params["limit"], vec!["5"]);
    assert_eq!(payload.method, "GET");
}

#[tokio::test]
async fn test_response_extensions_survive_replay() {
    #[derive(Clone, Debug, PartialEq)]
    struct Marker(u32);

    let layer = MonoscopeLayer::with_tracer(Config::new(), InMemoryTracer::new());
    let service = layer.layer(service_fn(|_req: Req| async {
        let mut response = Response::new(Full::new(Bytes::from_static(b"body")));
        response.extensions_mut().insert(Marker(7));
        Ok::<_, Infallible>(response)
    }));

    let response = service.oneshot(post("/", "{}")).await.unwrap();

    assert_eq!(response.extensions().get::<Marker>(), Some(&Marker(7)));
}

#[tokio::test]
async fn test_tracing_backend_with_subscriber() {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter("monoscope=debug")
        .with_test_writer()
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let service = MonoscopeLayer::new(Config::new().debug(true)).layer(service_fn(
        |_req: Req| async { Ok::<_, Infallible>(Response::new(Full::new(Bytes::new()))) },
    ));

    let response = service.oneshot(post("/", "{}")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
