//! Neutral views of the request and response being observed.

use bytes::Bytes;
use http::header::{HOST, REFERER};
use http::request::Parts;
use http::{HeaderMap, StatusCode, Uri, Version};
use std::collections::BTreeMap;

/// Captured headers: lower-cased name to every value sent under that name,
/// in arrival order.
pub type HeaderFields = BTreeMap<String, Vec<String>>;

/// Route information resolved by the router in front of the interceptor.
///
/// Router adapters insert this into the request extensions before the
/// request reaches [`Interceptor::intercept`](crate::Interceptor::intercept).
/// When it is absent the payload carries the raw path only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteMatch {
    /// Path template such as `/users/{id}`
    pub template: Option<String>,
    /// Values bound to the template's parameters
    pub params: BTreeMap<String, String>,
}

impl RouteMatch {
    /// Create a route match for the given template.
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: Some(template.into()),
            params: BTreeMap::new(),
        }
    }

    /// Add a bound path parameter.
    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }
}

/// Everything recorded about the inbound request.
#[derive(Debug, Clone, Default)]
pub struct CapturedRequest {
    /// HTTP method
    pub method: String,
    /// Host from the URI authority or the `Host` header
    pub host: String,
    /// Raw path, without query string
    pub path: String,
    /// Path and query as received
    pub raw_url: String,
    /// Route template, when the router supplied one
    pub route_template: Option<String>,
    /// Path parameters bound by the router
    pub path_params: BTreeMap<String, String>,
    /// Decoded query parameters
    pub query_params: BTreeMap<String, Vec<String>>,
    /// Request headers
    pub headers: HeaderFields,
    /// `Referer` header value, empty when absent
    pub referrer: String,
    /// Protocol version as (major, minor)
    pub protocol: (u8, u8),
    /// Body bytes, present only when request capture is enabled
    pub body: Option<Bytes>,
}

impl CapturedRequest {
    /// Capture everything but the body from request parts.
    pub fn from_parts(parts: &Parts) -> Self {
        let route = parts.extensions.get::<RouteMatch>().cloned().unwrap_or_default();

        let host = parts
            .uri
            .host()
            .map(str::to_string)
            .or_else(|| header_str(&parts.headers, HOST))
            .unwrap_or_default();

        Self {
            method: parts.method.to_string(),
            host,
            path: parts.uri.path().to_string(),
            raw_url: raw_url(&parts.uri),
            route_template: route.template,
            path_params: route.params,
            query_params: query_params(&parts.uri),
            headers: capture_headers(&parts.headers),
            referrer: header_str(&parts.headers, REFERER).unwrap_or_default(),
            protocol: protocol(parts.version),
            body: None,
        }
    }

    /// Attach captured body bytes.
    pub fn with_body(mut self, body: Bytes) -> Self {
        self.body = Some(body);
        self
    }
}

/// Everything recorded about the outbound response.
#[derive(Debug, Clone)]
pub struct CapturedResponse {
    /// Status code after the recorder's defaulting rules
    pub status: StatusCode,
    /// Response headers
    pub headers: HeaderFields,
    /// Body bytes, present only when response capture is enabled
    pub body: Option<Bytes>,
}

impl Default for CapturedResponse {
    fn default() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderFields::new(),
            body: None,
        }
    }
}

/// Copy a header map into the captured shape.
///
/// Values that are not valid UTF-8 are captured lossily.
pub fn capture_headers(headers: &HeaderMap) -> HeaderFields {
    let mut captured = HeaderFields::new();
    for (name, value) in headers.iter() {
        captured
            .entry(name.as_str().to_ascii_lowercase())
            .or_default()
            .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
    }
    captured
}

fn header_str(headers: &HeaderMap, name: http::header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
}

fn raw_url(uri: &Uri) -> String {
    uri.path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| uri.path().to_string())
}

fn query_params(uri: &Uri) -> BTreeMap<String, Vec<String>> {
    let mut params: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let Some(query) = uri.query() else {
        return params;
    };

    for pair in query.split('&').filter(|pair| !pair.is_empty()) {
        let mut parts = pair.splitn(2, '=');
        let key = parts.next().unwrap_or_default();
        let value = parts.next().unwrap_or_default();
        params
            .entry(decode(key))
            .or_default()
            .push(decode(value));
    }
    params
}

fn decode(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|decoded| decoded.into_owned())
        .unwrap_or(spaced)
}

fn protocol(version: Version) -> (u8, u8) {
    match version {
        Version::HTTP_09 => (0, 9),
        Version::HTTP_10 => (1, 0),
        Version::HTTP_2 => (2, 0),
        Version::HTTP_3 => (3, 0),
        _ => (1, 1),
    }
}
