//! The telemetry record built once per request.

use crate::capture::{CapturedRequest, CapturedResponse, HeaderFields};
use crate::config::{Config, UnparseableBodyPolicy};
use crate::correlation::{CorrelationState, ReportedError};
use crate::error::Result;
use crate::redact::{redact_body, redact_headers, BodyRedaction, FieldPath};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// SDK tag for payloads produced by the tower adapter.
pub const SDK_TOWER: &str = "RustTower";

/// A span attribute value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeValue {
    /// String attribute
    Str(String),
    /// Integer attribute
    Int(i64),
}

/// One request/response exchange, redacted and correlated.
#[derive(Debug, Clone, Serialize)]
pub struct Payload {
    /// Unix timestamp (milliseconds) when the payload was built
    pub timestamp: u64,
    /// Time from interception start to payload build, in nanoseconds
    pub duration_ns: u64,
    /// Which adapter produced this payload
    pub sdk_type: String,
    /// Service name from config
    pub service_name: String,
    /// Service version from config
    pub service_version: Option<String>,
    /// Tags from config
    pub tags: Vec<String>,
    /// Correlation message id
    pub msg_id: Uuid,
    /// HTTP method
    pub method: String,
    /// Request host
    pub host: String,
    /// Path and query as received
    pub raw_url: String,
    /// Route template, empty when the router gave none
    pub url_path: String,
    /// `Referer` header
    pub referer: String,
    /// Protocol major version
    pub proto_major: u8,
    /// Protocol minor version
    pub proto_minor: u8,
    /// Path parameters
    pub path_params: BTreeMap<String, String>,
    /// Query parameters
    pub query_params: BTreeMap<String, Vec<String>>,
    /// Request headers, redacted
    pub request_headers: HeaderFields,
    /// Response headers, redacted
    pub response_headers: HeaderFields,
    /// Request body (base64 when serialized), redacted
    #[serde(serialize_with = "serialize_body")]
    pub request_body: Option<Bytes>,
    /// Response body (base64 when serialized), redacted
    #[serde(serialize_with = "serialize_body")]
    pub response_body: Option<Bytes>,
    /// Response status code
    pub status_code: u16,
    /// Errors reported up to the moment the payload was built
    pub errors: Vec<ReportedError>,
}

fn serialize_body<S: Serializer>(
    body: &Option<Bytes>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    match body {
        Some(bytes) => serializer.serialize_some(&STANDARD.encode(bytes)),
        None => serializer.serialize_none(),
    }
}

impl Payload {
    /// Assemble the payload.
    ///
    /// Headers are redacted in both directions; bodies are included only if
    /// their capture toggle is on, and are redacted with the configured paths.
    /// Never fails: any missing piece is simply empty in the result.
    pub fn build(
        sdk_type: &str,
        request: CapturedRequest,
        response: CapturedResponse,
        config: &Config,
        correlation: &CorrelationState,
        duration: Duration,
    ) -> Self {
        let mut request_headers = request.headers;
        let mut response_headers = response.headers;
        redact_headers(&mut request_headers, &config.redact_headers);
        redact_headers(&mut response_headers, &config.redact_headers);

        let request_body = prepare_body(
            request.body,
            config.capture_request_body,
            &config.redact_request_body,
            config.unparseable_body,
        );
        let response_body = prepare_body(
            response.body,
            config.capture_response_body,
            &config.redact_response_body,
            config.unparseable_body,
        );

        Self {
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64,
            duration_ns: u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX),
            sdk_type: sdk_type.to_string(),
            service_name: config.service_name.clone(),
            service_version: config.service_version.clone(),
            tags: config.tags.clone(),
            msg_id: correlation.message_id(),
            method: request.method,
            host: request.host,
            raw_url: request.raw_url,
            url_path: request.route_template.unwrap_or_default(),
            referer: request.referrer,
            proto_major: request.protocol.0,
            proto_minor: request.protocol.1,
            path_params: request.path_params,
            query_params: request.query_params,
            request_headers,
            response_headers,
            request_body,
            response_body,
            status_code: response.status.as_u16(),
            errors: correlation.snapshot(),
        }
    }

    /// Route used for grouping: the template, or the raw path without query.
    pub fn route(&self) -> &str {
        if self.url_path.is_empty() {
            self.raw_url.split('?').next().unwrap_or_default()
        } else {
            &self.url_path
        }
    }

    /// Serialize the payload as JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Flatten the payload into span attributes.
    pub fn attributes(&self) -> Vec<(String, AttributeValue)> {
        let text = |key: &str, value: String| (key.to_string(), AttributeValue::Str(value));

        let mut attrs = vec![
            text("net.host.name", self.host.clone()),
            text("http.route", self.route().to_string()),
            text("http.target", self.raw_url.clone()),
            text("http.request.method", self.method.clone()),
            (
                "http.response.status_code".to_string(),
                AttributeValue::Int(i64::from(self.status_code)),
            ),
            text("http.request.query_params", to_json(&self.query_params)),
            text("http.request.path_params", to_json(&self.path_params)),
            text("monoscope.msg_id", self.msg_id.to_string()),
            text("monoscope.sdk_type", self.sdk_type.clone()),
            text("monoscope.errors", to_json(&self.errors)),
            text("monoscope.tags", to_json(&self.tags)),
            text(
                "monoscope.service_version",
                self.service_version.clone().unwrap_or_default(),
            ),
            (
                "monoscope.duration_ns".to_string(),
                AttributeValue::Int(i64::try_from(self.duration_ns).unwrap_or(i64::MAX)),
            ),
        ];

        if let Some(body) = &self.request_body {
            attrs.push(text("http.request.body", STANDARD.encode(body)));
        }
        if let Some(body) = &self.response_body {
            attrs.push(text("http.response.body", STANDARD.encode(body)));
        }
        for (name, values) in &self.request_headers {
            attrs.push(text(&format!("http.request.header.{}", name), values.join(",")));
        }
        for (name, values) in &self.response_headers {
            attrs.push(text(&format!("http.response.header.{}", name), values.join(",")));
        }

        attrs
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

fn prepare_body(
    body: Option<Bytes>,
    capture: bool,
    paths: &[FieldPath],
    policy: UnparseableBodyPolicy,
) -> Option<Bytes> {
    if !capture {
        return None;
    }
    let body = body.unwrap_or_default();

    match redact_body(&body, paths) {
        BodyRedaction::Skipped => Some(body),
        BodyRedaction::Redacted(redacted) => Some(Bytes::from(redacted)),
        BodyRedaction::Unparseable => match policy {
            UnparseableBodyPolicy::Include => {
                tracing::debug!(
                    target: "monoscope::payload",
                    "body is not JSON; included without field redaction"
                );
                Some(body)
            }
            UnparseableBodyPolicy::Omit => {
                tracing::debug!(
                    target: "monoscope::payload",
                    "body is not JSON; omitted from payload"
                );
                None
            }
        },
    }
}
