//! Configuration for the interceptor.
//!
//! A [`Config`] is built once when the middleware is set up and shared
//! read-only by every request afterwards.
//!
//! ```rust
//! use monoscope_core::Config;
//!
//! let config = Config::new()
//!     .service_name("checkout")
//!     .service_version("1.4.2")
//!     .tags(["prod", "eu-west-1"])
//!     .capture_request_body(true)
//!     .capture_response_body(true)
//!     .redact_headers(["Authorization", "Cookie"])
//!     .redact_request_body(["$.password", "$.user.credit_card"]);
//!
//! assert!(config.redacted_headers().contains("authorization"));
//! ```

use crate::redact::{compile_paths, FieldPath};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// What to do with a captured body that redaction paths target but that
/// cannot be parsed as JSON.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnparseableBodyPolicy {
    /// Keep the raw, unredacted body in the payload.
    #[default]
    Include,
    /// Leave the body out of the payload.
    Omit,
}

/// Interceptor configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub(crate) service_name: String,
    pub(crate) service_version: Option<String>,
    pub(crate) tags: Vec<String>,
    pub(crate) debug: bool,
    pub(crate) capture_request_body: bool,
    pub(crate) capture_response_body: bool,
    pub(crate) redact_headers: HashSet<String>,
    pub(crate) redact_request_body: Vec<FieldPath>,
    pub(crate) redact_response_body: Vec<FieldPath>,
    pub(crate) unparseable_body: UnparseableBodyPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    /// Create a configuration with default values.
    ///
    /// Defaults:
    /// - Service name: "monoscope-service"
    /// - No version, no tags, debug off
    /// - Body capture disabled in both directions
    /// - Nothing redacted
    /// - Unparseable bodies included as-is
    pub fn new() -> Self {
        Self {
            service_name: "monoscope-service".to_string(),
            service_version: None,
            tags: Vec::new(),
            debug: false,
            capture_request_body: false,
            capture_response_body: false,
            redact_headers: HashSet::new(),
            redact_request_body: Vec::new(),
            redact_response_body: Vec::new(),
            unparseable_body: UnparseableBodyPolicy::default(),
        }
    }

    /// Set the service name.
    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = name.into();
        self
    }

    /// Set the service version.
    pub fn service_version(mut self, version: impl Into<String>) -> Self {
        self.service_version = Some(version.into());
        self
    }

    /// Set the free-form tags attached to every payload.
    pub fn tags(mut self, tags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Enable debug logging of every built payload.
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Enable or disable request body capture.
    pub fn capture_request_body(mut self, capture: bool) -> Self {
        self.capture_request_body = capture;
        self
    }

    /// Enable or disable response body capture.
    ///
    /// Captured bodies are buffered in full; leave this off for routes that
    /// stream large responses.
    pub fn capture_response_body(mut self, capture: bool) -> Self {
        self.capture_response_body = capture;
        self
    }

    /// Set the headers removed from both request and response captures.
    ///
    /// Header names are case-insensitive.
    pub fn redact_headers(mut self, headers: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.redact_headers = headers
            .into_iter()
            .map(|h| h.into().trim().to_ascii_lowercase())
            .filter(|h| !h.is_empty())
            .collect();
        self
    }

    /// Set the field paths masked in captured request bodies.
    ///
    /// Invalid paths are logged and ignored.
    pub fn redact_request_body(mut self, paths: impl IntoIterator<Item = impl AsRef<str>>) -> Self {
        self.redact_request_body = compile_paths(paths);
        self
    }

    /// Set the field paths masked in captured response bodies.
    ///
    /// Invalid paths are logged and ignored.
    pub fn redact_response_body(
        mut self,
        paths: impl IntoIterator<Item = impl AsRef<str>>,
    ) -> Self {
        self.redact_response_body = compile_paths(paths);
        self
    }

    /// Choose what happens to bodies that cannot be parsed for redaction.
    pub fn unparseable_body(mut self, policy: UnparseableBodyPolicy) -> Self {
        self.unparseable_body = policy;
        self
    }

    /// Service name.
    pub fn get_service_name(&self) -> &str {
        &self.service_name
    }

    /// Service version, if set.
    pub fn get_service_version(&self) -> Option<&str> {
        self.service_version.as_deref()
    }

    /// Tags attached to every payload.
    pub fn get_tags(&self) -> &[String] {
        &self.tags
    }

    /// Whether debug logging is on.
    pub fn is_debug(&self) -> bool {
        self.debug
    }

    /// Whether request bodies are captured.
    pub fn captures_request_body(&self) -> bool {
        self.capture_request_body
    }

    /// Whether response bodies are captured.
    pub fn captures_response_body(&self) -> bool {
        self.capture_response_body
    }

    /// Lower-cased header names to remove.
    pub fn redacted_headers(&self) -> &HashSet<String> {
        &self.redact_headers
    }

    /// Compiled request body redaction paths.
    pub fn request_body_paths(&self) -> &[FieldPath] {
        &self.redact_request_body
    }

    /// Compiled response body redaction paths.
    pub fn response_body_paths(&self) -> &[FieldPath] {
        &self.redact_response_body
    }

    /// Policy for unparseable bodies.
    pub fn unparseable_body_policy(&self) -> UnparseableBodyPolicy {
        self.unparseable_body
    }
}
