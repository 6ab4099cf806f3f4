//! Loading [`Config`] from `MONOSCOPE_*` environment variables.
//!
//! | Variable                          | Config setter                |
//! |-----------------------------------|------------------------------|
//! | `MONOSCOPE_SERVICE_NAME`          | `service_name`               |
//! | `MONOSCOPE_SERVICE_VERSION`       | `service_version`            |
//! | `MONOSCOPE_TAGS`                  | `tags` (comma separated)     |
//! | `MONOSCOPE_DEBUG`                 | `debug`                      |
//! | `MONOSCOPE_CAPTURE_REQUEST_BODY`  | `capture_request_body`       |
//! | `MONOSCOPE_CAPTURE_RESPONSE_BODY` | `capture_response_body`      |
//! | `MONOSCOPE_REDACT_HEADERS`        | `redact_headers`             |
//! | `MONOSCOPE_REDACT_REQUEST_BODY`   | `redact_request_body`        |
//! | `MONOSCOPE_REDACT_RESPONSE_BODY`  | `redact_response_body`       |
//! | `MONOSCOPE_UNPARSEABLE_BODY`      | `unparseable_body`           |

use crate::config::{Config, UnparseableBodyPolicy};
use crate::error::Result;
use serde::Deserialize;

/// Prefix shared by every recognized variable.
pub const ENV_PREFIX: &str = "MONOSCOPE_";

#[derive(Debug, Deserialize)]
struct EnvConfig {
    service_name: Option<String>,
    service_version: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    debug: bool,
    #[serde(default)]
    capture_request_body: bool,
    #[serde(default)]
    capture_response_body: bool,
    #[serde(default)]
    redact_headers: Vec<String>,
    #[serde(default)]
    redact_request_body: Vec<String>,
    #[serde(default)]
    redact_response_body: Vec<String>,
    #[serde(default)]
    unparseable_body: UnparseableBodyPolicy,
}

fn non_empty(values: Vec<String>) -> impl Iterator<Item = String> {
    values
        .into_iter()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl From<EnvConfig> for Config {
    fn from(env: EnvConfig) -> Self {
        let mut config = Config::new()
            .tags(non_empty(env.tags))
            .debug(env.debug)
            .capture_request_body(env.capture_request_body)
            .capture_response_body(env.capture_response_body)
            .redact_headers(non_empty(env.redact_headers))
            .redact_request_body(non_empty(env.redact_request_body))
            .redact_response_body(non_empty(env.redact_response_body))
            .unparseable_body(env.unparseable_body);

        if let Some(name) = env.service_name.filter(|n| !n.is_empty()) {
            config = config.service_name(name);
        }
        if let Some(version) = env.service_version.filter(|v| !v.is_empty()) {
            config = config.service_version(version);
        }
        config
    }
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// A `.env` file in the working directory is loaded first when present.
    pub fn from_env() -> Result<Self> {
        if let Err(error) = dotenvy::dotenv() {
            tracing::trace!(target: "monoscope::config", %error, "no .env file loaded");
        }
        let env: EnvConfig = envy::prefixed(ENV_PREFIX).from_env()?;
        Ok(env.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: &[&str] = &[
        "MONOSCOPE_SERVICE_NAME",
        "MONOSCOPE_SERVICE_VERSION",
        "MONOSCOPE_TAGS",
        "MONOSCOPE_DEBUG",
        "MONOSCOPE_CAPTURE_REQUEST_BODY",
        "MONOSCOPE_CAPTURE_RESPONSE_BODY",
        "MONOSCOPE_REDACT_HEADERS",
        "MONOSCOPE_REDACT_REQUEST_BODY",
        "MONOSCOPE_REDACT_RESPONSE_BODY",
        "MONOSCOPE_UNPARSEABLE_BODY",
    ];

    fn clear() {
        for var in VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_from_env_reads_all_options() {
        clear();
        std::env::set_var("MONOSCOPE_SERVICE_NAME", "billing");
        std::env::set_var("MONOSCOPE_SERVICE_VERSION", "3.1.0");
        std::env::set_var("MONOSCOPE_TAGS", "prod,eu");
        std::env::set_var("MONOSCOPE_DEBUG", "true");
        std::env::set_var("MONOSCOPE_CAPTURE_REQUEST_BODY", "true");
        std::env::set_var("MONOSCOPE_REDACT_HEADERS", "Authorization,Cookie");
        std::env::set_var("MONOSCOPE_REDACT_REQUEST_BODY", "$.password,$.card.number");
        std::env::set_var("MONOSCOPE_UNPARSEABLE_BODY", "omit");

        let config = Config::from_env().unwrap();
        clear();

        assert_eq!(config.get_service_name(), "billing");
        assert_eq!(config.get_service_version(), Some("3.1.0"));
        assert_eq!(config.get_tags(), ["prod", "eu"]);
        assert!(config.is_debug());
        assert!(config.captures_request_body());
        assert!(!config.captures_response_body());
        assert!(config.redacted_headers().contains("cookie"));
        assert_eq!(config.request_body_paths().len(), 2);
        assert_eq!(config.unparseable_body_policy(), UnparseableBodyPolicy::Omit);
    }

    #[test]
    #[serial]
    fn test_from_env_defaults_when_unset() {
        clear();

        let config = Config::from_env().unwrap();

        assert_eq!(config.get_service_name(), "monoscope-service");
        assert!(config.get_tags().is_empty());
        assert!(!config.is_debug());
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_bad_bool() {
        clear();
        std::env::set_var("MONOSCOPE_DEBUG", "maybe");

        let result = Config::from_env();
        clear();

        assert!(result.is_err());
    }
}
