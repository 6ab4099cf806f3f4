//! # monoscope-tower
//!
//! Tower middleware for Monoscope.
//!
//! [`MonoscopeLayer`] wraps any `tower::Service` over `http` requests and
//! responses. Every request yields one telemetry payload tagged
//! `RustTower`, attached to a `monoscope.http` server span.
//!
//! Route templates are not known at this level: put a
//! [`RouteMatch`](monoscope_core::RouteMatch) into the request extensions
//! before this layer runs to have it recorded.
//!
//! ## Features
//!
//! - `env` - `MonoscopeLayer::from_env()`
//! - `otel` - re-exports the OpenTelemetry span backend
//!
//! ## Example
//!
//! ```rust,ignore
//! use monoscope_tower::{Config, MonoscopeLayer};
//! use tower::ServiceBuilder;
//!
//! let service = ServiceBuilder::new()
//!     .layer(MonoscopeLayer::new(
//!         Config::new()
//!             .capture_response_body(true)
//!             .redact_response_body(["$.token"]),
//!     ))
//!     .service(app);
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

mod layer;

pub use layer::{MonoscopeLayer, MonoscopeService};
pub use monoscope_core::{
    report_error, report_error_current, Config, CorrelationState, InterceptedBody, RouteMatch,
    UnparseableBodyPolicy,
};

#[cfg(feature = "otel")]
pub use monoscope_core::OtelTracer;
