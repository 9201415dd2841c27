// SPDX-License-Identifier: MIT OR Apache-2.0

//! `tracing` span helpers for the core's three call kinds: IPMI device
//! operations, outbound HTTP (Redfish, RTE, Electricity Maps, WattTime,
//! Prometheus-compatible backends), and proxied requests forwarded to a
//! backend on behalf of a cluster.
//!
//! # Example
//!
//! ```
//! use ceems_core::runtime::tracing::OperationSpan;
//! use std::time::Duration;
//!
//! let span = OperationSpan::http("redfish.chassis_power", "https://bmc.local/redfish/v1");
//! span.record_success(Duration::from_millis(42));
//! ```

use std::time::{Duration, Instant};
use tracing::{field, info_span, Span};

/// Configuration for span creation.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Service name recorded on every span.
    pub service_name: String,
    /// Whether to record request payloads (may contain sensitive data).
    pub record_payloads: bool,
    /// Whether to record response payloads.
    pub record_responses: bool,
    /// Maximum payload size to record (in bytes).
    pub max_payload_size: usize,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            service_name: "ceems-core".to_string(),
            record_payloads: false,
            record_responses: false,
            max_payload_size: 4096,
        }
    }
}

impl TracingConfig {
    /// Create a new builder for `TracingConfig`.
    #[must_use]
    pub fn builder() -> TracingConfigBuilder {
        TracingConfigBuilder::default()
    }
}

/// Builder for `TracingConfig`.
#[derive(Debug, Default)]
pub struct TracingConfigBuilder {
    service_name: Option<String>,
    record_payloads: Option<bool>,
    record_responses: Option<bool>,
    max_payload_size: Option<usize>,
}

impl TracingConfigBuilder {
    /// Set the service name.
    #[must_use]
    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }

    /// Enable recording of request payloads.
    #[must_use]
    pub fn record_payloads(mut self, enabled: bool) -> Self {
        self.record_payloads = Some(enabled);
        self
    }

    /// Enable recording of response payloads.
    #[must_use]
    pub fn record_responses(mut self, enabled: bool) -> Self {
        self.record_responses = Some(enabled);
        self
    }

    /// Set maximum payload size to record.
    #[must_use]
    pub fn max_payload_size(mut self, size: usize) -> Self {
        self.max_payload_size = Some(size);
        self
    }

    /// Build the `TracingConfig`.
    #[must_use]
    pub fn build(self) -> TracingConfig {
        let default = TracingConfig::default();
        TracingConfig {
            service_name: self.service_name.unwrap_or(default.service_name),
            record_payloads: self.record_payloads.unwrap_or(default.record_payloads),
            record_responses: self.record_responses.unwrap_or(default.record_responses),
            max_payload_size: self.max_payload_size.unwrap_or(default.max_payload_size),
        }
    }
}

/// The three kinds of outbound call the core instruments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    /// A raw ioctl call against an `/dev/ipmi*` character device.
    Ipmi,
    /// An outbound HTTPS call (Redfish, an emission-factor provider, or the
    /// shared Prometheus HTTP API client).
    Http,
    /// A request forwarded by the load balancer to a cluster's backend.
    Proxy,
}

impl OperationKind {
    fn as_str(self) -> &'static str {
        match self {
            OperationKind::Ipmi => "ipmi",
            OperationKind::Http => "http",
            OperationKind::Proxy => "proxy",
        }
    }
}

/// A span for one outbound call, carrying enough fields to reconstruct a
/// request's fate from logs alone: the operation kind, its target, and
/// (once finished) status and duration.
#[derive(Debug)]
pub struct OperationSpan {
    span: Span,
    start: Instant,
    operation: String,
    target: String,
}

impl OperationSpan {
    fn new(kind: OperationKind, operation: &str, target: &str) -> Self {
        let span = info_span!(
            "ceems.call",
            kind = kind.as_str(),
            operation = %operation,
            target = %target,
            status = field::Empty,
            error.message = field::Empty,
            duration_ms = field::Empty,
        );

        Self {
            span,
            start: Instant::now(),
            operation: operation.to_string(),
            target: target.to_string(),
        }
    }

    /// Create a span for an IPMI device operation.
    #[must_use]
    pub fn ipmi(operation: &str, device_path: &str) -> Self {
        Self::new(OperationKind::Ipmi, operation, device_path)
    }

    /// Create a span for an outbound HTTP call.
    #[must_use]
    pub fn http(operation: &str, url: &str) -> Self {
        Self::new(OperationKind::Http, operation, url)
    }

    /// Create a span for a proxied request.
    #[must_use]
    pub fn proxy(cluster_id: &str, backend: &str) -> Self {
        Self::new(OperationKind::Proxy, cluster_id, backend)
    }

    /// Get the underlying `tracing::Span`.
    #[must_use]
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Get the operation name.
    #[must_use]
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Get the call target (device path, URL, or backend address).
    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Get elapsed time since span creation.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Record a successful response.
    pub fn record_success(&self, duration: Duration) {
        self.span.record("status", "ok");
        self.span.record("duration_ms", duration.as_millis() as i64);
    }

    /// Record an error response.
    pub fn record_error(&self, error: &str) {
        let duration = self.start.elapsed();
        self.span.record("status", "error");
        self.span.record("error.message", error);
        self.span.record("duration_ms", duration.as_millis() as i64);
    }

    /// Enter the span context for synchronous work (e.g. the blocking ioctl
    /// call dispatched onto a `spawn_blocking` thread).
    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }
}

/// Instruments a fallible expression with an [`OperationSpan`], recording
/// success or error and returning the expression's result unchanged.
///
/// # Example
///
/// ```rust,ignore
/// use ceems_core::instrument_call;
///
/// let reading = instrument_call!(OperationSpan::ipmi("dcmi_power_reading", "/dev/ipmi0"), {
/// client.dcmi_power_reading()
/// });
/// ```
#[macro_export]
macro_rules! instrument_call {
    ($span:expr, $body:expr) => {{
            let span = $span;
            let _guard = span.enter();
            let start = std::time::Instant::now();
            let result = $body;
            let duration = start.elapsed();
            match &result {
                Ok(_) => span.record_success(duration),
                Err(e) => span.record_error(&format!("{}", e)),
            }
            result
    }};
}

/// Span factory for creating consistently-configured spans across the
/// crate's components.
#[derive(Debug, Clone)]
pub struct SpanFactory {
    config: TracingConfig,
}

impl SpanFactory {
    /// Create a new span factory with the given configuration.
    #[must_use]
    pub fn new(config: TracingConfig) -> Self {
        Self { config }
    }

    /// Create a span for an IPMI operation.
    #[must_use]
    pub fn ipmi_span(&self, operation: &str, device_path: &str) -> OperationSpan {
        OperationSpan::ipmi(operation, device_path)
    }

    /// Create a span for an HTTP call.
    #[must_use]
    pub fn http_span(&self, operation: &str, url: &str) -> OperationSpan {
        OperationSpan::http(operation, url)
    }

    /// Create a span for a proxied request.
    #[must_use]
    pub fn proxy_span(&self, cluster_id: &str, backend: &str) -> OperationSpan {
        OperationSpan::proxy(cluster_id, backend)
    }

    /// Get the configuration.
    #[must_use]
    pub fn config(&self) -> &TracingConfig {
        &self.config
    }
}

impl Default for SpanFactory {
    fn default() -> Self {
        Self::new(TracingConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracing_config_default() {
        let config = TracingConfig::default();
        assert_eq!(config.service_name, "ceems-core");
        assert!(!config.record_payloads);
    }

    #[test]
    fn test_tracing_config_builder() {
        let config = TracingConfig::builder()
        .service_name("ceems-proxy")
        .record_payloads(true)
        .max_payload_size(8192)
        .build();

        assert_eq!(config.service_name, "ceems-proxy");
        assert!(config.record_payloads);
        assert_eq!(config.max_payload_size, 8192);
    }

    #[test]
    fn test_operation_span_ipmi() {
        let span = OperationSpan::ipmi("dcmi_power_reading", "/dev/ipmi0");
        assert_eq!(span.operation(), "dcmi_power_reading");
        assert_eq!(span.target(), "/dev/ipmi0");
    }

    #[test]
    fn test_operation_span_http() {
        let span = OperationSpan::http("redfish.chassis_power", "https://bmc.local");
        assert_eq!(span.operation(), "redfish.chassis_power");
    }

    #[test]
    fn test_operation_span_proxy() {
        let span = OperationSpan::proxy("cluster-a", "10.0.0.5:9090");
        assert_eq!(span.operation(), "cluster-a");
        assert_eq!(span.target(), "10.0.0.5:9090");
    }

    #[test]
    fn test_operation_span_record_success() {
        let span = OperationSpan::http("redfish.chassis_power", "https://bmc.local");
        span.record_success(Duration::from_millis(42));
    }

    #[test]
    fn test_operation_span_record_error() {
        let span = OperationSpan::ipmi("dcmi_power_reading", "/dev/ipmi0");
        span.record_error("completion code 0xc1");
    }

    #[test]
    fn test_span_factory() {
        let factory = SpanFactory::default();
        let span = factory.ipmi_span("dcmi_power_reading", "/dev/ipmi0");
        assert_eq!(span.operation(), "dcmi_power_reading");
    }

    #[test]
    fn test_operation_span_elapsed() {
        let span = OperationSpan::http("rte.tempo_now", "https://digital.rte-france.com");
        std::thread::sleep(Duration::from_millis(10));
        assert!(span.elapsed() >= Duration::from_millis(10));
    }
}
