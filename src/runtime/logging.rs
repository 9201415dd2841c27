// SPDX-License-Identifier: MIT OR Apache-2.0

//! Structured request logging shared by every outbound call the core makes —
//! IPMI device opens, Redfish/RTE/Electricity-Maps/WattTime HTTP calls, and
//! proxied requests forwarded to a cluster's Prometheus-compatible backend.
//!
//! # Example
//!
//! ```
//! use ceems_core::runtime::{RequestLogger, LoggingConfig, LogLevel};
//!
//! let logger = RequestLogger::new();
//! let span = logger.start("redfish.chassis_power");
//! logger.finish_success(span);
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, error, info, trace, warn};

/// Log level for the request logger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    /// Trace level - most verbose.
    Trace,
    /// Debug level.
    Debug,
    /// Info level.
    #[default]
    Info,
    /// Warn level.
    Warn,
    /// Error level - only errors.
    Error,
    /// Disabled - no logging.
    Off,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "TRACE"),
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
            LogLevel::Off => write!(f, "OFF"),
        }
    }
}

/// Configuration for the request logger.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Log level for successful requests.
    pub success_level: LogLevel,
    /// Log level for failed requests.
    pub error_level: LogLevel,
    /// Whether to log request headers/metadata.
    pub log_metadata: bool,
    /// Whether to log the request path/operation name.
    pub log_path: bool,
    /// Whether to redact sensitive headers.
    pub redact_sensitive: bool,
    /// List of sensitive header names to redact (case-insensitive).
    pub sensitive_headers: Vec<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            success_level: LogLevel::Info,
            error_level: LogLevel::Error,
            log_metadata: true,
            log_path: true,
            redact_sensitive: true,
            sensitive_headers: vec![
                "authorization".to_string(),
                "x-api-key".to_string(),
                "x-auth-token".to_string(),
            ],
        }
    }
}

impl LoggingConfig {
    /// Create a new logging configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the success log level.
    #[must_use]
    pub fn with_success_level(mut self, level: LogLevel) -> Self {
        self.success_level = level;
        self
    }

    /// Set the error log level.
    #[must_use]
    pub fn with_error_level(mut self, level: LogLevel) -> Self {
        self.error_level = level;
        self
    }

    /// Enable or disable metadata logging.
    #[must_use]
    pub fn with_metadata(mut self, enabled: bool) -> Self {
        self.log_metadata = enabled;
        self
    }

    /// Enable or disable path logging.
    #[must_use]
    pub fn with_path(mut self, enabled: bool) -> Self {
        self.log_path = enabled;
        self
    }

    /// Enable or disable sensitive data redaction.
    #[must_use]
    pub fn with_redaction(mut self, enabled: bool) -> Self {
        self.redact_sensitive = enabled;
        self
    }

    /// Add a sensitive header to redact.
    #[must_use]
    pub fn with_sensitive_header(mut self, header: impl Into<String>) -> Self {
        self.sensitive_headers.push(header.into());
        self
    }

    /// Create a verbose configuration for debugging.
    #[must_use]
    pub fn verbose() -> Self {
        Self {
            success_level: LogLevel::Debug,
            error_level: LogLevel::Error,
            log_metadata: true,
            log_path: true,
            redact_sensitive: true,
            sensitive_headers: vec![
                "authorization".to_string(),
                "x-api-key".to_string(),
                "x-auth-token".to_string(),
            ],
        }
    }

    /// Create a quiet configuration for production.
    #[must_use]
    pub fn quiet() -> Self {
        Self {
            success_level: LogLevel::Off,
            error_level: LogLevel::Warn,
            log_metadata: false,
            log_path: true,
            redact_sensitive: true,
            sensitive_headers: vec![
                "authorization".to_string(),
                "x-api-key".to_string(),
                "x-auth-token".to_string(),
            ],
        }
    }

    fn redact<'a>(&self, headers: &'a HashMap<String, String>) -> Vec<(String, &'a str)> {
        headers
        .iter()
        .map(|(k, v)| {
                if self.redact_sensitive
                && self
                .sensitive_headers
                .iter()
                .any(|h| h.eq_ignore_ascii_case(k))
                {
                    (k.clone(), "[REDACTED]")
                } else {
                    (k.clone(), v.as_str())
                }
        })
        .collect()
    }
}

/// Metrics collected by the request logger.
#[derive(Debug, Default)]
pub struct InterceptorMetrics {
    total_requests: AtomicU64,
    successful_requests: AtomicU64,
    failed_requests: AtomicU64,
}

impl InterceptorMetrics {
    /// Create a new metrics instance.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful request.
    pub fn record_success(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.successful_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed request.
    pub fn record_failure(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.failed_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the total number of requests.
    #[must_use]
    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    /// Get the number of successful requests.
    #[must_use]
    pub fn successful_requests(&self) -> u64 {
        self.successful_requests.load(Ordering::Relaxed)
    }

    /// Get the number of failed requests.
    #[must_use]
    pub fn failed_requests(&self) -> u64 {
        self.failed_requests.load(Ordering::Relaxed)
    }

    /// Get the success rate (0.0 to 1.0).
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        let total = self.total_requests.load(Ordering::Relaxed);
        if total == 0 {
            return 1.0;
        }
        let successful = self.successful_requests.load(Ordering::Relaxed);
        successful as f64 / total as f64
    }

    /// Reset all metrics.
    pub fn reset(&self) {
        self.total_requests.store(0, Ordering::Relaxed);
        self.successful_requests.store(0, Ordering::Relaxed);
        self.failed_requests.store(0, Ordering::Relaxed);
    }
}

/// Logs the start of an outbound call, applying header redaction.
///
/// Call this once per operation (IPMI open, Redfish GET, proxied forward)
/// before doing the work; pair with [`RequestLogger`] for timing.
pub fn log_request(config: &LoggingConfig, operation: &str, headers: &HashMap<String, String>) {
    if config.success_level == LogLevel::Off {
        return;
    }

    let metadata_str = if config.log_metadata && !headers.is_empty() {
        let parts: Vec<String> = config
        .redact(headers)
        .into_iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect();
        format!(" headers=[{}]", parts.join(", "))
    } else {
        String::new()
    };

    let path_str = if config.log_path {
        format!(" op={operation}")
    } else {
        String::new()
    };

    match config.success_level {
        LogLevel::Trace => trace!(target: "ceems_core::io", "request{}{}", path_str, metadata_str),
        LogLevel::Debug => debug!(target: "ceems_core::io", "request{}{}", path_str, metadata_str),
        LogLevel::Info => info!(target: "ceems_core::io", "request{}{}", path_str, metadata_str),
        LogLevel::Warn => warn!(target: "ceems_core::io", "request{}{}", path_str, metadata_str),
        LogLevel::Error => error!(target: "ceems_core::io", "request{}{}", path_str, metadata_str),
        LogLevel::Off => {}
    }
}

/// A request logger that tracks timing and logs responses.
#[derive(Debug)]
pub struct RequestLogger {
    config: LoggingConfig,
    metrics: InterceptorMetrics,
}

impl RequestLogger {
    /// Create a new request logger.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: LoggingConfig::default(),
            metrics: InterceptorMetrics::new(),
        }
    }

    /// Create a request logger with custom configuration.
    #[must_use]
    pub fn with_config(config: LoggingConfig) -> Self {
        Self {
            config,
            metrics: InterceptorMetrics::new(),
        }
    }

    /// Get the configuration.
    #[must_use]
    pub fn config(&self) -> &LoggingConfig {
        &self.config
    }

    /// Get the metrics.
    #[must_use]
    pub fn metrics(&self) -> &InterceptorMetrics {
        &self.metrics
    }

    /// Start tracking a request.
    #[must_use]
    pub fn start(&self, operation: &str) -> RequestSpan {
        RequestSpan {
            operation: operation.to_string(),
            start: Instant::now(),
        }
    }

    /// Finish tracking a request (success).
    pub fn finish_success(&self, span: RequestSpan) {
        self.metrics.record_success();
        let elapsed = span.start.elapsed();

        if self.config.success_level == LogLevel::Off {
            return;
        }

        let msg = format!("response: {} completed in {:?}", span.operation, elapsed);

        match self.config.success_level {
            LogLevel::Trace => trace!(target: "ceems_core::io", "{}", msg),
            LogLevel::Debug => debug!(target: "ceems_core::io", "{}", msg),
            LogLevel::Info => info!(target: "ceems_core::io", "{}", msg),
            LogLevel::Warn => warn!(target: "ceems_core::io", "{}", msg),
            LogLevel::Error => error!(target: "ceems_core::io", "{}", msg),
            LogLevel::Off => {}
        }
    }

    /// Finish tracking a request (failure).
    pub fn finish_error(&self, span: RequestSpan, error: &str) {
        self.metrics.record_failure();
        let elapsed = span.start.elapsed();

        if self.config.error_level == LogLevel::Off {
            return;
        }

        let msg = format!(
            "error: {} failed in {:?}: {}",
            span.operation, elapsed, error
        );

        match self.config.error_level {
            LogLevel::Trace => trace!(target: "ceems_core::io", "{}", msg),
            LogLevel::Debug => debug!(target: "ceems_core::io", "{}", msg),
            LogLevel::Info => info!(target: "ceems_core::io", "{}", msg),
            LogLevel::Warn => warn!(target: "ceems_core::io", "{}", msg),
            LogLevel::Error => error!(target: "ceems_core::io", "{}", msg),
            LogLevel::Off => {}
        }
    }
}

impl Default for RequestLogger {
    fn default() -> Self {
        Self::new()
    }
}

/// A span representing an in-flight request.
#[derive(Debug)]
pub struct RequestSpan {
    operation: String,
    start: Instant,
}

impl RequestSpan {
    /// Get the operation name.
    #[must_use]
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Get the elapsed time since the request started.
    #[must_use]
    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_display() {
        assert_eq!(LogLevel::Trace.to_string(), "TRACE");
        assert_eq!(LogLevel::Off.to_string(), "OFF");
    }

    #[test]
    fn test_log_level_default() {
        assert_eq!(LogLevel::default(), LogLevel::Info);
    }

    #[test]
    fn test_logging_config_builder() {
        let config = LoggingConfig::new()
        .with_success_level(LogLevel::Debug)
        .with_error_level(LogLevel::Warn)
        .with_metadata(false)
        .with_path(false)
        .with_redaction(false)
        .with_sensitive_header("x-custom-auth");

        assert_eq!(config.success_level, LogLevel::Debug);
        assert!(!config.log_metadata);
        assert!(config
            .sensitive_headers
            .contains(&"x-custom-auth".to_string()));
    }

    #[test]
    fn test_redact() {
        let config = LoggingConfig::default();
        let mut headers = HashMap::new();
        headers.insert("Authorization".to_string(), "Basic xyz".to_string());
        headers.insert("X-Ceems-Cluster-Id".to_string(), "cluster-a".to_string());

        let redacted = config.redact(&headers);
        let auth = redacted.iter().find(|(k, _)| k == "Authorization").unwrap();
        assert_eq!(auth.1, "[REDACTED]");
        let cluster = redacted
        .iter()
        .find(|(k, _)| k == "X-Ceems-Cluster-Id")
        .unwrap();
        assert_eq!(cluster.1, "cluster-a");
    }

    #[test]
    fn test_interceptor_metrics() {
        let metrics = InterceptorMetrics::new();
        assert_eq!(metrics.success_rate(), 1.0);

        metrics.record_success();
        metrics.record_success();
        metrics.record_failure();

        assert_eq!(metrics.total_requests(), 3);
        assert_eq!(metrics.successful_requests(), 2);
        assert_eq!(metrics.failed_requests(), 1);
        assert!((metrics.success_rate() - 0.666_666_666_666_666_6).abs() < 0.001);
    }

    #[test]
    fn test_request_logger() {
        let logger = RequestLogger::new();
        let span = logger.start("ipmi.dcmi_power_reading");

        assert_eq!(span.operation(), "ipmi.dcmi_power_reading");
        assert!(span.elapsed() < std::time::Duration::from_secs(1));

        logger.finish_success(span);
        assert_eq!(logger.metrics().total_requests(), 1);
        assert_eq!(logger.metrics().successful_requests(), 1);
    }

    #[test]
    fn test_request_logger_error() {
        let logger = RequestLogger::with_config(LoggingConfig::quiet());
        let span = logger.start("redfish.chassis_power");

        logger.finish_error(span, "timed out after 2s");
        assert_eq!(logger.metrics().total_requests(), 1);
        assert_eq!(logger.metrics().failed_requests(), 1);
    }
}
