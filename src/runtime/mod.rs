// SPDX-License-Identifier: MIT OR Apache-2.0

//! Runtime utilities for resilience and observability, shared by every
//! component that makes an outbound or proxied call: retry policies,
//! circuit breakers, structured logging, Prometheus-text metrics, and
//! `tracing` spans.

mod circuit_breaker;
mod logging;
mod metrics;
mod retry;
pub mod tracing;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use logging::{
    log_request, InterceptorMetrics, LogLevel, LoggingConfig, RequestLogger, RequestSpan,
};
pub use metrics::{MetricsCollector, MetricsConfig, MetricsConfigBuilder, MetricsSnapshot};
pub use retry::{
    BackoffStrategy, CustomRetryPolicy, DefaultRetryPolicy, ExponentialBackoff, FixedBackoff,
    LinearBackoff, NoBackoff, NoRetryPolicy, RetryConfig, RetryConfigBuilder, RetryPolicy,
};
pub use tracing::{OperationKind, OperationSpan, SpanFactory, TracingConfig, TracingConfigBuilder};
