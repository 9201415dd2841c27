// SPDX-License-Identifier: MIT OR Apache-2.0

//! # ceems-core
//!
//! The compute-energy-and-emissions monitoring core: a multi-source host
//! power reader, an emission-factor provider pool, and a load-balancer
//! proxy fronting Prometheus-compatible and Pyroscope-compatible backends.
//!
//! ## Scope
//!
//! This crate implements the three subsystems where the real engineering
//! lives — the rest of a CEEMS deployment (CLI entrypoints, YAML/flag
//! parsing, recording-rule templates, Kubernetes/OpenStack inventory
//! pollers, the aggregation database, the Prometheus exporter HTTP
//! handler) is an external collaborator this crate exposes typed
//! interfaces to, not something it implements itself.
//!
//! - **Host power** ([`power`]) — one polymorphic [`power::PowerSource`]
//! multiplexing RAPL, IPMI-DCMI, Redfish, and Cray `pm_counters`,
//! gated behind a privileged-execution [`security::SecurityContext`]
//! where the underlying ioctl/sysfs access demands it.
//! - **Emission factors** ([`emissions`]) — a concurrent provider pool
//! maintaining live carbon-intensity snapshots for many zones from
//! independent external APIs.
//! - **Load balancer** ([`proxy`]) — a reverse-proxy front-end for
//! multiple backend pools per cluster, routing each query to a live
//! backend by a pluggable strategy and sanitizing sensitive labels out
//! of the response.
//! - **Shared TSDB client** ([`tsdb`]) — a typed Prometheus v1 HTTP API
//! client used by the load balancer's retention discovery.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use ceems_core::config::{PowerConfig, SecurityConfig};
//! use ceems_core::power::PowerMultiplexer;
//! use ceems_core::security::SecurityContext;
//! use std::sync::Arc;
//!
//! # async fn example() -> ceems_core::error::Result<()> {
//! let security = Arc::new(SecurityContext::new(SecurityConfig::native()));
//! let power = PowerMultiplexer::probe(PowerConfig::with_defaults(), security).await?;
//! let reading = power.read().await?;
//! println!("current draw: {} W", reading.current);
//! # Ok(())
//! # }
//! ```
//!
//! ## Module overview
//!
//! - [`power`] — IPMI device client (C1) and host power multiplexer (C2).
//! - [`security`] — capability sets, ACL manager, privileged `exec` (C3).
//! - [`emissions`] — emission-factor provider pool and its providers (C4).
//! - [`proxy`] — load-balancer backends, pools, strategies, sanitizer (C5).
//! - [`tsdb`] — shared Prometheus v1 HTTP client (C6).
//! - [`runtime`] — retry, circuit breaker, metrics, tracing, logging.
//! - [`config`] — typed configuration structs consumed by the above.
//! - [`error`] — crate-wide error type.
//! - [`testkit`] — in-process HTTP stub server and hardware-test gating.
//!
//! ### Retry and circuit breaking
//!
//! ```rust
//! use ceems_core::runtime::{CircuitBreaker, CircuitBreakerConfig};
//! use std::time::Duration;
//!
//! let breaker = CircuitBreaker::new(
//!     CircuitBreakerConfig::new()
//!         .with_failure_threshold(5)
//!         .with_reset_timeout(Duration::from_secs(30)),
//! );
//! ```
//!
//! ### Metrics
//!
//! ```rust
//! use ceems_core::runtime::{MetricsCollector, MetricsConfig};
//!
//! let metrics = MetricsCollector::new(MetricsConfig::builder().namespace("ceems").build());
//! let output = metrics.to_prometheus_text();
//! ```

pub mod config;
pub mod emissions;
pub mod error;
pub mod power;
pub mod proxy;
pub mod runtime;
pub mod security;
pub mod testkit;
pub mod tsdb;

pub use emissions::{EmissionFactor, EmissionPool, EmissionPoolBuilder, EmissionProvider};
pub use error::{CeemsError, Result};
pub use power::{PowerMultiplexer, PowerReading, PowerSource};
pub use proxy::{Backend, BackendState, LoadBalancer, PoolRegistry, ServerPool};
pub use security::SecurityContext;
pub use tsdb::TsdbClient;
