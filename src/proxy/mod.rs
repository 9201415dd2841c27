// SPDX-License-Identifier: MIT OR Apache-2.0

//! Load balancer (C5): a reverse-proxy front-end for Prometheus-compatible
//! and Pyroscope-compatible backends, fronting multiple backend pools per
//! cluster and routing each query to a live backend chosen by a pluggable
//! strategy

mod backend;
mod pool;
mod sanitizer;
mod server;
mod strategy;

pub use backend::{Backend, BackendState};
pub use pool::{PoolRegistry, SelectedBackend, ServerPool};
pub use sanitizer::sanitize;
pub use server::{router, LoadBalancer, CLUSTER_ID_HEADER, GRAFANA_USER_HEADER};
pub use strategy::{LeastConnection, PathClass, QueryFingerprint, RetentionAware, RoundRobin, Strategy};
