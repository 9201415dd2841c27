// SPDX-License-Identifier: MIT OR Apache-2.0

use std::time::Duration;
use url::Url;

/// The kind of backend a `Backend` fronts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Tsdb,
    Profiles,
}

/// Strategy a `ServerPool` uses to pick a live backend for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StrategyKind {
    #[default]
    RoundRobin,
    LeastConnection,
    RetentionAware,
}

/// Credentials rewritten onto a forwarded request, replacing whatever the
/// caller authenticated the proxy with.
#[derive(Debug, Clone)]
pub enum BackendCredentials {
    Basic { username: String, password: String },
    Bearer { token: String },
}

/// Static configuration for one backend, consumed at pool construction.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub id: String,
    pub kind: BackendKind,
    pub url: Url,
    pub credentials: Option<BackendCredentials>,
    /// Convention: 10 years for profile backends ; ignored for
    /// TSDB backends, whose retention is discovered at construction.
    pub retention: Duration,
}

/// Configuration for one cluster's backend pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub cluster_id: String,
    pub strategy: StrategyKind,
    pub backends: Vec<BackendConfig>,
    /// Labels stripped from responses served out of this pool.
    pub sensitive_labels: Vec<String>,
}

/// Top-level load-balancer configuration (C5): one pool per cluster, plus
/// the deadlines and intervals that apply across every pool.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub pools: Vec<PoolConfig>,
    /// Deadline for backend health/settings probes: 2s.
    pub probe_timeout: Duration,
    /// Deadline for a proxied request forwarded to a chosen backend. Not a
    /// fixed value in (only the 2s probe deadline is named); kept
    /// generous since a forwarded query can legitimately run long on the
    /// backend itself, while the probe deadline stays tight
    pub forward_timeout: Duration,
    /// How often a TSDB backend's retention is refreshed: 3h.
    pub retention_refresh_interval: Duration,
    pub bind_addr: std::net::SocketAddr,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            pools: Vec::new(),
            probe_timeout: Duration::from_secs(2),
            forward_timeout: Duration::from_secs(30),
            retention_refresh_interval: Duration::from_secs(3 * 3600),
            bind_addr: ([0, 0, 0, 0], 9040).into(),
        }
    }
}
