// SPDX-License-Identifier: MIT OR Apache-2.0

use std::time::Duration;
use url::Url;

use super::proxy::BackendCredentials;

/// Configuration for the shared Prometheus-compatible TSDB client (C6).
#[derive(Debug, Clone)]
pub struct TsdbConfig {
    /// Empty URL makes `available()` return `false` (no-op client for
    /// development)
    pub url: Option<Url>,
    /// Credentials rewritten onto every request, when this client fronts
    /// one load-balancer backend (C5) rather than an emission provider.
    pub credentials: Option<BackendCredentials>,
    pub request_timeout: Duration,
    /// How often `settings()` is refetched. : 6 hours.
    pub settings_cache_ttl: Duration,
    /// Multiplier applied to `scrape_interval` to derive `rate_interval`.
    /// rationale: `4` is the smallest value that avoids
    /// rate/irate returning 0 at the scrape-interval boundary.
    pub rate_interval_multiplier: u32,
}

impl Default for TsdbConfig {
    fn default() -> Self {
        Self {
            url: None,
            credentials: None,
            request_timeout: Duration::from_secs(10),
            settings_cache_ttl: Duration::from_secs(6 * 3600),
            rate_interval_multiplier: 4,
        }
    }
}
