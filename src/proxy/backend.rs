// SPDX-License-Identifier: MIT OR Apache-2.0

//! A single backend (`Backend`) fronted by the load balancer, its state
//! machine, and TSDB retention discovery.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::RwLock as StdRwLock;
use std::time::Duration;

use tracing::{debug, warn};
use url::Url;

use crate::config::{BackendConfig, BackendCredentials, BackendKind, TsdbConfig};
use crate::error::Result;
use crate::runtime::{CircuitBreaker, CircuitBreakerConfig};
use crate::tsdb::TsdbClient;

/// `initializing -> alive <-> degraded -> closed`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendState {
    Initializing,
    Alive,
    Degraded,
    Closed,
}

/// A TSDB or profiling backend the load balancer can route to.
///
/// `alive` is the advisory boolean strategies read directly; it may lag
/// the richer `state` machine (e.g. a backend can be `Degraded` while
/// `alive` stays `true`, because repeated proxy errors move a backend to
/// `Degraded` without clearing the advisory flag that
/// round-robin/least-connection consult).
pub struct Backend {
    pub id: String,
    pub kind: BackendKind,
    pub url: Url,
    pub credentials: Option<BackendCredentials>,
    alive: AtomicBool,
    active_connections: AtomicI64,
    state: StdRwLock<BackendState>,
    retention: StdRwLock<Duration>,
    tsdb: Option<TsdbClient>,
    /// Gates proxied requests independently of the advisory `alive` flag —
    /// `runtime::circuit_breaker` reused as-is for the load balancer's
    /// backend health tracking, distinct from the coarser per-backend
    /// degraded-state tracking above.
    circuit: CircuitBreaker,
    /// Used only for the profile-backend health probe (`GET
    /// /api/v1/status/config`, per spec.md §6's Pyroscope interface) — TSDB
    /// backends probe through their own `TsdbClient` instead.
    http: reqwest::Client,
}

impl Backend {
    pub fn new(config: BackendConfig) -> Result<Self> {
        let tsdb = match config.kind {
            BackendKind::Tsdb => Some(TsdbClient::new(TsdbConfig {
                        url: Some(config.url.clone()),
                        credentials: config.credentials.clone(),
                        ..TsdbConfig::default()
                })?),
            BackendKind::Profiles => None,
        };

        Ok(Self {
                id: config.id,
                kind: config.kind,
                url: config.url,
                credentials: config.credentials,
                alive: AtomicBool::new(false),
                active_connections: AtomicI64::new(0),
                state: StdRwLock::new(BackendState::Initializing),
                // Profile backends: 10 years by convention, never discovered.
                retention: StdRwLock::new(config.retention),
                tsdb,
                circuit: CircuitBreaker::new(CircuitBreakerConfig::default()),
                http: reqwest::Client::new(),
        })
    }

    pub fn alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    pub fn circuit(&self) -> &CircuitBreaker {
        &self.circuit
    }

    pub fn active_connections(&self) -> i64 {
        self.active_connections.load(Ordering::SeqCst)
    }

    pub fn retention(&self) -> Duration {
        *self.retention.read().expect("retention lock poisoned")
    }

    pub fn state(&self) -> BackendState {
        *self.state.read().expect("state lock poisoned")
    }

    /// Invariant: `active_connections(b) >= 0` at all times
    pub(super) fn increment_connections(&self) {
        self.active_connections.fetch_add(1, Ordering::SeqCst);
    }

    pub(super) fn decrement_connections(&self) {
        let prev = self.active_connections.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(prev > 0, "active_connections decremented below zero");
    }

    /// Marks the backend `Degraded` after a serve-time proxy error — the
    /// backend stays a routing candidate if nothing better exists.
    pub(super) fn mark_proxy_error(&self) {
        let mut state = self.state.write().expect("state lock poisoned");
        if *state != BackendState::Closed {
            *state = BackendState::Degraded;
        }
    }

    pub(super) fn mark_closed(&self) {
        *self.state.write().expect("state lock poisoned") = BackendState::Closed;
        self.alive.store(false, Ordering::SeqCst);
    }

    /// Only TSDB backends discover retention; profile backends keep their
    /// configured 10-year convention forever.
    pub fn discovers_retention(&self) -> bool {
        self.tsdb.is_some()
    }

    /// Dispatches to retention discovery for TSDB backends or a lightweight
    /// liveness probe for profile backends — both are "first successful
    /// settings fetch -> alive" in spec.md §4.5's state-machine terms, just
    /// against a different endpoint.
    pub async fn refresh_health(&self, refresh_interval: Duration, probe_timeout: Duration) {
        if self.tsdb.is_some() {
            self.refresh_retention(refresh_interval).await;
        } else {
            self.refresh_profile_health(probe_timeout).await;
        }
    }

    /// `GET {url}/api/v1/status/config` against a Pyroscope-compatible
    /// backend (spec.md §6); any 2xx marks the backend alive, anything else
    /// keeps the previous `alive` value and logs.
    async fn refresh_profile_health(&self, probe_timeout: Duration) {
        let target = self.url.join("api/v1/status/config").unwrap_or_else(|_| self.url.clone());
        match self.http.get(target).timeout(probe_timeout).send().await {
            Ok(response) if response.status().is_success() => {
                self.alive.store(true, Ordering::SeqCst);
                let mut state = self.state.write().expect("state lock poisoned");
                if *state == BackendState::Initializing {
                    *state = BackendState::Alive;
                }
            }
            Ok(response) => {
                warn!(backend = %self.id, status = %response.status(), "profile backend health probe: non-2xx response");
            }
            Err(e) => {
                warn!(backend = %self.id, error = %e, "profile backend health probe failed, keeping previous alive value");
            }
        }
    }

    /// Fetches configured retention via `settings()`, then probes
    /// `up{instance=...}` as a range query to compute effective retention.
    /// On any error the previous value is retained and the backend is
    /// left `alive` if it already was — a failed probe never flips a
    /// live backend back to unreachable on its own.
    ///
    /// The probe window starts at the *configured* retention rather than
    /// a blind ten years, retrying once at a fixed 30-day fallback window
    /// before giving up.
    pub async fn refresh_retention(&self, refresh_interval: Duration) {
        let Some(tsdb) = &self.tsdb else {
            return;
        };

        let settings = match tsdb.settings().await {
            Ok(s) => s,
            Err(e) => {
                warn!(backend = %self.id, error = %e, "retention: settings fetch failed, keeping previous value");
                self.note_alive_probe_failure();
                return;
            }
        };

        let configured = if settings.retention_period.is_zero() {
            Duration::from_secs(10 * 365 * 24 * 3600)
        } else {
            settings.retention_period
        };

        match self
        .probe_effective_retention(tsdb, configured, refresh_interval)
        .await
        {
            Ok(effective) => {
                *self.retention.write().expect("retention lock poisoned") = effective;
                self.alive.store(true, Ordering::SeqCst);
                let mut state = self.state.write().expect("state lock poisoned");
                if *state == BackendState::Initializing {
                    *state = BackendState::Alive;
                }
            }
            Err(e) => {
                warn!(backend = %self.id, error = %e, "retention: probe failed at both windows, keeping previous value");
                self.note_alive_probe_failure();
            }
        }
    }

    async fn probe_effective_retention(
        &self,
        tsdb: &TsdbClient,
        window: Duration,
        refresh_interval: Duration,
    ) -> Result<Duration> {
        match self.probe_oldest_point(tsdb, window).await {
            Ok(oldest_age) => {
                let safety = refresh_interval.saturating_mul(2);
                Ok(oldest_age.saturating_sub(safety).max(Duration::from_secs(1)))
            }
            Err(e) => {
                debug!(backend = %self.id, error = %e, "retention probe at configured window failed, retrying at 30d fallback");
                let fallback = Duration::from_secs(30 * 24 * 3600);
                let oldest_age = self.probe_oldest_point(tsdb, fallback).await?;
                let safety = refresh_interval.saturating_mul(2);
                Ok(oldest_age.saturating_sub(safety).max(Duration::from_secs(1)))
            }
        }
    }

    /// Issues `up{instance=...}` as a range query over `window`, step =
    /// `window / 5000`, and returns the age of the oldest returned sample.
    async fn probe_oldest_point(&self, tsdb: &TsdbClient, window: Duration) -> Result<Duration> {
        let now = now_unix();
        let start = now - window.as_secs() as i64;
        let step_secs = (window.as_secs() / 5000).max(1);
        let expr = format!("up{{instance=\"{}\"}}", self.id);
        let result = tsdb
        .range_query(&expr, start, now, &format!("{step_secs}s"))
        .await?;
        let oldest_ts = extract_oldest_timestamp(&result).ok_or_else(|| {
                crate::error::CeemsError::Protocol(
                    "retention probe: no samples returned in window".into(),
                )
        })?;
        Ok(Duration::from_secs((now - oldest_ts).max(0) as u64))
    }

    fn note_alive_probe_failure(&self) {
        // A never-alive backend (still Initializing) does not flip to
        // alive on a failed first probe.
    }

    #[cfg(test)]
    pub(crate) fn force_alive_for_test(&self) {
        self.alive.store(true, Ordering::SeqCst);
        *self.state.write().expect("state lock poisoned") = BackendState::Alive;
    }
}

fn now_unix() -> i64 {
    std::time::SystemTime::now()
    .duration_since(std::time::UNIX_EPOCH)
    .map(|d| d.as_secs() as i64)
    .unwrap_or(0)
}

/// Walks a Prometheus `query_range` JSON result for the smallest sample
/// timestamp across every returned series.
fn extract_oldest_timestamp(value: &serde_json::Value) -> Option<i64> {
    let results = value.get("result")?.as_array()?;
    let mut oldest: Option<i64> = None;
    for series in results {
        let values = series.get("values")?.as_array()?;
        if let Some(first) = values.first() {
            let ts = first.as_array()?.first()?.as_f64()? as i64;
            oldest = Some(oldest.map_or(ts, |o: i64| o.min(ts)));
        }
    }
    oldest
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn profile_backend() -> Backend {
        Backend::new(BackendConfig {
                id: "pyro-1".into(),
                kind: BackendKind::Profiles,
                url: Url::parse("http://localhost:4040").unwrap(),
                credentials: None,
                retention: Duration::from_secs(10 * 365 * 24 * 3600),
        })
        .unwrap()
    }

    #[test]
    fn profile_backends_never_discover_retention() {
        let backend = profile_backend();
        assert!(!backend.discovers_retention());
        assert_eq!(backend.retention(), Duration::from_secs(10 * 365 * 24 * 3600));
    }

    #[tokio::test]
    async fn profile_backend_goes_alive_on_successful_status_probe() {
        use axum::routing::get;
        use axum::Router;
        use crate::testkit::StubServer;

        let router = Router::new().route("/api/v1/status/config", get(|| async { "{}" }));
        let stub = StubServer::start(router).await;

        let backend = Backend::new(BackendConfig {
                id: "pyro-1".into(),
                kind: BackendKind::Profiles,
                url: Url::parse(&stub.base_url()).unwrap(),
                credentials: None,
                retention: Duration::from_secs(10 * 365 * 24 * 3600),
        })
        .unwrap();

        assert!(!backend.alive());
        backend.refresh_health(Duration::from_secs(3600), Duration::from_secs(2)).await;
        assert!(backend.alive());
        assert_eq!(backend.state(), BackendState::Alive);
    }

    #[tokio::test]
    async fn profile_backend_stays_not_alive_on_probe_failure() {
        let backend = profile_backend();
        backend.refresh_health(Duration::from_secs(3600), Duration::from_millis(50)).await;
        assert!(!backend.alive());
    }

    #[test]
    fn connection_counter_never_goes_negative_in_debug_assert() {
        let backend = profile_backend();
        backend.increment_connections();
        assert_eq!(backend.active_connections(), 1);
        backend.decrement_connections();
        assert_eq!(backend.active_connections(), 0);
    }

    #[tokio::test]
    async fn circuit_opens_after_repeated_transport_failures() {
        let backend = profile_backend();
        for _ in 0..5 {
            let _ = backend
            .circuit()
            .call(|| async { Err::<(), _>(crate::error::CeemsError::Transient("boom".into())) })
            .await;
        }
        assert!(!backend.circuit().can_execute().await);
    }

    #[test]
    fn extracts_oldest_timestamp_across_series() {
        let value = serde_json::json!({
                "result": [
                    {"values": [[100.0, "1"], [200.0, "1"]]},
                    {"values": [[50.0, "1"]]}
                ]
        });
        assert_eq!(extract_oldest_timestamp(&value), Some(50));
    }

    #[test]
    fn mark_proxy_error_degrades_but_not_when_closed() {
        let backend = profile_backend();
        backend.mark_proxy_error();
        assert_eq!(backend.state(), BackendState::Degraded);
        backend.mark_closed();
        backend.mark_proxy_error();
        assert_eq!(backend.state(), BackendState::Closed);
    }
}
