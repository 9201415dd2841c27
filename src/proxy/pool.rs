// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-cluster-id server pool: a backend list plus a strategy, with
//! selection and the chosen backend's connection increment performed as
//! one atomic critical section

use futures::future::join_all;
use tokio::sync::Mutex as AsyncMutex;
use tracing::info;

use super::backend::Backend;
use super::strategy::{LeastConnection, QueryFingerprint, RetentionAware, RoundRobin, Strategy};
use crate::config::{PoolConfig, StrategyKind};
use crate::error::{CeemsError, Result};

/// Guard returned by [`ServerPool::select`]. Decrements the backend's
/// connection counter on drop, so cancellation never leaves
/// the counter incremented without a matching decrement.
pub struct SelectedBackend<'a> {
    pool: &'a ServerPool,
    index: usize,
}

impl<'a> SelectedBackend<'a> {
    pub fn backend(&self) -> &'a Backend {
        &self.pool.backends[self.index]
    }
}

impl Drop for SelectedBackend<'_> {
    fn drop(&mut self) {
        self.pool.backends[self.index].decrement_connections();
    }
}

/// One cluster-id's backend pool "server pool": a backend
/// appears in exactly one pool, `alive` is advisory, `active_connections`
/// is never negative.
pub struct ServerPool {
    pub cluster_id: String,
    pub sensitive_labels: Vec<String>,
    backends: Vec<Backend>,
    strategy: Box<dyn Strategy>,
    /// Pool-wide lock around select+increment: "a single
    /// strategy selection is atomic with respect to the connection-counter
    /// increment". Reference design choice (a): a pool-wide lock.
    selection_lock: AsyncMutex<()>,
}

impl ServerPool {
    pub fn new(config: PoolConfig) -> Result<Self> {
        let backends = config
        .backends
        .into_iter()
        .map(Backend::new)
        .collect::<Result<Vec<_>>>()?;

        let strategy: Box<dyn Strategy> = match config.strategy {
            StrategyKind::RoundRobin => Box::new(RoundRobin::default()),
            StrategyKind::LeastConnection => Box::new(LeastConnection),
            StrategyKind::RetentionAware => Box::new(RetentionAware),
        };

        Ok(Self {
                cluster_id: config.cluster_id,
                sensitive_labels: config.sensitive_labels,
                backends,
                strategy,
                selection_lock: AsyncMutex::new(()),
        })
    }

    /// Selects a live backend and increments its connection counter as one
    /// atomic step, returning `None` if the strategy found nothing —
    /// failure semantics: strategy-returns-nil is HTTP 503 at
    /// the caller.
    pub async fn select(&self, fingerprint: &QueryFingerprint) -> Option<SelectedBackend<'_>> {
        let _guard = self.selection_lock.lock().await;
        let index = self.strategy.select(&self.backends, fingerprint)?;
        self.backends[index].increment_connections();
        Some(SelectedBackend { pool: self, index })
    }

    pub fn backends(&self) -> &[Backend] {
        &self.backends
    }

    pub fn find(&self, id: &str) -> Option<&Backend> {
        self.backends.iter().find(|b| b.id == id)
    }

    /// Refreshes every backend's health concurrently — TSDB retention
    /// discovery or the profile-backend liveness probe, run independently
    /// per backend so one slow/failing backend does not delay its
    /// siblings.
    pub async fn refresh_retentions(
        &self,
        refresh_interval: std::time::Duration,
        probe_timeout: std::time::Duration,
    ) {
        join_all(
            self.backends
            .iter()
            .map(|b| b.refresh_health(refresh_interval, probe_timeout)),
        )
        .await;
    }
}

/// A registry of per-cluster pools, keyed by cluster id — the load
/// balancer's top-level routing table.
#[derive(Default)]
pub struct PoolRegistry {
    pools: std::collections::HashMap<String, ServerPool>,
}

impl PoolRegistry {
    pub fn build(configs: Vec<PoolConfig>) -> Result<Self> {
        let mut pools = std::collections::HashMap::new();
        for config in configs {
            let cluster_id = config.cluster_id.clone();
            let pool = ServerPool::new(config)?;
            if pools.insert(cluster_id.clone(), pool).is_some() {
                return Err(CeemsError::Config(format!(
                            "duplicate cluster id in proxy configuration: {cluster_id}"
                )));
            }
        }
        Ok(Self { pools })
    }

    /// `None` on an unknown cluster id: HTTP 404 at the
    /// caller.
    pub fn get(&self, cluster_id: &str) -> Option<&ServerPool> {
        self.pools.get(cluster_id)
    }

    pub async fn refresh_all_retentions(
        &self,
        refresh_interval: std::time::Duration,
        probe_timeout: std::time::Duration,
    ) {
        info!(pools = self.pools.len(), "refreshing backend retentions");
        join_all(
            self.pools
            .values()
            .map(|pool| pool.refresh_retentions(refresh_interval, probe_timeout)),
        )
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackendConfig, BackendKind};
    use std::time::Duration;
    use url::Url;

    fn pool_config(strategy: StrategyKind) -> PoolConfig {
        PoolConfig {
            cluster_id: "c1".into(),
            strategy,
            backends: vec![BackendConfig {
                    id: "b1".into(),
                    kind: BackendKind::Profiles,
                    url: Url::parse("http://localhost:9090").unwrap(),
                    credentials: None,
                    retention: Duration::from_secs(3600),
            }],
            sensitive_labels: vec!["instance".into()],
        }
    }

    #[tokio::test]
    async fn select_increments_and_drop_decrements() {
        let pool = ServerPool::new(pool_config(StrategyKind::LeastConnection)).unwrap();
        pool.backends()[0].force_alive_for_test();
        {
            let selected = pool
            .select(&QueryFingerprint {
                    cluster_id: "c1".into(),
                    earliest: None,
                    path_class: super::super::strategy::PathClass::Query,
            })
            .await
            .unwrap();
            assert_eq!(selected.backend().active_connections(), 1);
        }
        assert_eq!(pool.backends()[0].active_connections(), 0);
    }

    #[tokio::test]
    async fn select_returns_none_with_no_live_backends() {
        let pool = ServerPool::new(pool_config(StrategyKind::LeastConnection)).unwrap();
        let selected = pool
        .select(&QueryFingerprint {
                cluster_id: "c1".into(),
                earliest: None,
                path_class: super::super::strategy::PathClass::Query,
        })
        .await;
        assert!(selected.is_none());
    }

    #[test]
    fn registry_rejects_duplicate_cluster_ids() {
        let configs = vec![
            pool_config(StrategyKind::RoundRobin),
            pool_config(StrategyKind::RoundRobin),
        ];
        assert!(PoolRegistry::build(configs).is_err());
    }

    #[test]
    fn registry_404s_on_unknown_cluster() {
        let registry = PoolRegistry::build(vec![pool_config(StrategyKind::RoundRobin)]).unwrap();
        assert!(registry.get("unknown").is_none());
        assert!(registry.get("c1").is_some());
    }
}
