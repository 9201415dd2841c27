// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::warn;

use super::{EmissionProvider, Snapshot};
use crate::error::{CeemsError, Result};

type ProviderFuture = Pin<Box<dyn Future<Output = Result<Arc<dyn EmissionProvider>>> + Send>>;
type Factory = Box<dyn Fn() -> ProviderFuture + Send + Sync>;

/// Builds an [`EmissionPool`] from an explicit list of named factories —
/// "global provider registry" re-architected as explicit
/// construction, not package-level auto-registration. Factories are
/// `async` because some providers (Electricity Maps) perform a retried
/// network call at construction time
#[derive(Default)]
pub struct EmissionPoolBuilder {
    factories: HashMap<String, Factory>,
}

impl EmissionPoolBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_provider<F>(
        mut self,
        name: impl Into<String>,
        factory: impl Fn() -> F + Send + Sync + 'static,
    ) -> Self
    where
    F: Future<Output = Result<Arc<dyn EmissionProvider>>> + Send + 'static,
    {
        self.factories
        .insert(name.into(), Box::new(move || Box::pin(factory())));
        self
    }

    /// Constructs each provider named in `enabled`. Factory failure for
    /// any enabled provider is fatal "operator
    /// misconfiguration".
    pub async fn build(self, enabled: &[String]) -> Result<EmissionPool> {
        let mut providers = Vec::new();
        for name in enabled {
            let factory = self.factories.get(name).ok_or_else(|| {
                    CeemsError::Config(format!("unknown emission provider: {name}"))
            })?;
            let provider = factory().await.map_err(|e| {
                    CeemsError::Config(format!("provider {name} failed to construct: {e}"))
            })?;
            providers.push(provider);
        }
        Ok(EmissionPool::start(providers))
    }
}

/// Concurrent provider registry: one background refresh task per
/// provider, a non-blocking `collect()`, and a `stop()` that joins every
/// task before returning
pub struct EmissionPool {
    providers: HashMap<String, Arc<dyn EmissionProvider>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    stop_tx: watch::Sender<bool>,
}

impl EmissionPool {
    fn start(providers: Vec<Arc<dyn EmissionProvider>>) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut handles = Vec::new();
        let mut map = HashMap::new();

        for provider in providers {
            let name = provider.name().to_string();
            map.insert(name.clone(), provider.clone());

            let mut rx = stop_rx.clone();
            let p = provider.clone();
            let handle = tokio::spawn(async move {
                    let mut ticker = tokio::time::interval(p.tick_interval());
                    // The first tick completes immediately; the loop below
                    // performs its own refresh-then-wait cycle.
                    ticker.tick().await;
                    loop {
                        if let Err(e) = p.refresh().await {
                            warn!(provider = p.name(), error = %e, "emission provider refresh failed");
                        }
                        tokio::select! {
                            _ = ticker.tick() => {}
                            _ = rx.changed() => break,
                        }
                    }
            });
            handles.push(handle);
        }

        Self {
            providers: map,
            handles: Mutex::new(handles),
            stop_tx,
        }
    }

    /// Returns the most recent snapshot each provider has produced,
    /// without blocking on a network call. A provider whose refresh has
    /// never succeeded reports an error for itself only
    pub fn collect(&self) -> HashMap<String, Result<Snapshot>> {
        self.providers
        .iter()
        .map(|(name, provider)| {
                let result = provider.current().ok_or_else(|| {
                        CeemsError::Transient(format!(
                                "failed to fetch emission factor from {name}"
                        ))
                });
                (name.clone(), result)
        })
        .collect()
    }

    /// Terminates every background refresh loop and joins them before
    /// returning.
    pub async fn stop(&self) -> Result<()> {
        let _ = self.stop_tx.send(true);
        let mut handles = self.handles.lock().await;
        for handle in handles.drain(..) {
            handle
            .await
            .map_err(|e| CeemsError::Invariant(format!("emission task panicked: {e}")))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emissions::EmissionFactor;
    use arc_swap::ArcSwapOption;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    struct CountingProvider {
        calls: AtomicUsize,
        snapshot: ArcSwapOption<Snapshot>,
    }

    #[async_trait]
    impl EmissionProvider for CountingProvider {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn refresh(&self) -> Result<Snapshot> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut snap = Snapshot::new();
            snap.insert(
                "ZZ".to_string(),
                EmissionFactor {
                    zone: "ZZ".into(),
                    name: "Zed".into(),
                    grams_co2_per_kwh: 42.0,
                    updated_at: Instant::now(),
                },
            );
            self.snapshot.store(Some(Arc::new(snap.clone())));
            Ok(snap)
        }

        fn current(&self) -> Option<Snapshot> {
            self.snapshot.load_full().map(|arc| (*arc).clone())
        }

        fn tick_interval(&self) -> Duration {
            Duration::from_secs(3600)
        }
    }

    #[tokio::test]
    async fn unknown_provider_is_fatal_at_build() {
        let builder = EmissionPoolBuilder::new();
        let err = builder.build(&["nonexistent".to_string()]).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn collect_reports_error_for_provider_with_no_successful_refresh() {
        let builder = EmissionPoolBuilder::new().with_provider("counting", || async {
                Ok(Arc::new(CountingProvider {
                            calls: AtomicUsize::new(0),
                            snapshot: ArcSwapOption::empty(),
                    }) as Arc<dyn EmissionProvider>)
        });
        let pool = builder.build(&["counting".to_string()]).await.unwrap();
        // Give the background task a moment to run its first refresh.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let collected = pool.collect();
        assert!(collected["counting"].is_ok());
        pool.stop().await.unwrap();
    }
}
