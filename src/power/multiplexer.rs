// SPDX-License-Identifier: MIT OR Apache-2.0

//! Host power multiplexer (C2): one polymorphic power source per host,
//! selected by priority probe, with soft-failure reopen and a
//! periodically re-probed GPU-power-inclusion flag.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::config::PowerConfig;
use crate::error::{CeemsError, Result};
use crate::power::cray::CraySource;
use crate::power::ipmi::IpmiDcmiSource;
use crate::power::rapl::RaplSource;
use crate::power::redfish::RedfishSource;
use crate::power::{PowerReading, PowerSource};
use crate::security::SecurityContext;

/// Total time budget to find a working source at construction.
const PROBE_BUDGET: Duration = Duration::from_secs(5);

/// Whether the multiplexer's reported host power includes attached GPU
/// power, and when that was last determined. Re-probed on a recurring
/// interval rather than decided once at construction, so a host whose
/// GPU attachment changes after boot doesn't carry a stale flag forever.
pub struct PowerSourceAttributes {
    pub gpu_power_included: AtomicBool,
    last_probed: RwLock<Option<Instant>>,
}

impl Default for PowerSourceAttributes {
    fn default() -> Self {
        Self {
            gpu_power_included: AtomicBool::new(true),
            last_probed: RwLock::new(None),
        }
    }
}

/// Recent `(host_power, gpu_power_sum)` sample pair used by the
/// GPU-inclusion probe.
#[derive(Debug, Clone, Copy)]
pub struct GpuProbeSample {
    pub host_power_watts: f64,
    pub gpu_power_watts_sum: f64,
}

/// Presents one power source per host, probing `Cray -> Redfish ->
/// IPMI-DCMI -> RAPL` in priority order at construction and transparently
/// reopening after consecutive soft failures
pub struct PowerMultiplexer {
    source: RwLock<Box<dyn PowerSource>>,
    config: PowerConfig,
    security: Arc<SecurityContext>,
    consecutive_failures: AtomicU32,
    degraded: AtomicBool,
    pub attributes: PowerSourceAttributes,
}

impl PowerMultiplexer {
    /// Probes sources in priority order, building each lazily, and keeps
    /// the first that yields a plausible reading within `PROBE_BUDGET`.
    pub async fn probe(config: PowerConfig, security: Arc<SecurityContext>) -> Result<Self> {
        let deadline = Instant::now() + PROBE_BUDGET;
        let mut candidates: VecDeque<Box<dyn PowerSource>> = VecDeque::new();

        if let Some(cray_cfg) = config.cray.clone() {
            candidates.push_back(Box::new(CraySource::new(cray_cfg)));
        }
        if let Some(redfish_cfg) = config.redfish.clone() {
            match RedfishSource::new(redfish_cfg) {
                Ok(source) => candidates.push_back(Box::new(source)),
                Err(e) => warn!(error = %e, "redfish source construction failed, skipping"),
            }
        }
        candidates.push_back(Box::new(IpmiDcmiSource::new(
                    security.clone(),
                    config.ipmi.clone(),
        )));
        match RaplSource::discover(&config.rapl) {
            Ok(source) => candidates.push_back(Box::new(source)),
            Err(e) => warn!(error = %e, "rapl discovery failed, skipping"),
        }

        for candidate in candidates {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match timeout(remaining, candidate.read()).await {
                Ok(Ok(reading)) if is_plausible(&reading) => {
                    info!(source = candidate.name(), "selected power source");
                    return Ok(Self {
                            source: RwLock::new(candidate),
                            config,
                            security,
                            consecutive_failures: AtomicU32::new(0),
                            degraded: AtomicBool::new(false),
                            attributes: PowerSourceAttributes::default(),
                    });
                }
                Ok(Ok(_)) => warn!(source = candidate.name(), "implausible reading, skipping"),
                Ok(Err(e)) => warn!(source = candidate.name(), error = %e, "probe failed"),
                Err(_) => warn!(source = candidate.name(), "probe timed out"),
            }
        }

        Err(CeemsError::Transient(
                "no plausible power source found within probe budget".into(),
        ))
    }

    /// `read(ctx) -> PowerReading`. Reopens the underlying source after
    /// `reopen_after_failures` consecutive soft failures; marks itself
    /// degraded after `degraded_after_failures` but keeps attempting reads
    /// so transient BMC outages recover without restart
    pub async fn read(&self) -> Result<PowerReading> {
        let guard = self.source.read().await;
        let result = guard.read().await;
        drop(guard);

        match result {
            Ok(reading) => {
                self.consecutive_failures.store(0, Ordering::SeqCst);
                if self.degraded.swap(false, Ordering::SeqCst) {
                    info!("power source recovered, no longer degraded");
                }
                Ok(reading)
            }
            Err(e) => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;

                if failures >= self.config.degraded_after_failures && !self.degraded.swap(true, Ordering::SeqCst) {
                    warn!(
                        failures,
                        "power multiplexer marked degraded, continuing to retry"
                    );
                }

                if failures % self.config.reopen_after_failures.max(1) == 0 {
                    self.reopen().await;
                }

                Err(e)
            }
        }
    }

    async fn reopen(&self) {
        warn!("reopening power source after consecutive soft failures");
        let source = self.source.read().await;
        if let Err(e) = source.close().await {
            warn!(error = %e, "error closing power source before reopen");
        }
        // The concrete sources in this crate (RAPL/Cray/Redfish/IPMI) are
        // self-healing across calls — Redfish re-enumerates chassis
        // lazily, RAPL treats the next read as a fresh first sample, Cray
        // reparses the file, and IPMI reopens its device handle — so
        // reopening here is a close() signal rather than a reconstruction.
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    pub async fn close(&self) -> Result<()> {
        self.source.read().await.close().await
    }

    /// Re-evaluates whether GPU power is included in host power by
    /// cross-checking `host_power - sum(gpu_power)` over a recent window:
    /// strictly positive => excluded, otherwise included
    /// Intended to be driven by a background interval at
    /// `config.gpu_probe_interval` — re-probed periodically rather than
    /// decided once at construction.
    pub async fn reprobe_gpu_inclusion(&self, samples: &[GpuProbeSample]) {
        if samples.is_empty() {
            return;
        }
        let avg_excess: f64 = samples
        .iter()
        .map(|s| s.host_power_watts - s.gpu_power_watts_sum)
        .sum::<f64>()
        / samples.len() as f64;

        let excludes_gpu = avg_excess > 0.0;
        self.attributes
        .gpu_power_included
        .store(!excludes_gpu, Ordering::SeqCst);
        *self.attributes.last_probed.write().await = Some(Instant::now());
    }

    pub fn gpu_probe_interval(&self) -> Duration {
        self.config.gpu_probe_interval
    }
}

/// A reading is implausible if every field is zero and it claims to be
/// activated-but-idle, which typically indicates a stub/no-op response
/// rather than a real source.
fn is_plausible(reading: &PowerReading) -> bool {
    reading.current > 0 || reading.average > 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct FlakySource {
        calls: AtomicUsize,
        fail_first_n: usize,
    }

    #[async_trait]
    impl PowerSource for FlakySource {
        async fn read(&self) -> Result<PowerReading> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first_n {
                Err(CeemsError::Transient("flaky".into()))
            } else {
                Ok(PowerReading {
                        current: 100,
                        ..Default::default()
                })
            }
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }

        fn name(&self) -> &'static str {
            "flaky"
        }
    }

    #[tokio::test]
    async fn marks_degraded_after_threshold_failures_and_recovers() {
        let mux = PowerMultiplexer {
            source: RwLock::new(Box::new(FlakySource {
                        calls: AtomicUsize::new(0),
                        fail_first_n: 2,
            })),
            config: PowerConfig {
                reopen_after_failures: 1,
                degraded_after_failures: 2,
                ..PowerConfig::with_defaults()
            },
            security: Arc::new(SecurityContext::new(crate::config::SecurityConfig::native())),
            consecutive_failures: AtomicU32::new(0),
            degraded: AtomicBool::new(false),
            attributes: PowerSourceAttributes::default(),
        };

        assert!(mux.read().await.is_err());
        assert!(!mux.is_degraded());
        assert!(mux.read().await.is_err());
        assert!(mux.is_degraded());
        assert!(mux.read().await.is_ok());
        assert!(!mux.is_degraded());
    }

    #[test]
    fn gpu_probe_excludes_when_excess_positive() {
        let samples = [GpuProbeSample {
                host_power_watts: 500.0,
                gpu_power_watts_sum: 300.0,
        }];
        let avg: f64 = samples
        .iter()
        .map(|s| s.host_power_watts - s.gpu_power_watts_sum)
        .sum::<f64>()
        / samples.len() as f64;
        assert!(avg > 0.0);
    }
}
