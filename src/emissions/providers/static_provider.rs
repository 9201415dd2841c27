// SPDX-License-Identifier: MIT OR Apache-2.0

//! Static world-average provider: a single constant factor, always
//! readable, never refreshed over the network

use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use async_trait::async_trait;

use crate::config::StaticConfig;
use crate::emissions::{EmissionFactor, EmissionProvider, Snapshot};
use crate::error::Result;

/// Commonly cited global grid average, grams CO2 per kWh. Kept as a
/// single named constant rather than buried inside a refresh closure,
/// since it's the one provider whose value never actually refreshes.
pub const WORLD_AVERAGE_GRAMS_PER_KWH: f64 = 475.0;

pub struct StaticProvider {
    zone: String,
    zone_name: String,
    snapshot: ArcSwapOption<Snapshot>,
}

impl StaticProvider {
    pub fn new(config: StaticConfig) -> Self {
        let zone = if config.zone.is_empty() {
            "WOR".to_string()
        } else {
            config.zone
        };
        let zone_name = if config.zone_name.is_empty() {
            "World".to_string()
        } else {
            config.zone_name
        };
        Self {
            zone,
            zone_name,
            snapshot: ArcSwapOption::empty(),
        }
    }
}

#[async_trait]
impl EmissionProvider for StaticProvider {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn refresh(&self) -> Result<Snapshot> {
        let mut snapshot = Snapshot::new();
        snapshot.insert(
            self.zone.clone(),
            EmissionFactor {
                zone: self.zone.clone(),
                name: self.zone_name.clone(),
                grams_co2_per_kwh: WORLD_AVERAGE_GRAMS_PER_KWH,
                updated_at: Instant::now(),
            },
        );
        self.snapshot.store(Some(Arc::new(snapshot.clone())));
        Ok(snapshot)
    }

    fn current(&self) -> Option<Snapshot> {
        self.snapshot.load_full().map(|arc| (*arc).clone())
    }

    fn tick_interval(&self) -> Duration {
        // Never meaningfully stale; refresh infrequently.
        Duration::from_secs(24 * 3600)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn refreshes_constant_factor() {
        let provider = StaticProvider::new(StaticConfig::default());
        let snap = provider.refresh().await.unwrap();
        assert_eq!(snap["WOR"].grams_co2_per_kwh, WORLD_AVERAGE_GRAMS_PER_KWH);
    }
}
