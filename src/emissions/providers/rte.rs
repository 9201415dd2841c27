// SPDX-License-Identifier: MIT OR Apache-2.0

//! RTE OpenDataSoft provider: a single-zone (France) HTTP source on a
//! 2-minute ticker

use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;

use crate::config::RteConfig;
use crate::emissions::{EmissionFactor, EmissionProvider, Snapshot};
use crate::error::{CeemsError, Result};

const ZONE: &str = "FR";
const ZONE_NAME: &str = "France";

#[derive(Debug, Deserialize)]
struct RteRecordEnvelope {
    results: Vec<RteRecord>,
}

#[derive(Debug, Deserialize)]
struct RteRecord {
    date_heure: String,
    taux_co2: Option<f64>,
}

pub struct RteProvider {
    client: Client,
    config: RteConfig,
    snapshot: ArcSwapOption<Snapshot>,
}

impl RteProvider {
    pub fn new(config: RteConfig) -> Result<Self> {
        let client = Client::builder()
        .timeout(config.request_timeout)
        .build()
        .map_err(CeemsError::Http)?;
        Ok(Self {
                client,
                config,
                snapshot: ArcSwapOption::empty(),
        })
    }

    fn dataset_url(&self) -> String {
        let since = Utc::now().date_naive();
        format!(
            "{}/api/explore/v2.1/catalog/datasets/eco2mix-national-tr/records?order_by=date_heure%20desc&limit=1&where=date_heure%20in%20%5Bdate%27{since}%27%20TO%20now()%5D%20and%20taux_co2%20is%20not%20null",
            self.config.base_url.trim_end_matches('/')
        )
    }
}

#[async_trait]
impl EmissionProvider for RteProvider {
    fn name(&self) -> &'static str {
        "rte"
    }

    async fn refresh(&self) -> Result<Snapshot> {
        let url = self.dataset_url();
        let response = self
        .client
        .get(&url)
        .timeout(self.config.request_timeout)
        .send()
        .await
        .map_err(CeemsError::Http)?;
        let envelope: RteRecordEnvelope = response.json().await.map_err(CeemsError::Http)?;

        let record = envelope
        .results
        .into_iter()
        .next()
        .ok_or_else(|| CeemsError::Transient("rte: no records returned".into()))?;
        let grams_co2_per_kwh = record
        .taux_co2
        .ok_or_else(|| CeemsError::Transient("rte: taux_co2 missing".into()))?;

        let mut snapshot = Snapshot::new();
        snapshot.insert(
            ZONE.to_string(),
            EmissionFactor {
                zone: ZONE.to_string(),
                name: ZONE_NAME.to_string(),
                grams_co2_per_kwh,
                updated_at: Instant::now(),
            },
        );
        self.snapshot.store(Some(Arc::new(snapshot.clone())));
        let _ = record.date_heure;
        Ok(snapshot)
    }

    fn current(&self) -> Option<Snapshot> {
        self.snapshot.load_full().map(|arc| (*arc).clone())
    }

    fn tick_interval(&self) -> Duration {
        self.config.refresh_interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dataset_url_contains_filter_clauses() {
        let provider = RteProvider::new(RteConfig {
                base_url: "https://odre.opendatasoft.com".into(),
                ..RteConfig::default()
        })
        .unwrap();
        let url = provider.dataset_url();
        assert!(url.contains("eco2mix-national-tr"));
        assert!(url.contains("taux_co2"));
    }
}
