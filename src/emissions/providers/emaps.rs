// SPDX-License-Identifier: MIT OR Apache-2.0

//! Electricity Maps provider: fetches the zone catalogue once at startup
//! (retried, fatal if it never succeeds), then fans out one GET per zone
//! per refresh tick

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use futures::future::join_all;
use reqwest::Client;
use serde::Deserialize;
use tracing::warn;

use crate::config::{env, EmaPsConfig};
use crate::emissions::{EmissionFactor, EmissionProvider, Snapshot};
use crate::error::{CeemsError, Result};
use crate::runtime::RetryConfig;

#[derive(Debug, Clone, Deserialize)]
struct ZoneCatalogueEntry {
    #[serde(rename = "zoneName")]
    zone_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CarbonIntensityResponse {
    #[serde(rename = "carbonIntensity")]
    carbon_intensity: f64,
}

struct ZoneInfo {
    code: String,
    name: String,
}

pub struct ElectricityMapsProvider {
    client: Client,
    base_url: String,
    api_token: String,
    zones: Vec<ZoneInfo>,
    request_timeout: Duration,
    refresh_interval: Duration,
    snapshot: ArcSwapOption<Snapshot>,
}

impl ElectricityMapsProvider {
    /// Resolves the base URL, honoring the `__EMAPS_BASE_URL` test
    /// override
    fn resolve_base_url(config: &EmaPsConfig) -> String {
        std::env::var(env::EMAPS_BASE_URL_OVERRIDE).unwrap_or_else(|_| config.base_url.clone())
    }

    /// Fetches the zone catalogue, retried up to 5 times with 1s backoff;
    /// fatal (returns `Err`) if it still fails
    pub async fn connect(config: EmaPsConfig) -> Result<Self> {
        let base_url = Self::resolve_base_url(&config);
        let client = Client::builder()
        .timeout(config.startup_timeout)
        .build()
        .map_err(CeemsError::Http)?;

        let token = if config.api_token.is_empty() {
            std::env::var(crate::config::env::EMAPS_API_TOKEN).unwrap_or_default()
        } else {
            config.api_token.clone()
        };

        let retry = RetryConfig::startup_five_times_one_second();
        let catalogue_url = format!("{}/zones", base_url.trim_end_matches('/'));
        let configured_zones = config.zones.clone();
        let client_for_retry = client.clone();

        let catalogue: HashMap<String, ZoneCatalogueEntry> = retry
        .execute(|| {
                let client = client_for_retry.clone();
                let url = catalogue_url.clone();
                async move {
                    let response = client.get(&url).send().await.map_err(CeemsError::Http)?;
                    response
                    .json::<HashMap<String, ZoneCatalogueEntry>>()
                    .await
                    .map_err(CeemsError::Http)
                }
        })
        .await?;

        let zones = configured_zones
        .into_iter()
        .map(|code| {
                let name = catalogue
                .get(&code)
                .and_then(|e| e.zone_name.clone())
                .unwrap_or_else(|| code.clone());
                ZoneInfo { code, name }
        })
        .collect();

        Ok(Self {
                client,
                base_url,
                api_token: token,
                zones,
                request_timeout: config.request_timeout,
                refresh_interval: config.refresh_interval,
                snapshot: ArcSwapOption::empty(),
        })
    }

    async fn fetch_zone(&self, zone: &ZoneInfo) -> Option<EmissionFactor> {
        let url = format!(
            "{}/carbon-intensity/latest?zone={}",
            self.base_url.trim_end_matches('/'),
            zone.code
        );
        let result = self
        .client
        .get(&url)
        .timeout(self.request_timeout)
        .header("auth-token", &self.api_token)
        .send()
        .await;

        match result {
            Ok(response) => match response.json::<CarbonIntensityResponse>().await {
                Ok(body) => Some(EmissionFactor {
                        zone: zone.code.clone(),
                        name: zone.name.clone(),
                        grams_co2_per_kwh: body.carbon_intensity,
                        updated_at: Instant::now(),
                }),
                Err(e) => {
                    warn!(zone = %zone.code, error = %e, "emaps: failed to parse zone response");
                    None
                }
            },
            Err(e) => {
                warn!(zone = %zone.code, error = %e, "emaps: zone request failed");
                None
            }
        }
    }
}

#[async_trait]
impl EmissionProvider for ElectricityMapsProvider {
    fn name(&self) -> &'static str {
        "emaps"
    }

    async fn refresh(&self) -> Result<Snapshot> {
        let results = join_all(self.zones.iter().map(|zone| self.fetch_zone(zone))).await;

        // Per-zone failures are logged and that zone is absent from this
        // round's snapshot — the previous value is never carried forward,
        // since staleness would mislead operators more than a gap would.
        let snapshot: Snapshot = results
        .into_iter()
        .flatten()
        .map(|factor| (factor.zone.clone(), factor))
        .collect();

        self.snapshot.store(Some(Arc::new(snapshot.clone())));
        Ok(snapshot)
    }

    fn current(&self) -> Option<Snapshot> {
        self.snapshot.load_full().map(|arc| (*arc).clone())
    }

    fn tick_interval(&self) -> Duration {
        self.refresh_interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::StubServer;
    use axum::extract::Query;
    use axum::routing::get;
    use axum::Json;
    use serde_json::json;

    /// A stub responding with `{FR: France, DE: Germany}` zones and
    /// `{FR:10, DE:200}` carbon intensities yields exactly
    /// `{FR:(France,10), DE:(Germany,200)}` after one refresh.
    #[tokio::test]
    async fn multi_zone_fanout_matches_scenario() {
        let router = axum::Router::new()
        .route(
            "/zones",
            get(|| async {
                    Json(json!({
                            "FR": {"zoneName": "France"},
                            "DE": {"zoneName": "Germany"},
                    }))
            }),
        )
        .route(
            "/carbon-intensity/latest",
            get(|Query(params): Query<HashMap<String, String>>| async move {
                    let intensity = match params.get("zone").map(String::as_str) {
                        Some("FR") => 10.0,
                        Some("DE") => 200.0,
                        _ => 0.0,
                    };
                    Json(json!({ "carbonIntensity": intensity }))
            }),
        );
        let server = StubServer::start(router).await;

        std::env::set_var(crate::config::env::EMAPS_BASE_URL_OVERRIDE, server.base_url());
        let provider = ElectricityMapsProvider::connect(EmaPsConfig {
                zones: vec!["FR".into(), "DE".into()],
                api_token: "test-token".into(),
                ..EmaPsConfig::default()
        })
        .await
        .unwrap();
        std::env::remove_var(crate::config::env::EMAPS_BASE_URL_OVERRIDE);

        let snapshot = provider.refresh().await.unwrap();

        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot["FR"].name, "France");
        assert_eq!(snapshot["FR"].grams_co2_per_kwh, 10.0);
        assert_eq!(snapshot["DE"].name, "Germany");
        assert_eq!(snapshot["DE"].grams_co2_per_kwh, 200.0);
    }

    /// The snapshot merge discards nothing from a successful fan-out
    /// round.
    #[tokio::test]
    async fn merges_independent_zone_results() {
        let mut snapshot = Snapshot::new();
        snapshot.insert(
            "FR".into(),
            EmissionFactor {
                zone: "FR".into(),
                name: "France".into(),
                grams_co2_per_kwh: 10.0,
                updated_at: Instant::now(),
            },
        );
        snapshot.insert(
            "DE".into(),
            EmissionFactor {
                zone: "DE".into(),
                name: "Germany".into(),
                grams_co2_per_kwh: 200.0,
                updated_at: Instant::now(),
            },
        );
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot["FR"].grams_co2_per_kwh, 10.0);
        assert_eq!(snapshot["DE"].grams_co2_per_kwh, 200.0);
    }
}
