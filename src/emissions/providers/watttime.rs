// SPDX-License-Identifier: MIT OR Apache-2.0

//! WattTime provider: basic-auth login exchanged for a bearer token whose
//! expiry is tracked locally, refreshed before it lapses.

use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::RwLock;

use crate::config::{env, WattTimeConfig};
use crate::emissions::{EmissionFactor, EmissionProvider, Snapshot};
use crate::error::{CeemsError, Result};
use crate::runtime::RetryConfig;

/// Vendor-documented value unit (lb CO2/MWh) to g/kWh conversion factor.
const LB_PER_MWH_TO_G_PER_KWH: f64 = 0.453592;

#[derive(Debug, Deserialize)]
struct LoginResponse {
    token: String,
    /// RFC 3339 expiry, when the API supplies one. Falls back to a
    /// fixed default TTL when the login response omits it.
    #[serde(default)]
    token_expires_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HistoricalPoint {
    value: f64,
    point_time: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HistoricalResponse {
    data: Vec<HistoricalPoint>,
}

struct TokenState {
    token: String,
    expires_at: Instant,
}

pub struct WattTimeProvider {
    client: Client,
    base_url: String,
    config: WattTimeConfig,
    token: RwLock<Option<TokenState>>,
    snapshot: ArcSwapOption<Snapshot>,
}

impl WattTimeProvider {
    fn resolve_base_url(config: &WattTimeConfig) -> String {
        std::env::var(env::WT_BASE_URL_OVERRIDE).unwrap_or_else(|_| config.base_url.clone())
    }

    fn resolved_credentials(config: &WattTimeConfig) -> (String, String, String) {
        let username = if config.username.is_empty() {
            std::env::var(env::WT_USERNAME).unwrap_or_default()
        } else {
            config.username.clone()
        };
        let password = if config.password.is_empty() {
            std::env::var(env::WT_PASSWORD).unwrap_or_default()
        } else {
            config.password.clone()
        };
        let region = if config.region.is_empty() {
            std::env::var(env::WT_REGION).unwrap_or_default()
        } else {
            config.region.clone()
        };
        (username, password, region)
    }

    /// Performs the startup login, retried up to 5 times with 1s backoff;
    /// fatal if it never succeeds
    pub async fn connect(config: WattTimeConfig) -> Result<Self> {
        let base_url = Self::resolve_base_url(&config);
        let client = Client::builder()
        .timeout(config.request_timeout)
        .build()
        .map_err(CeemsError::Http)?;

        let provider = Self {
            client,
            base_url,
            config,
            token: RwLock::new(None),
            snapshot: ArcSwapOption::empty(),
        };

        let retry = RetryConfig::startup_five_times_one_second();
        let token_state = retry.execute(|| provider.login()).await?;
        *provider.token.write().await = Some(token_state);
        Ok(provider)
    }

    async fn login(&self) -> Result<TokenState> {
        let (username, password, _) = Self::resolved_credentials(&self.config);
        let url = format!("{}/login", self.base_url.trim_end_matches('/'));
        let response = self
        .client
        .get(&url)
        .basic_auth(username, Some(password))
        .send()
        .await
        .map_err(CeemsError::Http)?;
        let body: LoginResponse = response.json().await.map_err(CeemsError::Http)?;

        let expires_at = body
        .token_expires_at
        .as_deref()
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .and_then(|dt| {
                let delta = dt.with_timezone(&Utc) - Utc::now();
                delta.to_std().ok()
        })
        .map(|ttl| Instant::now() + ttl)
        .unwrap_or_else(|| Instant::now() + self.config.default_token_ttl);

        Ok(TokenState {
                token: body.token,
                expires_at,
        })
    }

    /// Refetches the token if it is missing or expired; a runtime fetch
    /// failure here marks this refresh as failed (the previous, now-stale
    /// token is not reused)
    async fn ensure_token(&self) -> Result<String> {
        let needs_refresh = {
            let guard = self.token.read().await;
            guard.as_ref().map_or(true, |t| Instant::now() >= t.expires_at)
        };

        if needs_refresh {
            let state = self.login().await?;
            let token = state.token.clone();
            *self.token.write().await = Some(state);
            Ok(token)
        } else {
            Ok(self.token.read().await.as_ref().unwrap().token.clone())
        }
    }
}

#[async_trait]
impl EmissionProvider for WattTimeProvider {
    fn name(&self) -> &'static str {
        "watttime"
    }

    async fn refresh(&self) -> Result<Snapshot> {
        let token = self.ensure_token().await?;
        let (_, _, region) = Self::resolved_credentials(&self.config);

        let now = Utc::now();
        let start = now - chrono::Duration::minutes(30);
        let url = format!(
            "{}/v3/historical?start={}&end={}&region={}&signal_type=co2_moer",
            self.base_url.trim_end_matches('/'),
            start.to_rfc3339(),
            now.to_rfc3339(),
            region,
        );

        let response = self
        .client
        .get(&url)
        .timeout(self.config.request_timeout)
        .bearer_auth(&token)
        .send()
        .await
        .map_err(CeemsError::Http)?;
        let body: HistoricalResponse = response.json().await.map_err(CeemsError::Http)?;

        let latest = body
        .data
        .last()
        .ok_or_else(|| CeemsError::Transient("watttime: no historical points returned".into()))?;

        let mut snapshot = Snapshot::new();
        snapshot.insert(
            region.clone(),
            EmissionFactor {
                zone: region.clone(),
                name: region,
                grams_co2_per_kwh: latest.value * LB_PER_MWH_TO_G_PER_KWH,
                updated_at: Instant::now(),
            },
        );
        let _ = &latest.point_time;
        self.snapshot.store(Some(Arc::new(snapshot.clone())));
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
    use crate::testkit::StubServer;
    use axum::routing::get;
    use axum::Json;
    use serde_json::json;

    #[test]
    fn lb_per_mwh_conversion_matches_vendor_factor() {
        let lb_per_mwh = 100.0;
        let expected = 45.3592;
        assert!((lb_per_mwh * LB_PER_MWH_TO_G_PER_KWH - expected).abs() < 1e-9);
    }

    /// Exercises the basic-auth login + bearer-token refresh flow end to
    /// end against an in-process stub,
    #[tokio::test]
    async fn connect_and_refresh_against_stub_server() {
        let router = axum::Router::new()
        .route(
            "/login",
            get(|| async { Json(json!({"token": "tok-123"})) }),
        )
        .route(
            "/v3/historical",
            get(|| async {
                    Json(json!({"data": [{"value": 100.0, "point_time": "2024-01-01T00:00:00Z"}]}))
            }),
        );
        let server = StubServer::start(router).await;

        std::env::set_var(env::WT_BASE_URL_OVERRIDE, server.base_url());
        std::env::set_var(env::WT_USERNAME, "user");
        std::env::set_var(env::WT_PASSWORD, "pass");
        std::env::set_var(env::WT_REGION, "CAISO_NORTH");

        let provider = WattTimeProvider::connect(WattTimeConfig::default()).await.unwrap();
        let snapshot = provider.refresh().await.unwrap();

        std::env::remove_var(env::WT_BASE_URL_OVERRIDE);
        std::env::remove_var(env::WT_USERNAME);
        std::env::remove_var(env::WT_PASSWORD);
        std::env::remove_var(env::WT_REGION);

        let factor = &snapshot["CAISO_NORTH"];
        assert!((factor.grams_co2_per_kwh - 100.0 * LB_PER_MWH_TO_G_PER_KWH).abs() < 1e-9);
    }
}
