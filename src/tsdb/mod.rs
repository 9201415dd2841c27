// SPDX-License-Identifier: MIT OR Apache-2.0

//! Typed client over the Prometheus v1 HTTP API (C6), shared by the
//! emission providers that poll time-series backends and by the load
//! balancer's retention discovery

use std::collections::HashMap;
use std::time::{Duration, Instant};

use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Mutex;
use url::Url;

use crate::config::{BackendCredentials, TsdbConfig};
use crate::error::{CeemsError, Result};

#[derive(Debug, Deserialize)]
struct PromEnvelope<T> {
    status: String,
    #[serde(default)]
    data: Option<T>,
    #[serde(default, rename = "errorType")]
    error_type: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl<T> PromEnvelope<T> {
    fn into_data(self) -> Result<T> {
        if self.status == "success" {
            self.data
            .ok_or_else(|| CeemsError::Protocol("tsdb: success response with no data".into()))
        } else {
            Err(CeemsError::Protocol(format!(
                        "tsdb: {} ({})",
                        self.error.unwrap_or_default(),
                        self.error_type.unwrap_or_default()
            )))
        }
    }
}

#[derive(Debug, Deserialize)]
struct ConfigData {
    yaml: String,
}

#[derive(Debug, Default, Deserialize)]
struct PromConfigYaml {
    global: Option<PromGlobalConfig>,
}

#[derive(Debug, Default, Deserialize)]
struct PromGlobalConfig {
    scrape_interval: Option<String>,
    evaluation_interval: Option<String>,
}

/// The settings subset CEEMS needs, cached at most every 6 hours.
#[derive(Debug, Clone, PartialEq)]
pub struct TsdbSettings {
    pub scrape_interval: Duration,
    pub eval_interval: Duration,
    /// `rate_interval_multiplier × scrape_interval`
    /// "smallest multiplier that avoids rate/irate returning 0".
    pub rate_interval: Duration,
    pub query_lookback_delta: Duration,
    pub query_timeout: Duration,
    pub query_max_samples: u64,
    pub retention_period: Duration,
}

struct CachedSettings {
    settings: TsdbSettings,
    fetched_at: Instant,
}

/// A typed, async Prometheus v1 HTTP client. Constructing with an empty
/// URL yields a usable no-op client for development — `available()`
/// reports `false` and every other call returns a configuration error.
pub struct TsdbClient {
    client: Client,
    base_url: Option<Url>,
    credentials: Option<BackendCredentials>,
    request_timeout: Duration,
    settings_cache_ttl: Duration,
    rate_interval_multiplier: u32,
    cached_settings: Mutex<Option<CachedSettings>>,
}

impl TsdbClient {
    pub fn new(config: TsdbConfig) -> Result<Self> {
        let client = Client::builder()
        .timeout(config.request_timeout)
        .build()
        .map_err(CeemsError::Http)?;
        Ok(Self {
                client,
                base_url: config.url,
                credentials: config.credentials,
                request_timeout: config.request_timeout,
                settings_cache_ttl: config.settings_cache_ttl,
                rate_interval_multiplier: config.rate_interval_multiplier,
                cached_settings: Mutex::new(None),
        })
    }

    fn apply_credentials(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.credentials {
            Some(BackendCredentials::Basic { username, password }) => {
                builder.basic_auth(username, Some(password))
            }
            Some(BackendCredentials::Bearer { token }) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// `false` only when constructed with an empty URL
    pub fn available(&self) -> bool {
        self.base_url.is_some()
    }

    fn require_base_url(&self) -> Result<&Url> {
        self.base_url
        .as_ref()
        .ok_or_else(|| CeemsError::Config("tsdb client has no backend url configured".into()))
    }

    async fn get_json<T>(&self, path: &str, query: &[(&str, String)]) -> Result<T>
    where
    T: for<'de> Deserialize<'de>,
    {
        let base = self.require_base_url()?;
        let url = base
        .join(path)
        .map_err(|e| CeemsError::Config(format!("tsdb: invalid path {path}: {e}")))?;
        let response = self
        .client
        .get(url)
        .query(query)
        .timeout(self.request_timeout)
        .send()
        .await
        .map_err(CeemsError::Http)?;
        response.json::<T>().await.map_err(CeemsError::Http)
    }

    /// `GET /api/v1/series`.
    pub async fn series(&self, matchers: &[String], start: i64, end: i64) -> Result<Value> {
        let query: Vec<(&str, String)> = matchers
        .iter()
        .map(|m| ("match[]", m.clone()))
        .chain([("start", start.to_string()), ("end", end.to_string())])
        .collect();
        let envelope: PromEnvelope<Value> = self.get_json("api/v1/series", &query).await?;
        envelope.into_data()
    }

    /// `GET /api/v1/labels`.
    pub async fn labels(&self, matchers: &[String], start: i64, end: i64) -> Result<Value> {
        let query: Vec<(&str, String)> = matchers
        .iter()
        .map(|m| ("match[]", m.clone()))
        .chain([("start", start.to_string()), ("end", end.to_string())])
        .collect();
        let envelope: PromEnvelope<Value> = self.get_json("api/v1/labels", &query).await?;
        envelope.into_data()
    }

    /// `GET /api/v1/query`.
    pub async fn query(&self, expr: &str, at: Option<i64>) -> Result<Value> {
        let mut query = vec![("query", expr.to_string())];
        if let Some(at) = at {
            query.push(("time", at.to_string()));
        }
        let envelope: PromEnvelope<Value> = self.get_json("api/v1/query", &query).await?;
        envelope.into_data()
    }

    /// `GET /api/v1/query_range`.
    pub async fn range_query(&self, expr: &str, start: i64, end: i64, step: &str) -> Result<Value> {
        let query = vec![
            ("query", expr.to_string()),
            ("start", start.to_string()),
            ("end", end.to_string()),
            ("step", step.to_string()),
        ];
        let envelope: PromEnvelope<Value> = self.get_json("api/v1/query_range", &query).await?;
        envelope.into_data()
    }

    /// `POST /api/v1/admin/tsdb/delete_series`.
    pub async fn delete(&self, matchers: &[String], start: i64, end: i64) -> Result<()> {
        let base = self.require_base_url()?;
        let url = base
        .join("api/v1/admin/tsdb/delete_series")
        .map_err(|e| CeemsError::Config(format!("tsdb: invalid admin url: {e}")))?;
        let query: Vec<(&str, String)> = matchers
        .iter()
        .map(|m| ("match[]", m.clone()))
        .chain([("start", start.to_string()), ("end", end.to_string())])
        .collect();
        let response = self
        .client
        .post(url)
        .query(&query)
        .timeout(self.request_timeout)
        .send()
        .await
        .map_err(CeemsError::Http)?;
        if !response.status().is_success() {
            return Err(CeemsError::Protocol(format!(
                        "tsdb: delete_series returned {}",
                        response.status()
            )));
        }
        Ok(())
    }

    /// Returns the cached settings if still fresh, otherwise refetches
    /// from `/api/v1/status/config` and `/api/v1/status/flags` —
    /// : cached at most every 6 hours.
    pub async fn settings(&self) -> Result<TsdbSettings> {
        let mut cache = self.cached_settings.lock().await;
        if let Some(cached) = cache.as_ref() {
            if cached.fetched_at.elapsed() < self.settings_cache_ttl {
                return Ok(cached.settings.clone());
            }
        }

        let settings = self.fetch_settings().await?;
        *cache = Some(CachedSettings {
                settings: settings.clone(),
                fetched_at: Instant::now(),
        });
        Ok(settings)
    }

    async fn fetch_settings(&self) -> Result<TsdbSettings> {
        let config_envelope: PromEnvelope<ConfigData> =
        self.get_json("api/v1/status/config", &[]).await?;
        let config_data = config_envelope.into_data()?;
        let parsed: PromConfigYaml = serde_yaml::from_str(&config_data.yaml)
        .map_err(|e| CeemsError::Protocol(format!("tsdb: unparseable config yaml: {e}")))?;
        let global = parsed.global.unwrap_or_default();

        let scrape_interval = global
        .scrape_interval
        .as_deref()
        .map(parse_prometheus_duration)
        .transpose()?
        .unwrap_or(Duration::from_secs(15));
        let eval_interval = global
        .evaluation_interval
        .as_deref()
        .map(parse_prometheus_duration)
        .transpose()?
        .unwrap_or(Duration::from_secs(15));

        let flags_envelope: PromEnvelope<HashMap<String, String>> =
        self.get_json("api/v1/status/flags", &[]).await?;
        let flags = flags_envelope.into_data().unwrap_or_default();

        let query_lookback_delta = flags
        .get("query.lookback-delta")
        .map(|s| parse_prometheus_duration(s))
        .transpose()?
        .unwrap_or(Duration::from_secs(300));
        let query_timeout = flags
        .get("query.timeout")
        .map(|s| parse_prometheus_duration(s))
        .transpose()?
        .unwrap_or(Duration::from_secs(120));
        let query_max_samples = flags
        .get("query.max-samples")
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(50_000_000);
        let retention_period = flags
        .get("storage.tsdb.retention.time")
        .map(|s| parse_prometheus_duration(s))
        .transpose()?
        .unwrap_or(Duration::from_secs(15 * 24 * 3600));

        Ok(TsdbSettings {
                scrape_interval,
                eval_interval,
                rate_interval: scrape_interval * self.rate_interval_multiplier,
                query_lookback_delta,
                query_timeout,
                query_max_samples,
                retention_period,
        })
    }
}

/// Parses a Prometheus-style duration (`"15s"`, `"1h30m"`, `"4w"`) into a
/// [`Duration`]. Unrecognized or empty input is a protocol error — this
/// string always comes from a backend's own reported config.
fn parse_prometheus_duration(raw: &str) -> Result<Duration> {
    let raw = raw.trim();
    if raw.is_empty() || raw == "0" {
        return Ok(Duration::ZERO);
    }

    let mut total = Duration::ZERO;
    let mut number = String::new();
    let mut chars = raw.chars().peekable();

    while let Some(c) = chars.next() {
        if c.is_ascii_digit() {
            number.push(c);
            continue;
        }
        let unit_seconds: u64 = match c {
            'y' => 365 * 24 * 3600,
            'w' => 7 * 24 * 3600,
            'd' => 24 * 3600,
            'h' => 3600,
            'm' => 60,
            's' => 1,
            _ => {
                return Err(CeemsError::Protocol(format!(
                            "tsdb: unrecognized duration unit in {raw:?}"
                )))
            }
        };
        let value: u64 = number
        .parse()
        .map_err(|_| CeemsError::Protocol(format!("tsdb: unparseable duration {raw:?}")))?;
        total += Duration::from_secs(value * unit_seconds);
        number.clear();
    }

    if !number.is_empty() {
        return Err(CeemsError::Protocol(format!(
                    "tsdb: duration {raw:?} missing trailing unit"
        )));
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_op_client_is_unavailable() {
        let client = TsdbClient::new(TsdbConfig::default()).unwrap();
        assert!(!client.available());
    }

    #[test]
    fn configured_client_is_available() {
        let mut config = TsdbConfig::default();
        config.url = Some(Url::parse("http://localhost:9090").unwrap());
        let client = TsdbClient::new(config).unwrap();
        assert!(client.available());
    }

    #[test]
    fn parses_simple_durations() {
        assert_eq!(parse_prometheus_duration("15s").unwrap(), Duration::from_secs(15));
        assert_eq!(parse_prometheus_duration("1m").unwrap(), Duration::from_secs(60));
        assert_eq!(parse_prometheus_duration("1h").unwrap(), Duration::from_secs(3600));
    }

    #[test]
    fn parses_compound_durations() {
        assert_eq!(
            parse_prometheus_duration("1h30m").unwrap(),
            Duration::from_secs(3600 + 1800)
        );
    }

    #[test]
    fn rejects_unit_less_duration() {
        assert!(parse_prometheus_duration("15").is_err());
    }
}
