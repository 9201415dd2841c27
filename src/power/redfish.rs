// SPDX-License-Identifier: MIT OR Apache-2.0

//! Redfish sub-source: enumerates `/redfish/v1/Chassis`, filters chassis
//! whose `Power.PowerControl[].PowerConsumedWatts` is non-null, and sums
//! across an optional allowlist

use std::sync::Mutex;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::warn;

use crate::config::RedfishConfig;
use crate::error::{CeemsError, Result};
use crate::power::{PowerReading, PowerSource};

pub struct RedfishSource {
    client: Client,
    config: RedfishConfig,
    /// Chassis URLs discovered (and cached) on first call.
    chassis_urls: Mutex<Option<Vec<String>>>,
}

impl RedfishSource {
    pub fn new(config: RedfishConfig) -> Result<Self> {
        let client = Client::builder()
        .danger_accept_invalid_certs(config.insecure_skip_verify)
        .timeout(config.timeout)
        .build()
        .map_err(CeemsError::Http)?;
        Ok(Self {
                client,
                config,
                chassis_urls: Mutex::new(None),
        })
    }

    async fn discover_chassis(&self) -> Result<Vec<String>> {
        let url = format!("{}/redfish/v1/Chassis", self.config.base_url.trim_end_matches('/'));
        let body: Value = self.get_json(&url).await?;
        let members = body
        .get("Members")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

        let mut urls: Vec<String> = members
        .iter()
        .filter_map(|m| m.get("@odata.id").and_then(Value::as_str))
        .map(|s| s.to_string())
        .collect();

        if !self.config.chassis_allowlist.is_empty() {
            urls.retain(|u| {
                    self.config
                    .chassis_allowlist
                    .iter()
                    .any(|allowed| u.ends_with(allowed.as_str()))
            });
        }

        Ok(urls)
    }

    async fn get_json(&self, path_or_url: &str) -> Result<Value> {
        let url = if path_or_url.starts_with("http") {
            path_or_url.to_string()
        } else {
            format!(
                "{}{}",
                self.config.base_url.trim_end_matches('/'),
                path_or_url
            )
        };
        let mut request = self.client.get(&url).timeout(self.config.timeout);
        if !self.config.username.is_empty() {
            request = request.basic_auth(&self.config.username, Some(&self.config.password));
        }
        let response = request.send().await.map_err(CeemsError::Http)?;
        response.json::<Value>().await.map_err(CeemsError::Http)
    }

    /// Chassis power is read lazily: unknown JSON fields are ignored,
    /// missing fields fall back to zero, tolerating vendor schema drift.
    fn extract_power_watts(chassis: &Value) -> f64 {
        chassis
        .get("Power")
        .and_then(|p| p.get("PowerControl"))
        .and_then(Value::as_array)
        .map(|controls| {
                controls
                .iter()
                .filter_map(|c| c.get("PowerConsumedWatts").and_then(Value::as_f64))
                .sum()
        })
        .unwrap_or(0.0)
    }
}

#[async_trait]
impl PowerSource for RedfishSource {
    async fn read(&self) -> Result<PowerReading> {
        let urls = {
            let cached = self.chassis_urls.lock().unwrap().clone();
            match cached {
                Some(urls) => urls,
                None => {
                    let urls = self.discover_chassis().await?;
                    *self.chassis_urls.lock().unwrap() = Some(urls.clone());
                    urls
                }
            }
        };

        if urls.is_empty() {
            return Err(CeemsError::Transient(
                    "no redfish chassis report power".into(),
            ));
        }

        let mut total = 0.0f64;
        let mut any_reporting = false;
        for url in &urls {
            let chassis_url = format!("{}/Power", url);
            match self.get_json(&chassis_url).await {
                Ok(chassis) => {
                    let watts = Self::extract_power_watts(&chassis);
                    if watts > 0.0 {
                        any_reporting = true;
                    }
                    total += watts;
                }
                Err(e) => warn!(chassis = %url, error = %e, "redfish chassis power fetch failed"),
            }
        }

        if !any_reporting {
            return Err(CeemsError::Transient(
                    "no redfish chassis reported nonzero power".into(),
            ));
        }

        let watts = total.round().clamp(0.0, u16::MAX as f64) as u16;
        Ok(PowerReading {
                current: watts,
                minimum: 0,
                maximum: 0,
                average: watts,
                activated: true,
        })
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "redfish"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extract_power_watts_ignores_unknown_fields_and_missing_power() {
        let chassis = json!({
                "Power": {
                    "PowerControl": [
                        {"PowerConsumedWatts": 120.5, "VendorExtra": "ignored"},
                        {"NoPowerField": true}
                    ]
                },
                "SomeVendorBlob": {"weird": [1,2,3]}
        });
        assert_eq!(RedfishSource::extract_power_watts(&chassis), 120.5);
    }

    #[test]
    fn extract_power_watts_defaults_to_zero_when_absent() {
        let chassis = json!({"Id": "Chassis.1"});
        assert_eq!(RedfishSource::extract_power_watts(&chassis), 0.0);
    }
}
