// SPDX-License-Identifier: MIT OR Apache-2.0

use std::time::Duration;

/// Configuration for the static world-average provider.
#[derive(Debug, Clone, Default)]
pub struct StaticConfig {
    /// Zone code to publish the constant under, e.g. `"WOR"`.
    pub zone: String,
    pub zone_name: String,
}

/// Configuration for the OWID provider — only the CSV source needs
/// configuring, since the rest is embedded and immutable.
#[derive(Debug, Clone, Default)]
pub struct OwidConfig {
    /// Override the embedded CSV with one read from disk (used in tests).
    pub csv_path_override: Option<std::path::PathBuf>,
}

/// Configuration for the RTE OpenDataSoft provider.
#[derive(Debug, Clone)]
pub struct RteConfig {
    pub base_url: String,
    pub refresh_interval: Duration,
    pub request_timeout: Duration,
}

impl Default for RteConfig {
    fn default() -> Self {
        Self {
            base_url: "https://odre.opendatasoft.com".to_string(),
            refresh_interval: Duration::from_secs(2 * 60),
            request_timeout: Duration::from_secs(5),
        }
    }
}

/// Configuration for the Electricity Maps provider.
#[derive(Debug, Clone)]
pub struct EmaPsConfig {
    pub base_url: String,
    pub api_token: String,
    /// Zone codes to poll, e.g. `FR`, `DE`.
    pub zones: Vec<String>,
    pub refresh_interval: Duration,
    pub request_timeout: Duration,
    pub startup_timeout: Duration,
}

impl Default for EmaPsConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.electricitymap.org/v3".to_string(),
            api_token: String::new(),
            zones: Vec::new(),
            refresh_interval: Duration::from_secs(30 * 60),
            request_timeout: Duration::from_secs(5),
            startup_timeout: Duration::from_secs(30),
        }
    }
}

/// Configuration for the WattTime provider.
#[derive(Debug, Clone)]
pub struct WattTimeConfig {
    pub base_url: String,
    pub username: String,
    pub password: String,
    pub region: String,
    pub refresh_interval: Duration,
    pub request_timeout: Duration,
    /// Fallback token lifetime used when the login response carries no
    /// explicit expiry.
    pub default_token_ttl: Duration,
}

impl Default for WattTimeConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.watttime.org".to_string(),
            username: String::new(),
            password: String::new(),
            region: String::new(),
            refresh_interval: Duration::from_secs(5 * 60),
            request_timeout: Duration::from_secs(5),
            default_token_ttl: Duration::from_secs(25 * 60),
        }
    }
}

/// Top-level configuration for the emission-factor pool (C4): which
/// providers are enabled and their individual configs.
#[derive(Debug, Clone, Default)]
pub struct EmissionPoolConfig {
    pub enabled_providers: Vec<String>,
    pub static_provider: StaticConfig,
    pub owid: OwidConfig,
    pub rte: RteConfig,
    pub emaps: EmaPsConfig,
    pub watttime: WattTimeConfig,
}
