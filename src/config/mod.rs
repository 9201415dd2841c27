// SPDX-License-Identifier: MIT OR Apache-2.0

//! Typed configuration structs consumed by the core components.
//!
//! This crate never reads a YAML file or parses a CLI flag itself — that is
//! the job of the thin entrypoint that embeds it (out of scope, per the
//! system this core belongs to). What lives here is the shape those
//! collaborators populate and hand to `security`, `power`, `emissions`,
//! `proxy`, and `tsdb`.

mod emissions;
mod power;
mod proxy;
mod security;
mod tsdb;

pub use emissions::{EmaPsConfig, EmissionPoolConfig, OwidConfig, RteConfig, StaticConfig, WattTimeConfig};
pub use power::{CrayConfig, IpmiConfig, PowerConfig, RaplConfig, RedfishConfig};
pub use proxy::{BackendConfig, BackendCredentials, BackendKind, PoolConfig, ProxyConfig, StrategyKind};
pub use security::{AclPathConfig, AclPathMode, SecurityConfig};
pub use tsdb::TsdbConfig;

/// Recognized environment variables (others are ignored by this crate).
pub mod env {
    pub const EMAPS_API_TOKEN: &str = "EMAPS_API_TOKEN";
    pub const WT_USERNAME: &str = "WT_USERNAME";
    pub const WT_PASSWORD: &str = "WT_PASSWORD";
    pub const WT_REGION: &str = "WT_REGION";
    pub const NODE_NAME: &str = "NODE_NAME";
    /// Test-only override for the Electricity Maps base URL.
    pub const EMAPS_BASE_URL_OVERRIDE: &str = "__EMAPS_BASE_URL";
    /// Test-only override for the WattTime base URL.
    pub const WT_BASE_URL_OVERRIDE: &str = "__WT_BASE_URL";
}
