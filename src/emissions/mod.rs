// SPDX-License-Identifier: MIT OR Apache-2.0

//! Emission-factor provider pool (C4): concurrently maintains live
//! carbon-intensity estimates for many zones from independent external
//! APIs and exposes an always-consistent snapshot.

pub mod providers;

mod pool;

pub use pool::{EmissionPool, EmissionPoolBuilder};

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Instant;

use crate::error::Result;

/// `{zone-code, human-name, grams-CO2-per-kWh, updated-at}`
#[derive(Debug, Clone, PartialEq)]
pub struct EmissionFactor {
    pub zone: String,
    pub name: String,
    pub grams_co2_per_kwh: f64,
    pub updated_at: Instant,
}

/// A provider's most recent snapshot: `zone-code -> factor`.
pub type Snapshot = HashMap<String, EmissionFactor>;

/// A value with `{refresh() -> snapshot, stop()}` and a background ticker
/// interval
#[async_trait]
pub trait EmissionProvider: Send + Sync {
    /// Human-readable provider name used as the `collect()` map key.
    fn name(&self) -> &'static str;

    /// Performs one refresh, returning the new snapshot. Must not block on
    /// anything longer than the provider's own deadline.
    async fn refresh(&self) -> Result<Snapshot>;

    /// Returns the most recently produced snapshot without making a
    /// network call. `None` if no refresh has ever succeeded.
    fn current(&self) -> Option<Snapshot>;

    /// The interval between scheduled refreshes.
    fn tick_interval(&self) -> std::time::Duration;
}
