// SPDX-License-Identifier: MIT OR Apache-2.0

//! Host power reading: the IPMI device client (C1) and the multi-source
//! power multiplexer (C2) that unifies it with RAPL, Redfish, and Cray
//! `pm_counters` behind one polymorphic `PowerSource`.

pub mod cray;
pub mod ipmi;
pub mod multiplexer;
pub mod rapl;
pub mod redfish;

use async_trait::async_trait;

use crate::error::Result;

/// `{current, minimum, maximum, average}` watts plus an `activated` flag —
/// All sources except IPMI may leave min/max/average zero;
/// `current` is authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PowerReading {
    pub current: u16,
    pub minimum: u16,
    pub maximum: u16,
    pub average: u16,
    pub activated: bool,
}

/// A polymorphic power source: `{read() -> Reading, close()}`.
#[async_trait]
pub trait PowerSource: Send + Sync {
    async fn read(&self) -> Result<PowerReading>;
    async fn close(&self) -> Result<()>;
    /// Human-readable name used in logs/metrics, e.g. `"redfish"`.
    fn name(&self) -> &'static str;
}

pub use multiplexer::{PowerMultiplexer, PowerSourceAttributes};
