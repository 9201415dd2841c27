// SPDX-License-Identifier: MIT OR Apache-2.0

//! The five `EmissionProvider` implementations: a static world-average,
//! OWID's embedded CSV, RTE's single-zone API, Electricity Maps'
//! multi-zone fan-out, and WattTime's bearer-token API.

pub mod emaps;
pub mod owid;
pub mod rte;
pub mod static_provider;
pub mod watttime;

pub use emaps::ElectricityMapsProvider;
pub use owid::OwidProvider;
pub use rte::RteProvider;
pub use static_provider::StaticProvider;
pub use watttime::WattTimeProvider;
