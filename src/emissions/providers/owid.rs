// SPDX-License-Identifier: MIT OR Apache-2.0

//! OWID provider: reads an embedded, immutable CSV at construction,
//! keeps the last-year-seen row per country, and translates ISO-3 to
//! ISO-2 for the exposed key

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use serde::Deserialize;

use crate::config::OwidConfig;
use crate::emissions::{EmissionFactor, EmissionProvider, Snapshot};
use crate::error::{CeemsError, Result};

const EMBEDDED_CSV: &str = include_str!("owid_data.csv");

#[derive(Debug, Deserialize)]
struct Row {
    #[serde(rename = "Entity")]
    entity: String,
    #[serde(rename = "Code")]
    code: String,
    #[serde(rename = "Year")]
    year: i32,
    #[serde(rename = "grams_co2_per_kwh")]
    grams_co2_per_kwh: f64,
}

/// Reads an embedded CSV at construction (OWID provides no live API) and
/// republishes a static snapshot keyed by ISO-2 country code.
pub struct OwidProvider {
    snapshot: ArcSwapOption<Snapshot>,
    initial: Snapshot,
}

impl OwidProvider {
    pub fn from_config(config: OwidConfig) -> Result<Self> {
        let csv_data = match &config.csv_path_override {
            Some(path) => std::fs::read_to_string(path)?,
            None => EMBEDDED_CSV.to_string(),
        };
        let snapshot = parse_owid_csv(&csv_data)?;
        Ok(Self {
                snapshot: ArcSwapOption::empty(),
                initial: snapshot,
        })
    }
}

#[async_trait]
impl EmissionProvider for OwidProvider {
    fn name(&self) -> &'static str {
        "owid"
    }

    async fn refresh(&self) -> Result<Snapshot> {
        let snapshot = self.initial.clone();
        self.snapshot.store(Some(Arc::new(snapshot.clone())));
        Ok(snapshot)
    }

    fn current(&self) -> Option<Snapshot> {
        self.snapshot.load_full().map(|arc| (*arc).clone())
    }

    fn tick_interval(&self) -> Duration {
        // The embedded dataset never changes at runtime; this interval only
        // keeps the provider's snapshot's `updated_at` from looking
        // permanently stale to observers.
        Duration::from_secs(24 * 3600)
    }
}

/// Parses OWID's `(country-name, ISO-3, year, grams/kWh)` CSV, keeping
/// only the last-year-seen row per country and translating ISO-3 to
/// ISO-2. Rows with a blank ISO-3 are skipped — they denote regions, not
/// countries.
fn parse_owid_csv(data: &str) -> Result<Snapshot> {
    let mut reader = csv::Reader::from_reader(data.as_bytes());
    let mut latest_by_country: HashMap<String, Row> = HashMap::new();

    for result in reader.deserialize::<Row>() {
        let row: Row = result.map_err(CeemsError::Csv)?;
        if row.code.trim().is_empty() {
            continue;
        }
        match latest_by_country.get(&row.entity) {
            Some(existing) if existing.year >= row.year => {}
            _ => {
                latest_by_country.insert(row.entity.clone(), row);
            }
        }
    }

    let mut snapshot = Snapshot::new();
    for row in latest_by_country.into_values() {
        let Some(iso2) = iso3_to_iso2(&row.code) else {
            tracing::debug!(code = %row.code, "owid: unrecognized iso-3 code, skipping");
            continue;
        };
        snapshot.insert(
            iso2.to_string(),
            EmissionFactor {
                zone: iso2.to_string(),
                name: row.entity,
                grams_co2_per_kwh: row.grams_co2_per_kwh,
                updated_at: Instant::now(),
            },
        );
    }
    Ok(snapshot)
}

/// A small ISO-3166 alpha-3 to alpha-2 table covering the countries OWID
/// ships data for. Extend as new countries are needed; an unrecognized
/// code is skipped rather than treated as fatal.
fn iso3_to_iso2(code: &str) -> Option<&'static str> {
    Some(match code {
            "AFG" => "AF",
            "FRA" => "FR",
            "DEU" => "DE",
            "USA" => "US",
            "GBR" => "GB",
            "CHN" => "CN",
            "IND" => "IN",
            "JPN" => "JP",
            "BRA" => "BR",
            "CAN" => "CA",
            "AUS" => "AU",
            "ESP" => "ES",
            "ITA" => "IT",
            "NLD" => "NL",
            "POL" => "PL",
            "SWE" => "SE",
            "NOR" => "NO",
            "FIN" => "FI",
            "DNK" => "DK",
            "CHE" => "CH",
            _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The last year seen for a country wins over earlier rows.
    #[test]
    fn keeps_last_year_seen_row() {
        let csv = "Entity,Code,Year,grams_co2_per_kwh\n\
        Afghanistan,AFG,2000,255.32\n\
        Afghanistan,AFG,2001,118.64\n\
        Afghanistan,AFG,2002,144.93\n";
        let snapshot = parse_owid_csv(csv).unwrap();
        assert_eq!(snapshot.len(), 1);
        let af = &snapshot["AF"];
        assert_eq!(af.name, "Afghanistan");
        assert_eq!(af.grams_co2_per_kwh, 144.93);
    }

    #[test]
    fn skips_blank_iso3_region_rows() {
        let csv = "Entity,Code,Year,grams_co2_per_kwh\n\
        Africa,,2000,550.12\n\
        France,FRA,2021,56.4\n";
        let snapshot = parse_owid_csv(csv).unwrap();
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.contains_key("FR"));
    }

    #[test]
    fn embedded_csv_parses_without_error() {
        let snapshot = parse_owid_csv(EMBEDDED_CSV).unwrap();
        assert!(snapshot.contains_key("FR"));
        assert!(snapshot.contains_key("DE"));
        assert!(!snapshot.is_empty());
    }
}
