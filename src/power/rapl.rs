// SPDX-License-Identifier: MIT OR Apache-2.0

//! RAPL sub-source: reads `package`/`dram` cumulative-joules counters from
//! the kernel powercap pseudo-filesystem and converts deltas to average
//! watts

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::debug;

use crate::config::RaplConfig;
use crate::error::{CeemsError, Result};
use crate::power::{PowerReading, PowerSource};

#[derive(Debug, Clone, Copy)]
struct Sample {
    microjoules: u64,
    at: Instant,
}

struct DomainState {
    path: PathBuf,
    previous: Option<Sample>,
}

/// Reads `/sys/class/powercap/intel-rapl:*/energy_uj` for the `package`
/// domain and its nested `dram` sub-domain, maintaining a per-domain
/// previous-value/previous-timestamp pair.
pub struct RaplSource {
    domains: Mutex<Vec<DomainState>>,
}

impl RaplSource {
    /// Discovers RAPL domains named `package` or `dram` under
    /// `config.powercap_root`.
    pub fn discover(config: &RaplConfig) -> Result<Self> {
        let mut domains = Vec::new();
        let entries = fs::read_dir(&config.powercap_root)
        .map_err(|e| CeemsError::Transient(format!("failed to list powercap root: {e}")))?;

        for entry in entries.flatten() {
            let path = entry.path();
            let name_path = path.join("name");
            let Ok(name) = fs::read_to_string(&name_path) else {
                continue;
            };
            let name = name.trim();
            if name == "package" || name.starts_with("dram") || name.contains("core") {
                domains.push(DomainState {
                        path,
                        previous: None,
                });
            }
        }

        if domains.is_empty() {
            return Err(CeemsError::Transient(
                    "no rapl package/dram domains found".into(),
            ));
        }

        debug!(count = domains.len(), "discovered rapl domains");
        Ok(Self {
                domains: Mutex::new(domains),
        })
    }

    fn read_domain_microjoules(path: &Path) -> Result<u64> {
        let raw = fs::read_to_string(path.join("energy_uj"))
        .map_err(|e| CeemsError::Transient(format!("failed to read rapl counter: {e}")))?;
        raw.trim()
        .parse::<u64>()
        .map_err(|e| CeemsError::Transient(format!("unparseable rapl counter: {e}")))
    }
}

#[async_trait]
impl PowerSource for RaplSource {
    async fn read(&self) -> Result<PowerReading> {
        let mut domains = self.domains.lock().unwrap();
        let now = Instant::now();
        let mut total_watts = 0.0f64;

        for domain in domains.iter_mut() {
            let microjoules = Self::read_domain_microjoules(&domain.path)?;
            let sample = Sample {
                microjoules,
                at: now,
            };

            let watts = match domain.previous {
                // Wraparound: a decrease between reads is treated as the
                // first sample for this interval, reporting zero.
                Some(prev) if microjoules >= prev.microjoules => {
                    let delta_uj = (microjoules - prev.microjoules) as f64;
                    let delta_s = (now - prev.at).as_secs_f64();
                    if delta_s > 0.0 {
                        delta_uj / 1_000_000.0 / delta_s
                    } else {
                        0.0
                    }
                }
                _ => 0.0,
            };

            total_watts += watts;
            domain.previous = Some(sample);
        }

        let watts = total_watts.round().clamp(0.0, u16::MAX as f64) as u16;
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
        "rapl"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;

    fn make_domain(dir: &Path, name: &str, start_uj: u64) -> PathBuf {
        let domain_dir = dir.join(name);
        fs::create_dir_all(&domain_dir).unwrap();
        File::create(domain_dir.join("name"))
        .unwrap()
        .write_all(name.as_bytes())
        .unwrap();
        File::create(domain_dir.join("energy_uj"))
        .unwrap()
        .write_all(start_uj.to_string().as_bytes())
        .unwrap();
        domain_dir
    }

    #[tokio::test]
    async fn first_sample_reports_zero() {
        let dir = tempfile::tempdir().unwrap();
        make_domain(dir.path(), "package", 1_000_000);
        let config = RaplConfig {
            powercap_root: dir.path().to_path_buf(),
        };
        let source = RaplSource::discover(&config).unwrap();
        let reading = source.read().await.unwrap();
        assert_eq!(reading.current, 0);
    }

    #[tokio::test]
    async fn wraparound_resets_to_first_sample() {
        let dir = tempfile::tempdir().unwrap();
        let domain = make_domain(dir.path(), "package", 5_000_000);
        let config = RaplConfig {
            powercap_root: dir.path().to_path_buf(),
        };
        let source = RaplSource::discover(&config).unwrap();
        let _ = source.read().await.unwrap();

        // Simulate a counter reset (wraparound) with a smaller value.
        File::create(domain.join("energy_uj"))
        .unwrap()
        .write_all(b"1000")
        .unwrap();
        let reading = source.read().await.unwrap();
        assert_eq!(reading.current, 0);
    }
}
