// SPDX-License-Identifier: MIT OR Apache-2.0

//! Cray sub-source: a small well-known file containing current watts as
//! ASCII, reparsed on every read

use async_trait::async_trait;
use tokio::fs;

use crate::config::CrayConfig;
use crate::error::{CeemsError, Result};
use crate::power::{PowerReading, PowerSource};

pub struct CraySource {
    config: CrayConfig,
}

impl CraySource {
    pub fn new(config: CrayConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl PowerSource for CraySource {
    async fn read(&self) -> Result<PowerReading> {
        let raw = fs::read_to_string(&self.config.pm_counters_path)
        .await
        .map_err(|e| CeemsError::Transient(format!("failed to read pm_counters: {e}")))?;

        let watts: u16 = raw
        .split_whitespace()
        .next()
        .ok_or_else(|| CeemsError::Protocol("empty pm_counters file".into()))?
        .parse()
        .map_err(|e| CeemsError::Protocol(format!("unparseable pm_counters value: {e}")))?;

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
        "cray"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn reparses_on_every_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("power");
        std::fs::File::create(&path).unwrap().write_all(b"450\n").unwrap();

        let source = CraySource::new(CrayConfig {
                pm_counters_path: path.clone(),
        });
        assert_eq!(source.read().await.unwrap().current, 450);

        std::fs::write(&path, b"500\n").unwrap();
        assert_eq!(source.read().await.unwrap().current, 500);
    }

    #[tokio::test]
    async fn missing_file_is_transient_error() {
        let source = CraySource::new(CrayConfig {
                pm_counters_path: "/nonexistent/pm_counters".into(),
        });
        assert!(source.read().await.is_err());
    }
}
