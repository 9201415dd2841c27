// SPDX-License-Identifier: MIT OR Apache-2.0

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the IPMI device client (C1).
#[derive(Debug, Clone)]
pub struct IpmiConfig {
    /// Device index to try, in the order `/dev/ipmi{N}`, `/dev/ipmi/{N}`,
    /// `/dev/ipmidev/{N}`
    pub device_index: u32,
    /// Per-request timeout; the caller of `do()` always supplies one.
    pub default_timeout: Duration,
}

impl Default for IpmiConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            default_timeout: Duration::from_secs(2),
        }
    }
}

/// Configuration for the Redfish sub-source.
#[derive(Debug, Clone)]
pub struct RedfishConfig {
    pub base_url: String,
    pub username: String,
    pub password: String,
    /// Skip TLS certificate verification. Many BMCs ship self-signed certs.
    pub insecure_skip_verify: bool,
    /// Only sum power from these chassis ids, if non-empty.
    pub chassis_allowlist: Vec<String>,
    pub timeout: Duration,
}

impl RedfishConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            username: String::new(),
            password: String::new(),
            insecure_skip_verify: false,
            chassis_allowlist: Vec::new(),
            timeout: Duration::from_secs(2),
        }
    }
}

/// Configuration for the RAPL sub-source.
#[derive(Debug, Clone)]
pub struct RaplConfig {
    /// Root of the powercap pseudo-filesystem, normally
    /// `/sys/class/powercap`.
    pub powercap_root: PathBuf,
}

impl Default for RaplConfig {
    fn default() -> Self {
        Self {
            powercap_root: PathBuf::from("/sys/class/powercap"),
        }
    }
}

/// Configuration for the Cray `pm_counters` sub-source.
#[derive(Debug, Clone)]
pub struct CrayConfig {
    pub pm_counters_path: PathBuf,
}

impl Default for CrayConfig {
    fn default() -> Self {
        Self {
            pm_counters_path: PathBuf::from("/sys/cray/pm_counters/power"),
        }
    }
}

/// Configuration for the host power multiplexer (C2).
#[derive(Debug, Clone)]
pub struct PowerConfig {
    pub ipmi: IpmiConfig,
    pub redfish: Option<RedfishConfig>,
    pub rapl: RaplConfig,
    pub cray: Option<CrayConfig>,
    /// Consecutive soft failures before the multiplexer re-opens the
    /// underlying source. default: 3.
    pub reopen_after_failures: u32,
    /// Consecutive failures before the multiplexer marks itself degraded.
    /// default: `M=10`.
    pub degraded_after_failures: u32,
    /// How often the GPU-power-inclusion flag is re-probed.
    pub gpu_probe_interval: Duration,
}

impl PowerConfig {
    pub fn with_defaults() -> Self {
        Self::default()
    }
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            ipmi: IpmiConfig::default(),
            redfish: None,
            rapl: RaplConfig::default(),
            cray: None,
            reopen_after_failures: 3,
            degraded_after_failures: 10,
            gpu_probe_interval: Duration::from_secs(6 * 3600),
        }
    }
}
