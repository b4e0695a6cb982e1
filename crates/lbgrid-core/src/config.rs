//! lbgrid.toml configuration parser.
//!
//! Every section and field is optional in the file; [`LbGridConfig::settings`]
//! resolves the parsed file into an [`ElbSettings`] with defaults applied.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::StatsVisibility;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LbGridConfig {
    pub appliance: Option<ApplianceConfig>,
    pub orchestrator: Option<OrchestratorConfig>,
    pub stats: Option<StatsConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplianceConfig {
    pub instance_name: Option<String>,
    pub ram_size_mb: Option<u32>,
    pub cpu_mhz: Option<u32>,
    pub use_local_storage: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// How long to wait for the per-network lock (e.g. "0s", "500ms").
    pub lock_wait: Option<String>,
    /// Upper bound on a single agent dispatch (e.g. "120s").
    pub agent_timeout: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatsConfig {
    pub visibility: Option<String>,
    pub port: Option<u16>,
    pub uri: Option<String>,
    pub auth: Option<String>,
    pub source_cidrs: Option<String>,
}

pub const DEFAULT_INSTANCE_NAME: &str = "VM";
pub const DEFAULT_ELB_VM_RAM_SIZE_MB: u32 = 128;
pub const DEFAULT_ELB_VM_CPU_MHZ: u32 = 128;
pub const DEFAULT_AGENT_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_STATS_PORT: u16 = 8081;
pub const DEFAULT_STATS_URI: &str = "/admin?stats";
pub const DEFAULT_STATS_AUTH: &str = "admin1:AdMiN123";
pub const DEFAULT_STATS_CIDRS: &str = "0/0";

/// Resolved settings for the elastic load-balancer control plane.
#[derive(Debug, Clone, PartialEq)]
pub struct ElbSettings {
    pub instance_name: String,
    pub ram_size_mb: u32,
    pub cpu_mhz: u32,
    pub use_local_storage: bool,
    pub lock_wait: Duration,
    pub agent_timeout: Duration,
    pub stats: StatsSettings,
}

/// Resolved statistics-page settings.
#[derive(Debug, Clone, PartialEq)]
pub struct StatsSettings {
    pub visibility: StatsVisibility,
    pub port: u16,
    pub uri: String,
    pub auth: String,
    pub source_cidrs: String,
}

impl Default for ElbSettings {
    fn default() -> Self {
        Self {
            instance_name: DEFAULT_INSTANCE_NAME.to_string(),
            ram_size_mb: DEFAULT_ELB_VM_RAM_SIZE_MB,
            cpu_mhz: DEFAULT_ELB_VM_CPU_MHZ,
            use_local_storage: false,
            lock_wait: Duration::ZERO,
            agent_timeout: DEFAULT_AGENT_TIMEOUT,
            stats: StatsSettings::default(),
        }
    }
}

impl Default for StatsSettings {
    fn default() -> Self {
        Self {
            visibility: StatsVisibility::Global,
            port: DEFAULT_STATS_PORT,
            uri: DEFAULT_STATS_URI.to_string(),
            auth: DEFAULT_STATS_AUTH.to_string(),
            source_cidrs: DEFAULT_STATS_CIDRS.to_string(),
        }
    }
}

impl LbGridConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: LbGridConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// A fully populated config carrying every default explicitly.
    pub fn scaffold() -> Self {
        LbGridConfig {
            appliance: Some(ApplianceConfig {
                instance_name: Some(DEFAULT_INSTANCE_NAME.to_string()),
                ram_size_mb: Some(DEFAULT_ELB_VM_RAM_SIZE_MB),
                cpu_mhz: Some(DEFAULT_ELB_VM_CPU_MHZ),
                use_local_storage: Some(false),
            }),
            orchestrator: Some(OrchestratorConfig {
                lock_wait: Some("0s".to_string()),
                agent_timeout: Some("120s".to_string()),
            }),
            stats: Some(StatsConfig {
                visibility: Some(StatsVisibility::Global.to_string()),
                port: Some(DEFAULT_STATS_PORT),
                uri: Some(DEFAULT_STATS_URI.to_string()),
                auth: Some(DEFAULT_STATS_AUTH.to_string()),
                source_cidrs: Some(DEFAULT_STATS_CIDRS.to_string()),
            }),
        }
    }

    /// Resolve into settings, filling in defaults.
    ///
    /// Fails only on malformed duration strings.
    pub fn settings(&self) -> anyhow::Result<ElbSettings> {
        let defaults = ElbSettings::default();
        let appliance = self.appliance.clone().unwrap_or_default();
        let orchestrator = self.orchestrator.clone().unwrap_or_default();
        let stats = self.stats.clone().unwrap_or_default();

        let lock_wait = match orchestrator.lock_wait.as_deref() {
            Some(s) => parse_duration(s)
                .ok_or_else(|| anyhow::anyhow!("invalid orchestrator.lock_wait: {s:?}"))?,
            None => defaults.lock_wait,
        };
        let agent_timeout = match orchestrator.agent_timeout.as_deref() {
            Some(s) => parse_duration(s)
                .ok_or_else(|| anyhow::anyhow!("invalid orchestrator.agent_timeout: {s:?}"))?,
            None => defaults.agent_timeout,
        };

        Ok(ElbSettings {
            instance_name: appliance.instance_name.unwrap_or(defaults.instance_name),
            ram_size_mb: appliance.ram_size_mb.unwrap_or(defaults.ram_size_mb),
            cpu_mhz: appliance.cpu_mhz.unwrap_or(defaults.cpu_mhz),
            use_local_storage: appliance
                .use_local_storage
                .unwrap_or(defaults.use_local_storage),
            lock_wait,
            agent_timeout,
            stats: StatsSettings {
                visibility: stats
                    .visibility
                    .map(StatsVisibility::from)
                    .unwrap_or(defaults.stats.visibility),
                port: stats.port.unwrap_or(defaults.stats.port),
                uri: stats.uri.unwrap_or(defaults.stats.uri),
                auth: stats.auth.unwrap_or(defaults.stats.auth),
                source_cidrs: stats.source_cidrs.unwrap_or(defaults.stats.source_cidrs),
            },
        })
    }
}

/// Parse "500ms", "5s", "2m", or a bare number of seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(secs) = s.strip_suffix('s') {
        if let Some(ms) = secs.strip_suffix('m') {
            ms.parse::<u64>().ok().map(Duration::from_millis)
        } else {
            secs.parse::<u64>().ok().map(Duration::from_secs)
        }
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}
