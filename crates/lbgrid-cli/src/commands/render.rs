//! `lbgrid render` / `lbgrid fw-rules` — compile a rule file offline.
//!
//! A rule file lists load balancers (and optionally legacy forwarding
//! entries) plus the addresses the stats page binds to:
//!
//! ```toml
//! [stats]
//! visibility = "global"
//! public_ip = "203.0.113.5"
//!
//! [[load_balancers]]
//! src_ip = "203.0.113.5"
//! src_port = 80
//! algorithm = "roundrobin"
//! destinations = [{ ip = "10.1.1.20", port = 8080 }]
//! ```

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::info;

use lbgrid_core::{LbGridConfig, StatsSettings, StatsVisibility};
use lbgrid_haproxy::{
    FirewallRuleSets, HaProxyConfigurator, LoadBalancer, LoadBalancerConfig,
    LoadBalancerConfigurator, PortForwardingRule, StatsEndpoint,
};

/// Contents of a rule file.
#[derive(Debug, Default, Deserialize)]
struct RuleFile {
    #[serde(default)]
    stats: RuleFileStats,
    #[serde(default)]
    load_balancers: Vec<LoadBalancer>,
    #[serde(default)]
    forwarding: Vec<PortForwardingRule>,
}

/// Stats addresses; visibility overrides the settings file when present.
#[derive(Debug, Default, Deserialize)]
struct RuleFileStats {
    visibility: Option<String>,
    #[serde(default)]
    public_ip: String,
    #[serde(default)]
    guest_ip: String,
    #[serde(default)]
    private_ip: String,
}

pub fn render(path: &str, config: Option<&str>, forwarding: bool) -> Result<()> {
    println!("{}", render_file(Path::new(path), config.map(Path::new), forwarding)?);
    Ok(())
}

pub fn fw_rules(path: &str, config: Option<&str>) -> Result<()> {
    let sets = fw_rules_file(Path::new(path), config.map(Path::new))?;
    println!("{}", serde_json::to_string_pretty(&sets)?);
    Ok(())
}

fn render_file(path: &Path, config: Option<&Path>, forwarding: bool) -> Result<String> {
    let rules = read_rule_file(path)?;
    let configurator = HaProxyConfigurator::new();

    let lines = if forwarding {
        info!(entries = rules.forwarding.len(), "compiling forwarding entries");
        configurator.generate_forwarding_configuration(&rules.forwarding)
    } else {
        let lb_config = load_balancer_config(rules, &stats_settings(config)?);
        info!(load_balancers = lb_config.load_balancers.len(), "compiling load balancers");
        configurator.generate_configuration(&lb_config)
    };
    Ok(lbgrid_haproxy::render(&lines))
}

fn fw_rules_file(path: &Path, config: Option<&Path>) -> Result<FirewallRuleSets> {
    let rules = read_rule_file(path)?;
    let lb_config = load_balancer_config(rules, &stats_settings(config)?);
    Ok(HaProxyConfigurator::new().generate_fw_rules(&lb_config))
}

fn read_rule_file(path: &Path) -> Result<RuleFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read rule file {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("invalid rule file {}", path.display()))
}

fn stats_settings(config: Option<&Path>) -> Result<StatsSettings> {
    match config {
        Some(path) => {
            let config = LbGridConfig::from_file(path)
                .with_context(|| format!("failed to load {}", path.display()))?;
            Ok(config.settings()?.stats)
        }
        None => Ok(StatsSettings::default()),
    }
}

fn load_balancer_config(rules: RuleFile, settings: &StatsSettings) -> LoadBalancerConfig {
    let mut settings = settings.clone();
    if let Some(visibility) = rules.stats.visibility {
        settings.visibility = StatsVisibility::from(visibility);
    }
    let stats = StatsEndpoint::from_settings(
        &settings,
        &rules.stats.public_ip,
        &rules.stats.guest_ip,
        &rules.stats.private_ip,
    );
    LoadBalancerConfig {
        load_balancers: rules.load_balancers,
        stats,
    }
}
