//! Config compiler — full HAProxy configuration and firewall reconciliation.
//!
//! Output is a sequence of lines that joins (with `\n`) into a complete
//! appliance configuration file. Identical input yields byte-identical
//! output: pools are emitted in sorted (source IP, source port) order.

use std::collections::{BTreeMap, BTreeSet};

use lbgrid_core::StatsVisibility;

use crate::model::{
    FirewallRuleSets, LoadBalancer, LoadBalancerConfig, PortForwardingRule, StatsEndpoint,
};
use crate::pool::{BLANK_LINE, forwarding_pool, load_balancer_pool, pool_name};

const GLOBAL_SECTION: &[&str] = &[
    "global",
    "\tlog 127.0.0.1:3914   local0 warning",
    "\tmaxconn 4096",
    "\tchroot /var/lib/haproxy",
    "\tuser haproxy",
    "\tgroup haproxy",
    "\tdaemon",
];

const DEFAULTS_SECTION: &[&str] = &[
    "defaults",
    "\tlog     global",
    "\tmode    tcp",
    "\toption  dontlognull",
    "\tretries 3",
    "\toption redispatch",
    "\toption forwardfor",
    "\toption forceclose",
    "\ttimeout connect    5000",
    "\ttimeout client     50000",
    "\ttimeout server     50000",
];

/// HAProxy refuses a config without any listener, so an empty pool set
/// gets this placeholder on the reserved discard port.
const DUMMY_LISTEN: &[&str] = &["listen  vmops 0.0.0.0:9", "\toption transparent"];

const STATS_REALM: &str = "Haproxy\\ Statistics";

/// Address bound by the reconciliation stats entry when stats are visible everywhere.
const ANY_ADDRESS: &str = "0.0.0.0/0";

/// Turns load-balancing intent into appliance configuration.
pub trait LoadBalancerConfigurator {
    /// Full configuration for a set of load balancers plus stats settings.
    fn generate_configuration(&self, config: &LoadBalancerConfig) -> Vec<String>;

    /// Full configuration for legacy forwarding entries.
    fn generate_forwarding_configuration(&self, rules: &[PortForwardingRule]) -> Vec<String>;

    /// Add/remove/stats reconciliation sets for the firewall layer.
    fn generate_fw_rules(&self, config: &LoadBalancerConfig) -> FirewallRuleSets;
}

/// HAProxy implementation of [`LoadBalancerConfigurator`]. Stateless.
#[derive(Debug, Clone, Copy, Default)]
pub struct HaProxyConfigurator;

impl HaProxyConfigurator {
    pub fn new() -> Self {
        Self
    }
}

impl LoadBalancerConfigurator for HaProxyConfigurator {
    fn generate_configuration(&self, config: &LoadBalancerConfig) -> Vec<String> {
        let mut result = preamble();

        match &config.stats.visibility {
            StatsVisibility::Disabled => {}
            StatsVisibility::Global => {
                push_stats_block(&mut result, &config.stats, "stats_on_public", &config.stats.public_ip);
            }
            StatsVisibility::GuestNetwork => {
                push_stats_block(&mut result, &config.stats, "stats_on_guest", &config.stats.guest_ip);
            }
            StatsVisibility::LinkLocal => {
                push_stats_block(&mut result, &config.stats, "stats_on_private", &config.stats.private_ip);
            }
            StatsVisibility::All => {
                push_stats_block(&mut result, &config.stats, "stats_on_public", &config.stats.public_ip);
                push_stats_block(&mut result, &config.stats, "stats_on_guest", &config.stats.guest_ip);
                push_stats_block(&mut result, &config.stats, "stats_on_private", &config.stats.private_ip);
            }
            StatsVisibility::DefaultPort(_) => {
                // Served from the defaults section on the regular HTTP port.
                result.extend(stats_directives(&config.stats));
            }
        }
        result.push(BLANK_LINE.to_string());

        let pools = active_load_balancers(&config.load_balancers);
        if pools.is_empty() {
            result.extend(DUMMY_LISTEN.iter().map(|s| s.to_string()));
        }
        result.push(BLANK_LINE.to_string());

        for lb in &pools {
            result.extend(load_balancer_pool(lb));
        }
        result
    }

    fn generate_forwarding_configuration(&self, rules: &[PortForwardingRule]) -> Vec<String> {
        let mut pools: BTreeMap<String, Vec<&PortForwardingRule>> = BTreeMap::new();
        for rule in rules.iter().filter(|r| !r.revoked) {
            pools
                .entry(pool_name(&rule.src_ip, rule.src_port))
                .or_default()
                .push(rule);
        }

        let mut result = preamble();
        result.push(BLANK_LINE.to_string());
        if pools.is_empty() {
            result.extend(DUMMY_LISTEN.iter().map(|s| s.to_string()));
        }
        result.push(BLANK_LINE.to_string());

        for (name, members) in &pools {
            result.extend(forwarding_pool(name, members));
        }
        result
    }

    fn generate_fw_rules(&self, config: &LoadBalancerConfig) -> FirewallRuleSets {
        let mut add = BTreeSet::new();
        let mut remove = BTreeSet::new();
        for lb in &config.load_balancers {
            let entry = format!("{}:{}:", lb.src_ip, lb.src_port);
            if lb.revoked {
                remove.insert(entry);
            } else {
                add.insert(entry);
            }
        }
        // An add and a remove for the same tuple cancel the removal.
        remove.retain(|entry| !add.contains(entry));

        let stats = &config.stats;
        let stats_entry = match &stats.visibility {
            StatsVisibility::GuestNetwork => stats_fw_entry(&stats.guest_ip, stats),
            StatsVisibility::LinkLocal => stats_fw_entry(&stats.private_ip, stats),
            StatsVisibility::Global => stats_fw_entry(&stats.public_ip, stats),
            StatsVisibility::All => stats_fw_entry(ANY_ADDRESS, stats),
            StatsVisibility::Disabled | StatsVisibility::DefaultPort(_) => String::new(),
        };

        FirewallRuleSets {
            add,
            remove,
            stats: BTreeSet::from([stats_entry]),
        }
    }
}

/// Join config lines into the file body.
pub fn render(lines: &[String]) -> String {
    lines.join("\n")
}

/// Global section, separator, defaults section.
fn preamble() -> Vec<String> {
    let mut lines: Vec<String> = GLOBAL_SECTION.iter().map(|s| s.to_string()).collect();
    lines.push(BLANK_LINE.to_string());
    lines.extend(DEFAULTS_SECTION.iter().map(|s| s.to_string()));
    lines
}

/// Non-revoked load balancers folded into one entry per pool, in pool-key order.
///
/// The first load balancer seen for a pool supplies its algorithm and
/// stickiness; later ones only contribute destinations.
fn active_load_balancers(lbs: &[LoadBalancer]) -> Vec<LoadBalancer> {
    let mut pools: BTreeMap<(&str, u16), LoadBalancer> = BTreeMap::new();
    for lb in lbs.iter().filter(|lb| !lb.revoked) {
        match pools.get_mut(&(lb.src_ip.as_str(), lb.src_port)) {
            Some(pool) => pool.destinations.extend(lb.destinations.iter().cloned()),
            None => {
                pools.insert((lb.src_ip.as_str(), lb.src_port), lb.clone());
            }
        }
    }
    pools.into_values().collect()
}

fn stats_directives(stats: &StatsEndpoint) -> Vec<String> {
    vec![
        "\tstats enable".to_string(),
        format!("\tstats uri     {}", stats.uri),
        format!("\tstats realm   {STATS_REALM}"),
        format!("\tstats auth    {}", stats.auth),
    ]
}

/// A dedicated stats listener, framed by empty lines.
fn push_stats_block(lines: &mut Vec<String>, stats: &StatsEndpoint, name: &str, ip: &str) {
    lines.push(String::new());
    lines.push(format!("listen {name} {ip}:{}", stats.port));
    lines.push("\tmode http".to_string());
    lines.push("\toption httpclose".to_string());
    lines.extend(stats_directives(stats));
    lines.push(String::new());
}

fn stats_fw_entry(ip: &str, stats: &StatsEndpoint) -> String {
    format!("{ip}:{}:{}:,", stats.port, stats.source_cidrs)
}
