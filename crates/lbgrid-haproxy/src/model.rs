//! Compiler inputs and outputs.
//!
//! [`LoadBalancer`] is the wire form of a rule handed to the compiler;
//! [`LoadBalancerConfig`] bundles the load balancers with the stats
//! endpoint settings for one appliance.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use lbgrid_core::{Destination, Rule, StatsSettings, StatsVisibility, StickinessPolicy};

/// One public endpoint and its backends, as seen by the compiler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalancer {
    pub src_ip: String,
    pub src_port: u16,
    #[serde(default = "default_protocol")]
    pub protocol: String,
    #[serde(default)]
    pub algorithm: String,
    #[serde(default)]
    pub revoked: bool,
    #[serde(default)]
    pub already_added: bool,
    #[serde(default)]
    pub destinations: Vec<Destination>,
    #[serde(default)]
    pub stickiness_policies: Vec<StickinessPolicy>,
}

fn default_protocol() -> String {
    "tcp".to_string()
}

impl From<&Rule> for LoadBalancer {
    fn from(rule: &Rule) -> Self {
        Self {
            src_ip: rule.source_ip.clone(),
            src_port: rule.source_port,
            protocol: rule.protocol.clone(),
            algorithm: rule.algorithm.clone(),
            revoked: rule.is_revoked(),
            already_added: false,
            destinations: rule.destinations.clone(),
            stickiness_policies: rule.stickiness_policies.clone(),
        }
    }
}

/// A single source→destination forwarding entry (legacy input form).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortForwardingRule {
    pub src_ip: String,
    pub src_port: u16,
    pub dst_ip: String,
    pub dst_port: u16,
    #[serde(default)]
    pub revoked: bool,
}

/// Addresses and credentials for the appliance statistics page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsEndpoint {
    pub visibility: StatsVisibility,
    pub public_ip: String,
    pub guest_ip: String,
    pub private_ip: String,
    pub port: u16,
    pub uri: String,
    pub auth: String,
    pub source_cidrs: String,
}

impl StatsEndpoint {
    /// Bind resolved stats settings to an appliance's addresses.
    pub fn from_settings(
        settings: &StatsSettings,
        public_ip: &str,
        guest_ip: &str,
        private_ip: &str,
    ) -> Self {
        Self {
            visibility: settings.visibility.clone(),
            public_ip: public_ip.to_string(),
            guest_ip: guest_ip.to_string(),
            private_ip: private_ip.to_string(),
            port: settings.port,
            uri: settings.uri.clone(),
            auth: settings.auth.clone(),
            source_cidrs: settings.source_cidrs.clone(),
        }
    }

    /// Stats disabled, no addresses.
    pub fn disabled() -> Self {
        Self::from_settings(
            &StatsSettings {
                visibility: StatsVisibility::Disabled,
                ..StatsSettings::default()
            },
            "",
            "",
            "",
        )
    }
}

/// Everything needed to render one appliance configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalancerConfig {
    pub load_balancers: Vec<LoadBalancer>,
    pub stats: StatsEndpoint,
}

/// Reconciliation sets for the transport-level firewall layer.
///
/// Entries are `ip:port:` for `add`/`remove` and `ip:port:cidrs:,` for `stats`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirewallRuleSets {
    pub add: BTreeSet<String>,
    pub remove: BTreeSet<String>,
    pub stats: BTreeSet<String>,
}
