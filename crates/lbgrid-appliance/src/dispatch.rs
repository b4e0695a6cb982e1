//! Agent dispatch boundary.
//!
//! Commands for an appliance are bundled into [`Commands`] and sent to the
//! agent on the appliance's host through an [`AgentDispatcher`]. The
//! dispatcher returns one [`Answer`] per command, or a [`DispatchError`]
//! when the agent cannot be reached in time.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use lbgrid_core::HostId;
use lbgrid_haproxy::FirewallRuleSets;

/// Access detail key for the appliance's private (control) IP.
pub const ROUTER_IP: &str = "router.ip";

/// Access detail key for the appliance's instance name.
pub const ROUTER_NAME: &str = "router.name";

/// What the agent does after a failed command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnError {
    Continue,
    Stop,
}

/// Ship a complete HAProxy config plus firewall sets to one appliance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalancerConfigCommand {
    /// Config file lines, in order.
    pub config: Vec<String>,
    pub fw_rules: FirewallRuleSets,
    /// Addressing for the agent: see [`ROUTER_IP`] and [`ROUTER_NAME`].
    pub access_details: BTreeMap<String, String>,
}

impl LoadBalancerConfigCommand {
    pub fn new(config: Vec<String>, fw_rules: FirewallRuleSets) -> Self {
        Self {
            config,
            fw_rules,
            access_details: BTreeMap::new(),
        }
    }

    pub fn with_access_detail(mut self, key: &str, value: &str) -> Self {
        self.access_details.insert(key.to_string(), value.to_string());
        self
    }

    pub fn access_detail(&self, key: &str) -> Option<&str> {
        self.access_details.get(key).map(String::as_str)
    }
}

/// An ordered bundle of commands sent in one RPC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commands {
    pub on_error: OnError,
    pub commands: Vec<LoadBalancerConfigCommand>,
}

impl Commands {
    pub fn new(on_error: OnError) -> Self {
        Self {
            on_error,
            commands: Vec::new(),
        }
    }

    pub fn push(&mut self, command: LoadBalancerConfigCommand) {
        self.commands.push(command);
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// Agent reply to a single command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    pub result: bool,
    #[serde(default)]
    pub details: Option<String>,
}

impl Answer {
    pub fn success() -> Self {
        Self {
            result: true,
            details: None,
        }
    }

    pub fn failure(details: &str) -> Self {
        Self {
            result: false,
            details: Some(details.to_string()),
        }
    }
}

/// The agent could not produce answers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("agent on host {host_id} did not answer within {timeout:?}")]
    Timeout { host_id: HostId, timeout: Duration },

    #[error("transport failure: {0}")]
    Transport(String),
}

/// Blocking RPC channel to host agents, keyed by host id.
///
/// Implementations must give up after `timeout` and report
/// [`DispatchError::Timeout`].
pub trait AgentDispatcher: Send + Sync {
    fn send(
        &self,
        host_id: HostId,
        commands: &Commands,
        timeout: Duration,
    ) -> Result<Vec<Answer>, DispatchError>;
}

/// Whether an answer set acknowledges every command.
///
/// The counts must match and every answer must report success.
pub fn all_succeeded(commands: &Commands, answers: &[Answer]) -> bool {
    answers.len() == commands.len() && answers.iter().all(|a| a.result)
}
