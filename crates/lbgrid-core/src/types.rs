//! Shared domain types used across LbGrid crates.
//!
//! These are the records the control plane reasons about: load-balancing
//! rules with their destinations and stickiness policies, the networks
//! they live in, and the appliance VMs that execute the compiled config.
//! All types are serializable so they can be persisted by the state store
//! and shipped to agents.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a network.
pub type NetworkId = u64;

/// Identifier of a load-balancing rule.
pub type RuleId = u64;

/// Identifier of a stickiness policy.
pub type PolicyId = u64;

/// Identifier of an account.
pub type AccountId = u64;

/// Identifier of a domain (account grouping).
pub type DomainId = u64;

/// Identifier of an appliance VM.
pub type VmId = u64;

/// Identifier of a hypervisor host running an agent.
pub type HostId = u64;

/// Identifier of a data center / zone.
pub type DataCenterId = u64;

/// Identifier of a network offering.
pub type OfferingId = u64;

/// Identifier of a VM template.
pub type TemplateId = u64;

/// Identifier of a public IP address record.
pub type IpAddressId = u64;

/// Identifier value that never refers to a real record.
pub const INVALID_ID: u64 = 0;

// ── Rules ──────────────────────────────────────────────────────────

/// Lifecycle state of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleState {
    Active,
    PendingAdd,
    Revoked,
}

/// What a firewall-level rule is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RulePurpose {
    LoadBalancing,
    PortForwarding,
    Firewall,
    StaticNat,
}

impl fmt::Display for RulePurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RulePurpose::LoadBalancing => "load_balancing",
            RulePurpose::PortForwarding => "port_forwarding",
            RulePurpose::Firewall => "firewall",
            RulePurpose::StaticNat => "static_nat",
        };
        f.write_str(s)
    }
}

/// A backend target of a load-balancing rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    pub ip: String,
    pub port: u16,
    /// Revoked destinations get no server line but still count for removal deltas.
    #[serde(default)]
    pub revoked: bool,
}

impl Destination {
    pub fn new(ip: &str, port: u16) -> Self {
        Self {
            ip: ip.to_string(),
            port,
            revoked: false,
        }
    }

    pub fn revoked(ip: &str, port: u16) -> Self {
        Self {
            ip: ip.to_string(),
            port,
            revoked: true,
        }
    }
}

/// A session-affinity directive attached to a rule.
///
/// The method name is kept as the caller supplied it; interpretation
/// happens in the compiler. Parameter keys are matched case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StickinessPolicy {
    pub id: PolicyId,
    /// Owning rule.
    pub rule_id: RuleId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub method: String,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

impl StickinessPolicy {
    /// Look up a parameter value, ignoring key case.
    ///
    /// When two keys differ only in case the first in key order wins;
    /// callers that encode policies check [`Self::duplicate_param`] first.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Lowercased name of the first parameter given under two spellings.
    pub fn duplicate_param(&self) -> Option<String> {
        let mut seen = BTreeSet::new();
        self.params
            .keys()
            .map(|k| k.to_ascii_lowercase())
            .find(|k| !seen.insert(k.clone()))
    }
}

/// A load-balancing rule: one public endpoint bound to a set of destinations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub id: RuleId,
    pub network_id: NetworkId,
    pub account_id: AccountId,
    pub source_ip: String,
    pub source_port: u16,
    pub protocol: String,
    pub algorithm: String,
    pub purpose: RulePurpose,
    pub state: RuleState,
    #[serde(default)]
    pub destinations: Vec<Destination>,
    #[serde(default)]
    pub stickiness_policies: Vec<StickinessPolicy>,
}

impl Rule {
    pub fn is_revoked(&self) -> bool {
        self.state == RuleState::Revoked
    }
}

// ── Networks ───────────────────────────────────────────────────────

/// Implementation state of a guest network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkState {
    Allocated,
    Setup,
    Implementing,
    Implemented,
    Shutdown,
    Destroy,
}

impl NetworkState {
    /// Whether an appliance may be assembled for a network in this state.
    pub fn accepts_appliance(self) -> bool {
        matches!(
            self,
            NetworkState::Implemented | NetworkState::Setup | NetworkState::Implementing
        )
    }
}

/// Kind of traffic a network offering carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrafficType {
    Guest,
    Public,
    Control,
    Management,
    Storage,
}

/// A network record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    pub id: NetworkId,
    pub name: String,
    pub data_center_id: DataCenterId,
    pub offering_id: OfferingId,
    pub account_id: AccountId,
    pub state: NetworkState,
    /// Shared networks belong to the platform rather than a tenant.
    #[serde(default)]
    pub shared: bool,
}

/// A network offering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkOffering {
    pub id: OfferingId,
    pub name: String,
    pub traffic_type: TrafficType,
    /// Offerings usable only by the system account.
    #[serde(default)]
    pub system_only: bool,
}

/// A public IP address record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpAddress {
    pub id: IpAddressId,
    pub address: String,
    pub source_network_id: NetworkId,
    #[serde(default)]
    pub associated_network_id: Option<NetworkId>,
}

// ── Accounts ───────────────────────────────────────────────────────

/// Identifier of the platform-owned account.
pub const SYSTEM_ACCOUNT_ID: AccountId = 1;

/// Domain of the platform-owned account.
pub const ROOT_DOMAIN_ID: DomainId = 1;

/// Owner of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub domain_id: DomainId,
}

impl Account {
    pub fn system() -> Self {
        Self {
            id: SYSTEM_ACCOUNT_ID,
            domain_id: ROOT_DOMAIN_ID,
        }
    }

    pub fn is_system(&self) -> bool {
        self.id == SYSTEM_ACCOUNT_ID
    }
}

// ── Appliances ─────────────────────────────────────────────────────

/// Lifecycle state of an appliance VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VmState {
    Allocated,
    Starting,
    Running,
    Stopping,
    Stopped,
    Error,
}

impl fmt::Display for VmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VmState::Allocated => "allocated",
            VmState::Starting => "starting",
            VmState::Running => "running",
            VmState::Stopping => "stopping",
            VmState::Stopped => "stopped",
            VmState::Error => "error",
        };
        f.write_str(s)
    }
}

/// Role an appliance plays in its network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplianceRole {
    LoadBalancer,
    Router,
}

/// A virtual network appliance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplianceVm {
    pub id: VmId,
    /// Instance name, e.g. `r-7-VM`.
    pub name: String,
    pub network_id: NetworkId,
    pub account_id: AccountId,
    pub domain_id: DomainId,
    pub role: ApplianceRole,
    pub state: VmState,
    pub template_id: TemplateId,
    pub service_offering: String,
    /// Host the appliance currently runs on.
    #[serde(default)]
    pub host_id: Option<HostId>,
    /// Control-network address used by the agent.
    #[serde(default)]
    pub private_ip: Option<String>,
    /// Address on the guest network.
    #[serde(default)]
    pub guest_ip: Option<String>,
}

/// Hypervisor family of a template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HypervisorType {
    Kvm,
    XenServer,
    VMware,
}

/// A base image for system appliances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmTemplate {
    pub id: TemplateId,
    pub name: String,
    pub data_center_id: DataCenterId,
    pub hypervisor: HypervisorType,
    pub guest_os_id: u64,
}

// ── Stats visibility ───────────────────────────────────────────────

/// Where the appliance statistics page is exposed.
///
/// Unrecognised values are preserved as [`StatsVisibility::DefaultPort`],
/// which serves stats from the defaults section instead of a dedicated
/// listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum StatsVisibility {
    Disabled,
    Global,
    GuestNetwork,
    LinkLocal,
    All,
    DefaultPort(String),
}

impl StatsVisibility {
    pub fn parse(s: &str) -> Self {
        match s {
            "disabled" => StatsVisibility::Disabled,
            "global" => StatsVisibility::Global,
            "guest-network" => StatsVisibility::GuestNetwork,
            "link-local" => StatsVisibility::LinkLocal,
            "all" => StatsVisibility::All,
            other => StatsVisibility::DefaultPort(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            StatsVisibility::Disabled => "disabled",
            StatsVisibility::Global => "global",
            StatsVisibility::GuestNetwork => "guest-network",
            StatsVisibility::LinkLocal => "link-local",
            StatsVisibility::All => "all",
            StatsVisibility::DefaultPort(s) => s,
        }
    }
}

impl From<String> for StatsVisibility {
    fn from(s: String) -> Self {
        StatsVisibility::parse(&s)
    }
}

impl From<StatsVisibility> for String {
    fn from(v: StatsVisibility) -> Self {
        v.as_str().to_string()
    }
}

impl fmt::Display for StatsVisibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
