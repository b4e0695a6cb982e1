//! Elastic load-balancer manager — appliance deployment and rule sync.
//!
//! The `ElasticLbManager` is the orchestrator that:
//! - Deploys the load-balancer appliance of a guest network under the
//!   network's lock (find or allocate, then start)
//! - Recompiles and ships the full config for a source IP whenever that
//!   IP's rules change
//! - Maps appliance state to apply outcomes (sync, defer, or refuse)

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use lbgrid_core::{
    Account, ApplianceRole, ApplianceVm, ElbSettings, HostId, INVALID_ID, IpAddressId, Network,
    NetworkId, Rule, RulePurpose, VmId, VmState,
};
use lbgrid_haproxy::{
    HaProxyConfigurator, LoadBalancer, LoadBalancerConfig, LoadBalancerConfigurator,
    StatsEndpoint,
};
use lbgrid_state::StateStore;
use lbgrid_state::store::APPLIANCE_SEQUENCE;

use crate::dispatch::{
    AgentDispatcher, Commands, LoadBalancerConfigCommand, OnError, ROUTER_IP, ROUTER_NAME,
    all_succeeded,
};
use crate::error::{ElbError, ElbResult};
use crate::lifecycle::{NicSpec, ServiceOffering, StartParams, VmLifecycle};
use crate::lock::{NetworkLockGuard, NetworkLocks};

/// Instance name of an appliance: `r-<id>-<instance>`.
pub fn appliance_name(id: VmId, instance_name: &str) -> String {
    format!("r-{id}-{instance_name}")
}

/// Orchestrates the elastic load-balancer appliance of each guest network.
pub struct ElasticLbManager {
    /// Networks, rules, appliances and IP records.
    state: StateStore,
    /// Per-network exclusive locks for deployment.
    locks: Arc<dyn NetworkLocks>,
    /// Allocates and starts appliance VMs.
    lifecycle: Arc<dyn VmLifecycle>,
    /// Sends compiled configs to host agents.
    dispatcher: Arc<dyn AgentDispatcher>,
    configurator: HaProxyConfigurator,
    settings: ElbSettings,
    offering: ServiceOffering,
}

impl ElasticLbManager {
    /// Create a new manager.
    pub fn new(
        state: StateStore,
        locks: Arc<dyn NetworkLocks>,
        lifecycle: Arc<dyn VmLifecycle>,
        dispatcher: Arc<dyn AgentDispatcher>,
        settings: ElbSettings,
    ) -> Self {
        let offering = ServiceOffering::elastic_lb(&settings);
        Self {
            state,
            locks,
            lifecycle,
            dispatcher,
            configurator: HaProxyConfigurator::new(),
            settings,
            offering,
        }
    }

    pub fn settings(&self) -> &ElbSettings {
        &self.settings
    }

    /// The offering new appliances are allocated with.
    pub fn service_offering(&self) -> &ServiceOffering {
        &self.offering
    }

    // ── Rule sync ──────────────────────────────────────────────────

    /// Push the load-balancing rules of a network to its appliance.
    ///
    /// A running appliance receives the complete config for the source IP
    /// of the first incoming rule, rebuilt from every rule registered for
    /// that IP. A stopped appliance defers the update to its next start.
    ///
    /// Returns `Ok(false)` when the rules cannot be applied on this path
    /// (non load-balancing purpose) or the agent rejects the config.
    pub fn apply_load_balancer_rules(&self, network: &Network, rules: &[Rule]) -> ElbResult<bool> {
        let elb_vm = self
            .state
            .find_appliance(network.id, ApplianceRole::LoadBalancer)?
            .ok_or_else(|| {
                warn!(network_id = network.id, "no load balancer appliance for network");
                ElbError::ResourceUnavailable(format!(
                    "unable to apply lb rules, no elastic lb vm for network {}",
                    network.id
                ))
            })?;

        match elb_vm.state {
            VmState::Running => {
                let Some(first) = rules.first() else {
                    debug!(network_id = network.id, "no rules to apply");
                    return Ok(true);
                };
                if first.purpose != RulePurpose::LoadBalancing {
                    error!(
                        network_id = network.id,
                        purpose = %first.purpose,
                        "unable to apply rules of this purpose on the elastic lb vm"
                    );
                    return Ok(false);
                }

                let source_ip = first.source_ip.as_str();
                let lb_rules: Vec<Rule> = self
                    .state
                    .list_rules_for_network(network.id)?
                    .into_iter()
                    .filter(|r| r.purpose == RulePurpose::LoadBalancing && r.source_ip == source_ip)
                    .collect();
                debug!(
                    network_id = network.id,
                    %source_ip,
                    rules = lb_rules.len(),
                    "resyncing load balancer rules for source ip"
                );
                self.send_lb_rules(&elb_vm, &lb_rules)
            }
            VmState::Stopped | VmState::Stopping => {
                debug!(
                    vm = %elb_vm.name,
                    state = %elb_vm.state,
                    "elastic lb vm is not running, rules will be applied on next start"
                );
                Ok(true)
            }
            other => {
                warn!(vm = %elb_vm.name, state = %other, "unable to apply lb rules, elastic lb vm not ready");
                Err(ElbError::ResourceUnavailable(format!(
                    "elastic lb vm {} is {other}, not ready to accept rules",
                    elb_vm.name
                )))
            }
        }
    }

    fn send_lb_rules(&self, elb_vm: &ApplianceVm, rules: &[Rule]) -> ElbResult<bool> {
        let commands = self.create_apply_lb_rules_commands(elb_vm, rules);
        let host_id = elb_vm.host_id.ok_or_else(|| {
            ElbError::ResourceUnavailable(format!("elastic lb vm {} has no host", elb_vm.name))
        })?;
        self.send_commands(host_id, &commands)
    }

    /// Compile rules into a config command addressed at the appliance.
    pub fn create_apply_lb_rules_commands(&self, elb_vm: &ApplianceVm, rules: &[Rule]) -> Commands {
        let public_ip = rules.first().map(|r| r.source_ip.as_str()).unwrap_or_default();
        let guest_ip = elb_vm.guest_ip.as_deref().unwrap_or_default();
        let private_ip = elb_vm.private_ip.as_deref().unwrap_or_default();

        let config = LoadBalancerConfig {
            load_balancers: rules.iter().map(LoadBalancer::from).collect(),
            stats: StatsEndpoint::from_settings(&self.settings.stats, public_ip, guest_ip, private_ip),
        };
        let command = LoadBalancerConfigCommand::new(
            self.configurator.generate_configuration(&config),
            self.configurator.generate_fw_rules(&config),
        )
        .with_access_detail(ROUTER_IP, private_ip)
        .with_access_detail(ROUTER_NAME, &elb_vm.name);

        let mut commands = Commands::new(OnError::Continue);
        commands.push(command);
        commands
    }

    /// Send commands to a host agent and check the answers.
    ///
    /// Timeouts and transport failures are errors; a rejected command or
    /// an answer count that doesn't match is `Ok(false)`.
    pub fn send_commands(&self, host_id: HostId, commands: &Commands) -> ElbResult<bool> {
        let answers = self
            .dispatcher
            .send(host_id, commands, self.settings.agent_timeout)
            .inspect_err(|e| warn!(host_id, error = %e, "agent dispatch failed"))?;

        if all_succeeded(commands, &answers) {
            debug!(host_id, commands = commands.len(), "agent applied commands");
            return Ok(true);
        }
        let rejection = answers.iter().find(|a| !a.result).and_then(|a| a.details.as_deref());
        warn!(
            host_id,
            sent = commands.len(),
            answered = answers.len(),
            details = rejection.unwrap_or(""),
            "agent did not apply all commands"
        );
        Ok(false)
    }

    // ── Deployment ─────────────────────────────────────────────────

    /// Deploy the network's appliance and return the associated IP id.
    ///
    /// Never fails: any error is logged and reported as [`INVALID_ID`].
    pub fn deploy_load_balancer_vm(&self, network_id: NetworkId, owner: &Account) -> IpAddressId {
        debug!(network_id, "about to deploy elastic lb vm if necessary");
        match self.try_deploy_load_balancer_vm(network_id, owner) {
            Ok(ip_id) => ip_id,
            Err(e) => {
                warn!(network_id, error = %e, "error while deploying load balancer vm");
                INVALID_ID
            }
        }
    }

    /// Deploy the network's appliance and associate its guest IP record
    /// with the network. Returns the IP record id.
    pub fn try_deploy_load_balancer_vm(
        &self,
        network_id: NetworkId,
        owner: &Account,
    ) -> ElbResult<IpAddressId> {
        let elb_vm = self.deploy_elb_vm(network_id, owner)?;

        let guest_ip = elb_vm.guest_ip.as_deref().ok_or_else(|| {
            ElbError::ResourceUnavailable(format!("elastic lb vm {} has no guest ip", elb_vm.name))
        })?;
        let mut ip = self
            .state
            .find_ip_address(network_id, guest_ip)?
            .ok_or_else(|| {
                ElbError::ResourceUnavailable(format!(
                    "no ip address record for {guest_ip} in network {network_id}"
                ))
            })?;
        ip.associated_network_id = Some(network_id);
        self.state.put_ip_address(&ip)?;

        info!(network_id, vm = %elb_vm.name, %guest_ip, ip_id = ip.id, "elastic lb vm deployed");
        Ok(ip.id)
    }

    /// Find or create the network's appliance and make sure it runs.
    ///
    /// Holds the network lock for the whole call. Fails with
    /// [`ElbError::ConcurrentOperation`] if the lock stays held past the
    /// configured wait.
    pub fn deploy_elb_vm(&self, network_id: NetworkId, owner: &Account) -> ElbResult<ApplianceVm> {
        let _lock = NetworkLockGuard::acquire(self.locks.as_ref(), network_id, self.settings.lock_wait)
            .ok_or_else(|| {
                ElbError::ConcurrentOperation(format!("unable to lock network {network_id}"))
            })?;

        let network = self.state.get_network(network_id)?.ok_or_else(|| {
            ElbError::ConcurrentOperation(format!(
                "unable to acquire network configuration: {network_id}"
            ))
        })?;

        let system_only = self.state.offering_of(&network)?.system_only;
        let owner = if system_only || network.shared {
            Account::system()
        } else {
            *owner
        };

        if !network.state.accepts_appliance() {
            return Err(ElbError::ResourceUnavailable(format!(
                "network {network_id} is not yet fully implemented ({:?})",
                network.state
            )));
        }
        debug!(network_id, owner = owner.id, "starting elastic lb vm for network");

        let elb_vm = match self
            .state
            .find_appliance(network_id, ApplianceRole::LoadBalancer)?
        {
            Some(vm) => vm,
            None => self.allocate_elb_vm(&network, &owner)?,
        };

        if elb_vm.state == VmState::Running {
            return Ok(elb_vm);
        }

        debug!(vm = %elb_vm.name, state = %elb_vm.state, "starting elastic lb vm");
        let params = StartParams {
            restart_network: true,
        };
        let started = self.lifecycle.start(elb_vm, &params, &Account::system())?;
        self.state.put_appliance(&started)?;
        info!(vm = %started.name, state = %started.state, "elastic lb vm started");
        Ok(started)
    }

    fn allocate_elb_vm(&self, network: &Network, owner: &Account) -> ElbResult<ApplianceVm> {
        let data_center_id = network.data_center_id;
        let id = self.state.next_id(APPLIANCE_SEQUENCE)?;
        debug!(vm_id = id, network_id = network.id, "creating the elastic lb vm");

        let control = self.state.control_network(data_center_id)?.ok_or_else(|| {
            ElbError::ResourceUnavailable(format!(
                "no control network in data center {data_center_id}"
            ))
        })?;
        let template = self.state.system_template(data_center_id)?.ok_or_else(|| {
            ElbError::ResourceUnavailable(format!(
                "no system vm template in data center {data_center_id}"
            ))
        })?;

        let nics = [NicSpec::guest(network.id), NicSpec::control(control.id)];
        let vm = ApplianceVm {
            id,
            name: appliance_name(id, &self.settings.instance_name),
            network_id: network.id,
            account_id: owner.id,
            domain_id: owner.domain_id,
            role: ApplianceRole::LoadBalancer,
            state: VmState::Allocated,
            template_id: template.id,
            service_offering: self.offering.name.clone(),
            host_id: None,
            private_ip: None,
            guest_ip: None,
        };

        let vm = self
            .lifecycle
            .allocate(vm, &template, &self.offering, &nics, owner)?;
        self.state.put_appliance(&vm)?;
        info!(vm = %vm.name, network_id = network.id, owner = owner.id, "elastic lb vm allocated");
        Ok(vm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use lbgrid_core::{
        Destination, HypervisorType, IpAddress, NetworkOffering, NetworkState, RuleState,
        SYSTEM_ACCOUNT_ID, StatsVisibility, TrafficType, VmTemplate,
    };

    use crate::dispatch::{Answer, DispatchError};
    use crate::lock::InMemoryLockTable;

    const GUEST_NET: NetworkId = 10;
    const CONTROL_NET: NetworkId = 20;
    const GUEST_IP: &str = "10.1.1.2";
    const PRIVATE_IP: &str = "169.254.0.5";
    const HOST: HostId = 3;

    // ── Fakes ──────────────────────────────────────────────────────

    #[derive(Default)]
    struct FakeLifecycle {
        allocated: Mutex<Vec<(ApplianceVm, Vec<NicSpec>, Account)>>,
        started: Mutex<Vec<(VmId, StartParams)>>,
        fail_start: bool,
    }

    impl VmLifecycle for FakeLifecycle {
        fn allocate(
            &self,
            vm: ApplianceVm,
            _template: &VmTemplate,
            _offering: &ServiceOffering,
            nics: &[NicSpec],
            owner: &Account,
        ) -> ElbResult<ApplianceVm> {
            self.allocated
                .lock()
                .unwrap()
                .push((vm.clone(), nics.to_vec(), *owner));
            Ok(ApplianceVm {
                guest_ip: Some(GUEST_IP.to_string()),
                ..vm
            })
        }

        fn start(
            &self,
            vm: ApplianceVm,
            params: &StartParams,
            _caller: &Account,
        ) -> ElbResult<ApplianceVm> {
            self.started.lock().unwrap().push((vm.id, *params));
            if self.fail_start {
                return Err(ElbError::InsufficientCapacity("no host with 128MB free".into()));
            }
            Ok(ApplianceVm {
                state: VmState::Running,
                host_id: Some(HOST),
                private_ip: Some(PRIVATE_IP.to_string()),
                ..vm
            })
        }
    }

    enum Reply {
        Succeed,
        Reject,
        Short,
        Timeout,
    }

    struct FakeDispatcher {
        reply: Reply,
        sent: Mutex<Vec<(HostId, Commands)>>,
    }

    impl FakeDispatcher {
        fn new(reply: Reply) -> Self {
            Self {
                reply,
                sent: Mutex::new(Vec::new()),
            }
        }

        fn sent(&self) -> Vec<(HostId, Commands)> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl AgentDispatcher for FakeDispatcher {
        fn send(
            &self,
            host_id: HostId,
            commands: &Commands,
            timeout: Duration,
        ) -> Result<Vec<Answer>, DispatchError> {
            self.sent.lock().unwrap().push((host_id, commands.clone()));
            match self.reply {
                Reply::Succeed => Ok(commands.commands.iter().map(|_| Answer::success()).collect()),
                Reply::Reject => Ok(vec![Answer::failure("config check failed")]),
                Reply::Short => Ok(Vec::new()),
                Reply::Timeout => Err(DispatchError::Timeout { host_id, timeout }),
            }
        }
    }

    struct Harness {
        manager: ElasticLbManager,
        state: StateStore,
        locks: Arc<InMemoryLockTable>,
        lifecycle: Arc<FakeLifecycle>,
        dispatcher: Arc<FakeDispatcher>,
    }

    fn harness_with(lifecycle: FakeLifecycle, reply: Reply) -> Harness {
        let state = StateStore::open_in_memory().unwrap();
        seed(&state);
        let locks = Arc::new(InMemoryLockTable::new());
        let lifecycle = Arc::new(lifecycle);
        let dispatcher = Arc::new(FakeDispatcher::new(reply));
        let manager = ElasticLbManager::new(
            state.clone(),
            locks.clone(),
            lifecycle.clone(),
            dispatcher.clone(),
            ElbSettings::default(),
        );
        Harness {
            manager,
            state,
            locks,
            lifecycle,
            dispatcher,
        }
    }

    fn harness(reply: Reply) -> Harness {
        harness_with(FakeLifecycle::default(), reply)
    }

    fn seed(state: &StateStore) {
        state
            .put_offering(&NetworkOffering {
                id: 1,
                name: "DefaultGuest".into(),
                traffic_type: TrafficType::Guest,
                system_only: false,
            })
            .unwrap();
        state
            .put_offering(&NetworkOffering {
                id: 2,
                name: "SystemControlNetwork".into(),
                traffic_type: TrafficType::Control,
                system_only: true,
            })
            .unwrap();
        state.put_network(&network(GUEST_NET, 1)).unwrap();
        state.put_network(&network(CONTROL_NET, 2)).unwrap();
        state
            .put_template(&VmTemplate {
                id: 8,
                name: "systemvm".into(),
                data_center_id: 1,
                hypervisor: HypervisorType::Kvm,
                guest_os_id: 15,
            })
            .unwrap();
        state
            .put_ip_address(&IpAddress {
                id: 77,
                address: GUEST_IP.into(),
                source_network_id: GUEST_NET,
                associated_network_id: None,
            })
            .unwrap();
    }

    fn network(id: NetworkId, offering_id: u64) -> Network {
        Network {
            id,
            name: format!("net-{id}"),
            data_center_id: 1,
            offering_id,
            account_id: 42,
            state: NetworkState::Implemented,
            shared: false,
        }
    }

    fn tenant() -> Account {
        Account {
            id: 42,
            domain_id: 2,
        }
    }

    fn appliance(state: VmState) -> ApplianceVm {
        ApplianceVm {
            id: 1,
            name: "r-1-VM".into(),
            network_id: GUEST_NET,
            account_id: SYSTEM_ACCOUNT_ID,
            domain_id: 1,
            role: ApplianceRole::LoadBalancer,
            state,
            template_id: 8,
            service_offering: ServiceOffering::ELASTIC_LB_NAME.into(),
            host_id: Some(HOST),
            private_ip: Some(PRIVATE_IP.into()),
            guest_ip: Some(GUEST_IP.into()),
        }
    }

    fn lb_rule(id: u64, ip: &str, port: u16) -> Rule {
        Rule {
            id,
            network_id: GUEST_NET,
            account_id: 42,
            source_ip: ip.into(),
            source_port: port,
            protocol: "tcp".into(),
            algorithm: "roundrobin".into(),
            purpose: RulePurpose::LoadBalancing,
            state: RuleState::Active,
            destinations: vec![Destination::new("10.1.1.20", port)],
            stickiness_policies: Vec::new(),
        }
    }

    // ── Rule sync ──────────────────────────────────────────────────

    #[test]
    fn apply_without_appliance_is_resource_unavailable() {
        let h = harness(Reply::Succeed);
        let err = h
            .manager
            .apply_load_balancer_rules(&network(GUEST_NET, 1), &[lb_rule(1, "203.0.113.5", 80)])
            .unwrap_err();
        assert!(matches!(err, ElbError::ResourceUnavailable(_)));
        assert!(h.dispatcher.sent().is_empty());
    }

    #[test]
    fn apply_empty_rules_on_running_appliance_is_noop() {
        let h = harness(Reply::Succeed);
        h.state.put_appliance(&appliance(VmState::Running)).unwrap();
        assert!(h.manager.apply_load_balancer_rules(&network(GUEST_NET, 1), &[]).unwrap());
        assert!(h.dispatcher.sent().is_empty());
    }

    #[test]
    fn apply_non_lb_purpose_fails_without_dispatch() {
        let h = harness(Reply::Succeed);
        h.state.put_appliance(&appliance(VmState::Running)).unwrap();
        let mut rule = lb_rule(1, "203.0.113.5", 22);
        rule.purpose = RulePurpose::PortForwarding;
        assert!(!h.manager.apply_load_balancer_rules(&network(GUEST_NET, 1), &[rule]).unwrap());
        assert!(h.dispatcher.sent().is_empty());
    }

    #[test]
    fn apply_resyncs_every_rule_for_the_source_ip() {
        let h = harness(Reply::Succeed);
        h.state.put_appliance(&appliance(VmState::Running)).unwrap();
        let web = lb_rule(1, "203.0.113.5", 80);
        h.state.put_rule(&web).unwrap();
        h.state.put_rule(&lb_rule(2, "203.0.113.5", 443)).unwrap();
        h.state.put_rule(&lb_rule(3, "203.0.113.9", 80)).unwrap();

        assert!(h.manager.apply_load_balancer_rules(&network(GUEST_NET, 1), &[web]).unwrap());

        let sent = h.dispatcher.sent();
        assert_eq!(sent.len(), 1);
        let (host_id, commands) = &sent[0];
        assert_eq!(*host_id, HOST);
        assert_eq!(commands.len(), 1);

        let cmd = &commands.commands[0];
        assert!(cmd.config.contains(&"listen 203_0_113_5-80 203.0.113.5:80".to_string()));
        assert!(cmd.config.contains(&"listen 203_0_113_5-443 203.0.113.5:443".to_string()));
        assert!(!cmd.config.iter().any(|l| l.contains("203.0.113.9")));
        assert_eq!(cmd.access_detail(ROUTER_IP), Some(PRIVATE_IP));
        assert_eq!(cmd.access_detail(ROUTER_NAME), Some("r-1-VM"));

        let add: Vec<_> = cmd.fw_rules.add.iter().cloned().collect();
        assert_eq!(add, vec!["203.0.113.5:443:", "203.0.113.5:80:"]);
        assert!(cmd.fw_rules.stats.contains("203.0.113.5:8081:0/0:,"));
    }

    #[test]
    fn revoked_rule_feeds_remove_set() {
        let h = harness(Reply::Succeed);
        h.state.put_appliance(&appliance(VmState::Running)).unwrap();
        let web = lb_rule(1, "203.0.113.5", 80);
        let mut old = lb_rule(2, "203.0.113.5", 8080);
        old.state = RuleState::Revoked;
        h.state.put_rule(&web).unwrap();
        h.state.put_rule(&old).unwrap();

        assert!(h.manager.apply_load_balancer_rules(&network(GUEST_NET, 1), &[old]).unwrap());

        let cmd = &h.dispatcher.sent()[0].1.commands[0];
        assert!(cmd.fw_rules.remove.contains("203.0.113.5:8080:"));
        assert!(!cmd.config.iter().any(|l| l.contains(":8080")));
    }

    #[test]
    fn stats_bind_to_appliance_addresses() {
        let h = harness(Reply::Succeed);
        let mut vm = appliance(VmState::Running);
        vm.guest_ip = Some("10.1.1.9".into());
        let manager = ElasticLbManager::new(
            h.state.clone(),
            h.locks.clone(),
            h.lifecycle.clone(),
            h.dispatcher.clone(),
            ElbSettings {
                stats: lbgrid_core::StatsSettings {
                    visibility: StatsVisibility::All,
                    ..Default::default()
                },
                ..ElbSettings::default()
            },
        );
        let commands = manager.create_apply_lb_rules_commands(&vm, &[lb_rule(1, "203.0.113.5", 80)]);
        let config = &commands.commands[0].config;
        assert!(config.contains(&"listen stats_on_public 203.0.113.5:8081".to_string()));
        assert!(config.contains(&"listen stats_on_guest 10.1.1.9:8081".to_string()));
        assert!(config.contains(&format!("listen stats_on_private {PRIVATE_IP}:8081")));
        assert!(commands.commands[0].fw_rules.stats.contains("0.0.0.0/0:8081:0/0:,"));
    }

    #[test]
    fn stopped_appliance_defers_without_dispatch() {
        for state in [VmState::Stopped, VmState::Stopping] {
            let h = harness(Reply::Succeed);
            h.state.put_appliance(&appliance(state)).unwrap();
            let rule = lb_rule(1, "203.0.113.5", 80);
            h.state.put_rule(&rule).unwrap();
            assert!(h.manager.apply_load_balancer_rules(&network(GUEST_NET, 1), &[rule]).unwrap());
            assert!(h.dispatcher.sent().is_empty());
        }
    }

    #[test]
    fn starting_appliance_is_not_ready() {
        for state in [VmState::Starting, VmState::Error, VmState::Allocated] {
            let h = harness(Reply::Succeed);
            h.state.put_appliance(&appliance(state)).unwrap();
            let err = h
                .manager
                .apply_load_balancer_rules(&network(GUEST_NET, 1), &[lb_rule(1, "203.0.113.5", 80)])
                .unwrap_err();
            assert!(matches!(err, ElbError::ResourceUnavailable(_)));
        }
    }

    #[test]
    fn agent_timeout_is_agent_unavailable() {
        let h = harness(Reply::Timeout);
        h.state.put_appliance(&appliance(VmState::Running)).unwrap();
        let rule = lb_rule(1, "203.0.113.5", 80);
        h.state.put_rule(&rule).unwrap();
        let err = h
            .manager
            .apply_load_balancer_rules(&network(GUEST_NET, 1), &[rule])
            .unwrap_err();
        assert!(matches!(err, ElbError::AgentUnavailable(DispatchError::Timeout { host_id: HOST, .. })));
        assert!(err.is_retryable());
    }

    #[test]
    fn rejected_or_short_answers_return_false() {
        for reply in [Reply::Reject, Reply::Short] {
            let h = harness(reply);
            h.state.put_appliance(&appliance(VmState::Running)).unwrap();
            let rule = lb_rule(1, "203.0.113.5", 80);
            h.state.put_rule(&rule).unwrap();
            assert!(!h.manager.apply_load_balancer_rules(&network(GUEST_NET, 1), &[rule]).unwrap());
            assert_eq!(h.dispatcher.sent().len(), 1);
        }
    }

    // ── Deployment ─────────────────────────────────────────────────

    #[test]
    fn deploy_allocates_starts_and_associates_ip() {
        let h = harness(Reply::Succeed);
        let ip_id = h.manager.deploy_load_balancer_vm(GUEST_NET, &tenant());
        assert_eq!(ip_id, 77);

        let allocated = h.lifecycle.allocated.lock().unwrap().clone();
        assert_eq!(allocated.len(), 1);
        let (vm, nics, owner) = &allocated[0];
        assert_eq!(vm.name, "r-1-VM");
        assert_eq!(vm.service_offering, "System Offering For Elastic LB VM");
        assert_eq!(owner, &tenant());
        assert_eq!(nics, &vec![NicSpec::guest(GUEST_NET), NicSpec::control(CONTROL_NET)]);

        let started = h.lifecycle.started.lock().unwrap().clone();
        assert_eq!(started, vec![(1, StartParams { restart_network: true })]);

        let stored = h.state.find_appliance(GUEST_NET, ApplianceRole::LoadBalancer).unwrap().unwrap();
        assert_eq!(stored.state, VmState::Running);
        assert_eq!(stored.host_id, Some(HOST));

        let ip = h.state.find_ip_address(GUEST_NET, GUEST_IP).unwrap().unwrap();
        assert_eq!(ip.associated_network_id, Some(GUEST_NET));
        assert!(!h.locks.is_held(GUEST_NET));
    }

    #[test]
    fn shared_network_appliance_belongs_to_system() {
        let h = harness(Reply::Succeed);
        let mut shared = network(GUEST_NET, 1);
        shared.shared = true;
        h.state.put_network(&shared).unwrap();

        h.manager.deploy_elb_vm(GUEST_NET, &tenant()).unwrap();
        let allocated = h.lifecycle.allocated.lock().unwrap().clone();
        assert!(allocated[0].2.is_system());
        assert_eq!(allocated[0].0.account_id, SYSTEM_ACCOUNT_ID);
    }

    #[test]
    fn existing_running_appliance_is_reused() {
        let h = harness(Reply::Succeed);
        h.state.put_appliance(&appliance(VmState::Running)).unwrap();
        let vm = h.manager.deploy_elb_vm(GUEST_NET, &tenant()).unwrap();
        assert_eq!(vm.id, 1);
        assert!(h.lifecycle.allocated.lock().unwrap().is_empty());
        assert!(h.lifecycle.started.lock().unwrap().is_empty());
    }

    #[test]
    fn existing_stopped_appliance_is_started() {
        let h = harness(Reply::Succeed);
        h.state.put_appliance(&appliance(VmState::Stopped)).unwrap();
        let vm = h.manager.deploy_elb_vm(GUEST_NET, &tenant()).unwrap();
        assert_eq!(vm.state, VmState::Running);
        assert!(h.lifecycle.allocated.lock().unwrap().is_empty());
        assert_eq!(h.lifecycle.started.lock().unwrap().len(), 1);
    }

    #[test]
    fn unimplemented_network_is_rejected() {
        let h = harness(Reply::Succeed);
        let mut pending = network(GUEST_NET, 1);
        pending.state = NetworkState::Allocated;
        h.state.put_network(&pending).unwrap();

        let err = h.manager.try_deploy_load_balancer_vm(GUEST_NET, &tenant()).unwrap_err();
        assert!(matches!(err, ElbError::ResourceUnavailable(_)));
        assert_eq!(h.manager.deploy_load_balancer_vm(GUEST_NET, &tenant()), INVALID_ID);
        assert!(h.lifecycle.allocated.lock().unwrap().is_empty());
        assert!(!h.locks.is_held(GUEST_NET));
    }

    #[test]
    fn held_lock_fails_fast_and_is_left_alone() {
        let h = harness(Reply::Succeed);
        assert!(h.locks.try_acquire(GUEST_NET, Duration::ZERO));

        let err = h.manager.deploy_elb_vm(GUEST_NET, &tenant()).unwrap_err();
        assert!(matches!(err, ElbError::ConcurrentOperation(_)));
        assert!(h.locks.is_held(GUEST_NET));
        assert!(h.lifecycle.allocated.lock().unwrap().is_empty());
    }

    #[test]
    fn missing_network_is_concurrent_operation() {
        let h = harness(Reply::Succeed);
        let err = h.manager.deploy_elb_vm(999, &tenant()).unwrap_err();
        assert!(matches!(err, ElbError::ConcurrentOperation(_)));
        assert!(!h.locks.is_held(999));
    }

    #[test]
    fn network_without_stored_offering_is_rejected() {
        let h = harness(Reply::Succeed);
        h.state.put_network(&network(30, 99)).unwrap();

        let err = h.manager.deploy_elb_vm(30, &tenant()).unwrap_err();
        assert!(matches!(
            err,
            ElbError::State(lbgrid_state::StateError::MissingRecord { id: 99, .. })
        ));
        assert!(h.lifecycle.allocated.lock().unwrap().is_empty());
        assert!(!h.locks.is_held(30));
        assert_eq!(h.manager.deploy_load_balancer_vm(30, &tenant()), INVALID_ID);
    }

    #[test]
    fn start_failure_propagates_and_releases_lock() {
        let lifecycle = FakeLifecycle {
            fail_start: true,
            ..Default::default()
        };
        let h = harness_with(lifecycle, Reply::Succeed);
        let err = h.manager.deploy_elb_vm(GUEST_NET, &tenant()).unwrap_err();
        assert!(matches!(err, ElbError::InsufficientCapacity(_)));
        assert!(!h.locks.is_held(GUEST_NET));

        // The allocated record survives for the next attempt.
        let stored = h.state.find_appliance(GUEST_NET, ApplianceRole::LoadBalancer).unwrap().unwrap();
        assert_eq!(stored.state, VmState::Allocated);
    }

    #[test]
    fn missing_ip_record_yields_sentinel() {
        let h = harness(Reply::Succeed);
        let mut vm = appliance(VmState::Running);
        vm.guest_ip = Some("10.1.1.250".into());
        h.state.put_appliance(&vm).unwrap();
        assert_eq!(h.manager.deploy_load_balancer_vm(GUEST_NET, &tenant()), INVALID_ID);
    }

    #[test]
    fn appliance_names_follow_router_convention() {
        assert_eq!(appliance_name(7, "VM"), "r-7-VM");
        assert_eq!(appliance_name(12, "lab"), "r-12-lab");
    }
}
