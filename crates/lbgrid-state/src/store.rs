//! StateStore — redb-backed record persistence for LbGrid.
//!
//! Provides typed CRUD over networks, offerings, templates, rules,
//! appliances, and IP addresses, plus the lookups the appliance
//! orchestrator needs. The store supports both on-disk and in-memory
//! backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use lbgrid_core::{
    ApplianceRole, ApplianceVm, DataCenterId, IpAddress, Network, NetworkId, NetworkOffering,
    OfferingId, Rule, RuleId, TrafficType, VmId, VmTemplate,
};

use crate::error::{StateError, StateResult};
use crate::tables::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Sequence used for appliance VM ids.
pub const APPLIANCE_SEQUENCE: &str = "appliance";

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        for table in [NETWORKS, OFFERINGS, TEMPLATES, RULES, APPLIANCES, IP_ADDRESSES] {
            txn.open_table(table).map_err(map_err!(Table))?;
        }
        txn.open_table(SEQUENCES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Generic record access ──────────────────────────────────────

    fn put_record<T: Serialize>(&self, table: RecordTable, key: &str, record: &T) -> StateResult<()> {
        let value = serde_json::to_vec(record).map_err(map_err!(Encode))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(table).map_err(map_err!(Table))?;
            table
                .insert(key, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get_record<T: DeserializeOwned>(&self, table: RecordTable, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let record: T =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Decode))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// All records whose key starts with `prefix`, in key order.
    fn scan_records<T: DeserializeOwned>(&self, table: RecordTable, prefix: &str) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(prefix) {
                let record: T =
                    serde_json::from_slice(value.value()).map_err(map_err!(Decode))?;
                results.push(record);
            }
        }
        Ok(results)
    }

    fn delete_record(&self, table: RecordTable, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(table).map_err(map_err!(Table))?;
            existed = table.remove(key).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    // ── Sequences ──────────────────────────────────────────────────

    /// Issue the next value of a named sequence, starting at 1.
    pub fn next_id(&self, sequence: &str) -> StateResult<u64> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let next;
        {
            let mut table = txn.open_table(SEQUENCES).map_err(map_err!(Table))?;
            let current = table
                .get(sequence)
                .map_err(map_err!(Read))?
                .map(|guard| guard.value())
                .unwrap_or(0);
            next = current + 1;
            table.insert(sequence, next).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(next)
    }

    // ── Networks ───────────────────────────────────────────────────

    /// Insert or update a network.
    pub fn put_network(&self, network: &Network) -> StateResult<()> {
        self.put_record(NETWORKS, &id_key(network.id), network)?;
        debug!(network_id = network.id, "network stored");
        Ok(())
    }

    pub fn get_network(&self, id: NetworkId) -> StateResult<Option<Network>> {
        self.get_record(NETWORKS, &id_key(id))
    }

    pub fn list_networks(&self) -> StateResult<Vec<Network>> {
        self.scan_records(NETWORKS, "")
    }

    // ── Offerings ──────────────────────────────────────────────────

    pub fn put_offering(&self, offering: &NetworkOffering) -> StateResult<()> {
        self.put_record(OFFERINGS, &id_key(offering.id), offering)
    }

    pub fn get_offering(&self, id: OfferingId) -> StateResult<Option<NetworkOffering>> {
        self.get_record(OFFERINGS, &id_key(id))
    }

    /// The offering a network was created from; an error if it is gone.
    pub fn offering_of(&self, network: &Network) -> StateResult<NetworkOffering> {
        self.get_offering(network.offering_id)?
            .ok_or(StateError::MissingRecord {
                kind: "network offering",
                id: network.offering_id,
            })
    }

    /// The system control network of a data center, if one is set up.
    ///
    /// A control network is a network in the data center whose offering
    /// carries control traffic and is reserved for the system account.
    pub fn control_network(&self, data_center_id: DataCenterId) -> StateResult<Option<Network>> {
        let control_offerings: Vec<OfferingId> = self
            .scan_records::<NetworkOffering>(OFFERINGS, "")?
            .into_iter()
            .filter(|o| o.system_only && o.traffic_type == TrafficType::Control)
            .map(|o| o.id)
            .collect();

        Ok(self
            .list_networks()?
            .into_iter()
            .find(|n| n.data_center_id == data_center_id && control_offerings.contains(&n.offering_id)))
    }

    // ── Templates ──────────────────────────────────────────────────

    pub fn put_template(&self, template: &VmTemplate) -> StateResult<()> {
        self.put_record(
            TEMPLATES,
            &child_key(template.data_center_id, template.id),
            template,
        )
    }

    /// Lowest-id system template registered for a data center.
    pub fn system_template(&self, data_center_id: DataCenterId) -> StateResult<Option<VmTemplate>> {
        Ok(self
            .scan_records::<VmTemplate>(TEMPLATES, &child_prefix(data_center_id))?
            .into_iter()
            .next())
    }

    // ── Rules ──────────────────────────────────────────────────────

    /// Insert or update a rule together with its destinations and policies.
    pub fn put_rule(&self, rule: &Rule) -> StateResult<()> {
        let key = child_key(rule.network_id, rule.id);
        self.put_record(RULES, &key, rule)?;
        debug!(network_id = rule.network_id, rule_id = rule.id, "rule stored");
        Ok(())
    }

    pub fn get_rule(&self, network_id: NetworkId, rule_id: RuleId) -> StateResult<Option<Rule>> {
        self.get_record(RULES, &child_key(network_id, rule_id))
    }

    /// All rules of a network, ordered by rule id.
    pub fn list_rules_for_network(&self, network_id: NetworkId) -> StateResult<Vec<Rule>> {
        self.scan_records(RULES, &child_prefix(network_id))
    }

    /// Physically delete a rule. Returns true if it existed.
    pub fn delete_rule(&self, network_id: NetworkId, rule_id: RuleId) -> StateResult<bool> {
        let existed = self.delete_record(RULES, &child_key(network_id, rule_id))?;
        debug!(network_id, rule_id, existed, "rule deleted");
        Ok(existed)
    }

    // ── Appliances ─────────────────────────────────────────────────

    pub fn put_appliance(&self, vm: &ApplianceVm) -> StateResult<()> {
        self.put_record(APPLIANCES, &id_key(vm.id), vm)?;
        debug!(vm_id = vm.id, state = %vm.state, "appliance stored");
        Ok(())
    }

    pub fn get_appliance(&self, id: VmId) -> StateResult<Option<ApplianceVm>> {
        self.get_record(APPLIANCES, &id_key(id))
    }

    /// All appliances attached to a network, ordered by id.
    pub fn list_appliances_for_network(&self, network_id: NetworkId) -> StateResult<Vec<ApplianceVm>> {
        Ok(self
            .scan_records::<ApplianceVm>(APPLIANCES, "")?
            .into_iter()
            .filter(|vm| vm.network_id == network_id)
            .collect())
    }

    /// The lowest-id appliance with the given role in a network.
    pub fn find_appliance(
        &self,
        network_id: NetworkId,
        role: ApplianceRole,
    ) -> StateResult<Option<ApplianceVm>> {
        Ok(self
            .list_appliances_for_network(network_id)?
            .into_iter()
            .find(|vm| vm.role == role))
    }

    // ── IP addresses ───────────────────────────────────────────────

    pub fn put_ip_address(&self, ip: &IpAddress) -> StateResult<()> {
        let key = format!("{}{}", child_prefix(ip.source_network_id), ip.address);
        self.put_record(IP_ADDRESSES, &key, ip)
    }

    /// Look up an address allocated from a network.
    pub fn find_ip_address(
        &self,
        source_network_id: NetworkId,
        address: &str,
    ) -> StateResult<Option<IpAddress>> {
        let key = format!("{}{}", child_prefix(source_network_id), address);
        self.get_record(IP_ADDRESSES, &key)
    }
}
