//! redb table definitions for the LbGrid state store.
//!
//! Record tables use `&str` keys and `&[u8]` values (JSON-serialized
//! records). Ids inside keys are zero-padded to 20 digits.

use redb::TableDefinition;

/// Shape shared by every JSON record table.
pub type RecordTable = TableDefinition<'static, &'static str, &'static [u8]>;

/// Networks keyed by `{network_id}`.
pub const NETWORKS: RecordTable = TableDefinition::new("networks");

/// Network offerings keyed by `{offering_id}`.
pub const OFFERINGS: RecordTable = TableDefinition::new("offerings");

/// System templates keyed by `{data_center_id}:{template_id}`.
pub const TEMPLATES: RecordTable = TableDefinition::new("templates");

/// Load-balancing rules keyed by `{network_id}:{rule_id}`.
pub const RULES: RecordTable = TableDefinition::new("rules");

/// Appliance VMs keyed by `{vm_id}`.
pub const APPLIANCES: RecordTable = TableDefinition::new("appliances");

/// Public IP addresses keyed by `{source_network_id}:{address}`.
pub const IP_ADDRESSES: RecordTable = TableDefinition::new("ip_addresses");

/// Last issued value per named sequence.
pub const SEQUENCES: TableDefinition<&str, u64> = TableDefinition::new("sequences");

/// Zero-padded id, so lexical key order matches numeric order.
pub fn id_key(id: u64) -> String {
    format!("{id:020}")
}

/// `{parent}:{child}` with both ids zero-padded.
pub fn child_key(parent: u64, child: u64) -> String {
    format!("{parent:020}:{child:020}")
}

/// Prefix matching every child key of `parent`.
pub fn child_prefix(parent: u64) -> String {
    format!("{parent:020}:")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padded_keys_sort_numerically() {
        assert!(id_key(9) < id_key(10));
        assert!(child_key(1, 9) < child_key(1, 10));
        assert!(child_key(1, 10).starts_with(&child_prefix(1)));
        assert!(!child_key(11, 1).starts_with(&child_prefix(1)));
    }
}
