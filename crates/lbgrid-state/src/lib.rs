//! lbgrid-state — embedded record store for LbGrid.
//!
//! Backed by [redb](https://docs.rs/redb). Holds the records the
//! appliance orchestrator reads and writes: networks, network offerings,
//! system templates, load-balancing rules, appliance VMs, and public IP
//! addresses, plus monotonic id sequences.
//!
//! # Architecture
//!
//! All records are JSON-serialized into redb's `&[u8]` value columns.
//! Numeric ids are zero-padded inside composite keys
//! (`{network_id}:{rule_id}`) so prefix scans return records in id order.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across threads.

pub mod error;
pub mod store;
pub mod tables;

pub use error::{StateError, StateResult};
pub use store::StateStore;
