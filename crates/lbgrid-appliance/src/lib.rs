//! lbgrid-appliance — elastic load-balancer appliance orchestration.
//!
//! Owns the lifecycle of the per-network load-balancer VM and keeps its
//! HAProxy configuration in sync with the network's rules. The
//! orchestrator:
//!
//! - Deploys (allocates and starts) one appliance per guest network
//! - Serializes deployments with a per-network lock
//! - Recompiles the full config for a source IP on every rule change
//! - Ships the compiled config to the appliance's host agent
//!
//! # Architecture
//!
//! ```text
//! ElasticLbManager
//!   ├── StateStore (networks, offerings, rules, appliances, IPs)
//!   ├── NetworkLocks (per-network exclusive lock)
//!   ├── VmLifecycle (allocate / start the appliance VM)
//!   ├── HaProxyConfigurator (rules → config lines + firewall sets)
//!   └── AgentDispatcher (blocking RPC to the host agent, with timeout)
//! ```
//!
//! All calls are synchronous and run on the caller's thread.

pub mod dispatch;
pub mod error;
pub mod lifecycle;
pub mod lock;
pub mod manager;

pub use dispatch::{
    AgentDispatcher, Answer, Commands, DispatchError, LoadBalancerConfigCommand, OnError,
};
pub use error::{ElbError, ElbResult};
pub use lifecycle::{NicSpec, ServiceOffering, StartParams, VmLifecycle};
pub use lock::{InMemoryLockTable, NetworkLockGuard, NetworkLocks};
pub use manager::ElasticLbManager;
