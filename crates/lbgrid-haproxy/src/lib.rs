//! lbgrid-haproxy — compiles load-balancing intent into HAProxy config.
//!
//! Compilation is pure: no I/O, no shared state. The same input always
//! produces the same lines, so callers can diff configs to avoid
//! needless appliance reloads.
//!
//! # Components
//!
//! - **`stickiness`** — Stickiness codec (policy → directive lines)
//! - **`pool`** — Pool compiler (listen block per source IP/port)
//! - **`configurator`** — Full config assembly and firewall reconciliation sets
//! - **`model`** — Compiler inputs (`LoadBalancer`, `StatsEndpoint`) and outputs

pub mod configurator;
pub mod model;
pub mod pool;
pub mod stickiness;

pub use configurator::{HaProxyConfigurator, LoadBalancerConfigurator, render};
pub use model::{
    FirewallRuleSets, LoadBalancer, LoadBalancerConfig, PortForwardingRule, StatsEndpoint,
};
pub use pool::{forwarding_pool, load_balancer_pool, pool_name};
pub use stickiness::{
    StickinessDirective, StickinessError, StickinessMethod, encode, method_catalogue,
    stickiness_lines,
};
