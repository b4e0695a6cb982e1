//! Pool compiler — listen blocks for one (source IP, source port) pool.
//!
//! Two variants exist and are kept apart on purpose:
//!
//! - [`load_balancer_pool`] compiles one load balancer with its own
//!   destinations, and emits the balance algorithm and stickiness section.
//! - [`forwarding_pool`] compiles a group of legacy forwarding entries
//!   sharing a pool; it emits neither balance nor stickiness lines.

use crate::model::{LoadBalancer, PortForwardingRule};
use crate::stickiness::stickiness_lines;

/// Public port that switches a pool into HTTP mode.
pub const HTTP_PORT: u16 = 80;

/// Separator line between config sections.
pub const BLANK_LINE: &str = "\t ";

/// Pool name: the IP with dots replaced by underscores, a hyphen, the port.
pub fn pool_name(ip: &str, port: u16) -> String {
    format!("{}-{}", ip.replace('.', "_"), port)
}

fn listen_line(pool: &str, ip: &str, port: u16) -> String {
    format!("listen {pool} {ip}:{port}")
}

fn push_http_mode(lines: &mut Vec<String>, port: u16) {
    if port == HTTP_PORT {
        lines.push("\tmode http".to_string());
        lines.push("\toption httpclose".to_string());
    }
}

fn server_line(pool: &str, index: usize, ip: &str, port: u16) -> String {
    format!("\tserver {pool}_{index} {ip}:{port} check")
}

/// Compile a single load balancer into its listen block.
pub fn load_balancer_pool(lb: &LoadBalancer) -> Vec<String> {
    let pool = pool_name(&lb.src_ip, lb.src_port);
    let mut lines = vec![listen_line(&pool, &lb.src_ip, lb.src_port)];

    if !lb.algorithm.is_empty() {
        lines.push(format!("\tbalance {}", lb.algorithm));
    }

    lines.extend(stickiness_lines(&lb.stickiness_policies));
    push_http_mode(&mut lines, lb.src_port);

    let servers = lb.destinations.iter().filter(|d| !d.revoked);
    for (index, dest) in servers.enumerate() {
        lines.push(server_line(&pool, index, &dest.ip, dest.port));
    }

    lines.push(BLANK_LINE.to_string());
    lines
}

/// Compile a group of forwarding entries that share one pool.
///
/// The pool address is taken from the first entry. Returns no lines for
/// an empty group.
pub fn forwarding_pool(pool: &str, rules: &[&PortForwardingRule]) -> Vec<String> {
    let Some(first) = rules.first() else {
        return Vec::new();
    };

    let mut lines = vec![listen_line(pool, &first.src_ip, first.src_port)];
    push_http_mode(&mut lines, first.src_port);

    let servers = rules.iter().filter(|r| !r.revoked);
    for (index, rule) in servers.enumerate() {
        lines.push(server_line(pool, index, &rule.dst_ip, rule.dst_port));
    }

    lines.push(BLANK_LINE.to_string());
    lines
}
