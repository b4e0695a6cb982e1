pub mod config;
pub mod types;

pub use config::{ElbSettings, LbGridConfig, StatsSettings};
pub use types::*;
