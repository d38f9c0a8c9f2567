#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod args;
mod controller;
mod master;
mod metrics;
mod node;
mod vnids;

#[cfg(test)]
mod tests;

pub use self::{
    args::Args,
    controller::{Controller, MasterConfig, NodeConfig},
    metrics::Metrics,
    vnids::VnidMap,
};
pub use ovs_subnet_controller_core as core;
pub use ovs_subnet_controller_ovs as ovs;
pub use ovs_subnet_controller_registry as registry;
