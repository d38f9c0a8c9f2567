#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod exec;
mod flat;
mod multitenant;
mod ofctl;
mod pod_hook;


pub use self::{
    exec::{Exec, Output, ProcessExec},
    flat::Flat,
    multitenant::MultiTenant,
    ofctl::{Ofctl, Retry},
    pod_hook::PodHook,
};
use ovs_subnet_controller_core::{Ipv4Net, Protocol};
use std::{net::Ipv4Addr, sync::Arc};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to execute {program}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} {args} failed with status {status:?}: {stderr}")]
    Failed {
        program: String,
        args: String,
        status: Option<i32>,
        stderr: String,
    },
}

/// Programs the local dataplane.
///
/// Rules are tagged with a cookie derived from the peer's address, so rules
/// for a peer can be removed without knowing its subnet.
#[async_trait::async_trait]
pub trait FlowController: Send + Sync + 'static {
    /// Configures the local bridge for the node's subnet. Runs once at node
    /// startup.
    async fn setup(
        &self,
        local_subnet: Ipv4Net,
        cluster_network: Ipv4Net,
        service_network: Ipv4Net,
        mtu: u32,
    ) -> Result<()>;

    /// Installs the rules that route `subnet` to the node at `node_ip`.
    async fn add_ofrules(&self, node_ip: Ipv4Addr, subnet: Ipv4Net, local_ip: Ipv4Addr)
        -> Result<()>;

    /// Removes the rules installed for the node at `node_ip`.
    async fn del_ofrules(&self, node_ip: Ipv4Addr, local_ip: Ipv4Addr) -> Result<()>;

    async fn add_service_ofrules(
        &self,
        net_id: u32,
        ip: Ipv4Addr,
        protocol: Protocol,
        port: u16,
    ) -> Result<()>;

    async fn del_service_ofrules(
        &self,
        net_id: u32,
        ip: Ipv4Addr,
        protocol: Protocol,
        port: u16,
    ) -> Result<()>;
}

/// The dataplane isolation model.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Plugin {
    /// Every pod attaches to a shared bridge and all nodes can reach each other.
    Flat,
    /// Pods are attached by a per-pod hook; all nodes can reach each other.
    PodHook,
    /// Traffic is isolated by the namespace's network identifier.
    MultiTenant,
}

#[derive(Debug, thiserror::Error)]
#[error("unknown network plugin {0:?}; expected flat, pod-hook, or multitenant")]
pub struct InvalidPlugin(String);

// === impl Plugin ===

impl Plugin {
    pub fn is_multitenant(&self) -> bool {
        matches!(self, Self::MultiTenant)
    }

    pub fn flow_controller(self, ofctl: Ofctl) -> Arc<dyn FlowController> {
        match self {
            Self::Flat => Arc::new(Flat::new(ofctl)),
            Self::PodHook => Arc::new(PodHook::new(ofctl)),
            Self::MultiTenant => Arc::new(MultiTenant::new(ofctl)),
        }
    }
}

impl std::str::FromStr for Plugin {
    type Err = InvalidPlugin;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "flat" => Ok(Self::Flat),
            "pod-hook" => Ok(Self::PodHook),
            "multitenant" | "multi-tenant" => Ok(Self::MultiTenant),
            _ => Err(InvalidPlugin(s.to_string())),
        }
    }
}

impl std::fmt::Display for Plugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Flat => f.write_str("flat"),
            Self::PodHook => f.write_str("pod-hook"),
            Self::MultiTenant => f.write_str("multitenant"),
        }
    }
}

/// Rules installed for a node are tagged with its address in hex.
pub(crate) fn cookie(ip: Ipv4Addr) -> String {
    format!("{:08x}", u32::from(ip))
}

/// The first host address of a subnet.
pub(crate) fn gateway(subnet: Ipv4Net) -> Ipv4Addr {
    Ipv4Addr::from(u32::from(subnet.network()).saturating_add(1))
}
