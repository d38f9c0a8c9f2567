#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod event;
pub mod netid;
mod network;
mod resources;
pub mod subnet;

pub use self::{
    event::{Event, EventType, Revision},
    netid::{NetIdAllocator, NetIdError},
    network::NetworkConfig,
    resources::{Namespace, NetNamespace, Node, Protocol, Service},
    subnet::{Subnet, SubnetAllocator, SubnetError},
};
pub use ipnet::Ipv4Net;
