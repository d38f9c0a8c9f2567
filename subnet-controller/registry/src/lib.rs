#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod error;
pub mod etcd;
mod handoff;
pub mod memory;
mod registry;
mod resource;
mod store;
mod watch;

pub use self::{
    error::{Error, Result},
    etcd::EtcdStore,
    handoff::{list_and_watch, WATCH_READY_TIMEOUT},
    memory::MemoryStore,
    registry::{KeyPaths, Registry, DEFAULT_BASE_PATH},
    resource::{Kind, Resource},
    store::{Entry, KvEvent, KvStream, Store},
    watch::Watch,
};
pub use ovs_subnet_controller_core::{Event, EventType, Revision};
