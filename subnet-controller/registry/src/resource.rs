use ovs_subnet_controller_core::{Namespace, NetNamespace, Node, Service, Subnet};
use serde::de::Error as _;
use std::fmt;

/// The record types kept in the registry.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Kind {
    Node,
    Subnet,
    Namespace,
    NetNamespace,
    Service,
}

/// A record stored under its kind's directory.
///
/// A record's identity is its key; the stored value holds the remaining
/// fields.
pub trait Resource: Clone + fmt::Debug + Send + Sync + 'static {
    const KIND: Kind;

    /// The record's key relative to its kind's directory.
    fn key(&self) -> String;

    fn encode(&self) -> serde_json::Result<String>;

    fn decode(key: &str, value: &str) -> serde_json::Result<Self>;
}

// === impl Kind ===

impl Kind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Node => "nodes",
            Self::Subnet => "subnets",
            Self::Namespace => "namespaces",
            Self::NetNamespace => "netnamespaces",
            Self::Service => "services",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// === impl Resource ===

impl Resource for Node {
    const KIND: Kind = Kind::Node;

    fn key(&self) -> String {
        self.name.clone()
    }

    fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    fn decode(key: &str, value: &str) -> serde_json::Result<Self> {
        let mut node: Self = serde_json::from_str(value)?;
        node.name = key.to_string();
        Ok(node)
    }
}

impl Resource for Subnet {
    const KIND: Kind = Kind::Subnet;

    fn key(&self) -> String {
        self.node_name.clone()
    }

    fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    fn decode(key: &str, value: &str) -> serde_json::Result<Self> {
        let mut subnet: Self = serde_json::from_str(value)?;
        subnet.node_name = key.to_string();
        Ok(subnet)
    }
}

impl Resource for Namespace {
    const KIND: Kind = Kind::Namespace;

    fn key(&self) -> String {
        self.name.clone()
    }

    fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    fn decode(key: &str, value: &str) -> serde_json::Result<Self> {
        let mut ns: Self = serde_json::from_str(value)?;
        ns.name = key.to_string();
        Ok(ns)
    }
}

impl Resource for NetNamespace {
    const KIND: Kind = Kind::NetNamespace;

    fn key(&self) -> String {
        self.name.clone()
    }

    fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    fn decode(key: &str, value: &str) -> serde_json::Result<Self> {
        let mut netns: Self = serde_json::from_str(value)?;
        netns.name = key.to_string();
        Ok(netns)
    }
}

/// Services are keyed by `<namespace>/<name>`.
impl Resource for Service {
    const KIND: Kind = Kind::Service;

    fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    fn decode(key: &str, value: &str) -> serde_json::Result<Self> {
        let (namespace, name) = key
            .split_once('/')
            .ok_or_else(|| serde_json::Error::custom(format!("invalid service key {key:?}")))?;
        let mut svc: Self = serde_json::from_str(value)?;
        svc.namespace = namespace.to_string();
        svc.name = name.to_string();
        Ok(svc)
    }
}
