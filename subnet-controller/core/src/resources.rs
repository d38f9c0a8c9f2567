use serde::{Deserialize, Serialize};
use std::{fmt, net::Ipv4Addr};

/// A cluster member that should be assigned a subnet.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Node {
    #[serde(skip)]
    pub name: String,

    #[serde(rename = "IP")]
    pub ip: Ipv4Addr,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Namespace {
    #[serde(skip)]
    pub name: String,
}

/// Binds a namespace to the network identifier that isolates its traffic.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NetNamespace {
    #[serde(skip)]
    pub name: String,

    #[serde(rename = "NetID")]
    pub net_id: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Service {
    #[serde(skip)]
    pub namespace: String,

    #[serde(skip)]
    pub name: String,

    #[serde(rename = "IP")]
    pub ip: Ipv4Addr,

    #[serde(rename = "Protocol")]
    pub protocol: Protocol,

    #[serde(rename = "Port")]
    pub port: u16,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    Tcp,
    Udp,
    Sctp,
}

// === impl Protocol ===

impl Protocol {
    /// The protocol's name as used in flow match expressions.
    pub fn as_match(&self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
            Self::Sctp => "sctp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => f.write_str("TCP"),
            Self::Udp => f.write_str("UDP"),
            Self::Sctp => f.write_str("SCTP"),
        }
    }
}
