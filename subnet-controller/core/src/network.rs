use ipnet::Ipv4Net;

/// Cluster-wide network parameters shared by the master and every node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NetworkConfig {
    pub cluster_network: Ipv4Net,
    /// The number of host bits in each node's subnet.
    pub host_subnet_length: u8,
    pub service_network: Ipv4Net,
}
