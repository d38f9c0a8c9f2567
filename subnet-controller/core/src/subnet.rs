use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeSet, net::Ipv4Addr};
use tracing::{debug, warn};


/// A node's slice of the cluster network.
///
/// The node name is the record's key; it is not part of the stored value.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Subnet {
    #[serde(skip)]
    pub node_name: String,

    #[serde(rename = "NodeIP")]
    pub node_ip: Ipv4Addr,

    #[serde(rename = "SubnetCIDR")]
    pub subnet_cidr: Ipv4Net,
}

/// Partitions a cluster network into equally sized, aligned node subnets.
///
/// Blocks are identified by their index within the cluster network: block `i`
/// starts at `network + (i << host_bits)`.
#[derive(Debug)]
pub struct SubnetAllocator {
    network: Ipv4Net,
    host_bits: u8,
    blocks: u64,
    allocated: BTreeSet<u64>,
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SubnetError {
    #[error("subnet length {host_bits} is too large for network {network}")]
    InvalidSubnetLength { network: Ipv4Net, host_bits: u8 },

    #[error("no subnets available in {0}")]
    Exhausted(Ipv4Net),

    #[error("{subnet} is not a subnet of {network}")]
    NotInNetwork { subnet: Ipv4Net, network: Ipv4Net },
}

// === impl SubnetAllocator ===

impl SubnetAllocator {
    /// Builds an allocator for `network` handing out subnets with `host_bits`
    /// host bits each.
    ///
    /// Every block that overlaps a CIDR in `in_use` is treated as allocated.
    /// CIDRs that do not overlap the network at all are ignored.
    pub fn new(
        network: Ipv4Net,
        host_bits: u8,
        in_use: impl IntoIterator<Item = Ipv4Net>,
    ) -> Result<Self, SubnetError> {
        let network = network.trunc();
        if u32::from(host_bits) > 32 - u32::from(network.prefix_len()) {
            return Err(SubnetError::InvalidSubnetLength { network, host_bits });
        }

        let blocks = 1u64 << (32 - network.prefix_len() - host_bits);
        let mut alloc = Self {
            network,
            host_bits,
            blocks,
            allocated: BTreeSet::new(),
        };

        for cidr in in_use {
            let cidr = cidr.trunc();
            if !network.contains(&cidr.network()) && !cidr.contains(&network.network()) {
                warn!(%cidr, %network, "Ignoring subnet outside of the cluster network");
                continue;
            }

            let first = alloc.index_of(cidr.network().max(network.network()));
            let last = alloc.index_of(cidr.broadcast().min(network.broadcast()));
            alloc.allocated.extend(first..=last);
        }

        Ok(alloc)
    }

    pub fn network(&self) -> Ipv4Net {
        self.network
    }

    /// The prefix length of each allocated subnet.
    pub fn subnet_prefix_len(&self) -> u8 {
        32 - self.host_bits
    }

    /// The number of blocks currently allocated (including seeded blocks).
    pub fn allocated(&self) -> usize {
        self.allocated.len()
    }

    /// Returns the lowest-numbered free subnet and marks it allocated.
    pub fn allocate(&mut self) -> Result<Ipv4Net, SubnetError> {
        let mut next = 0u64;
        for &idx in self.allocated.iter() {
            if idx != next {
                break;
            }
            next += 1;
        }
        if next >= self.blocks {
            return Err(SubnetError::Exhausted(self.network));
        }

        self.allocated.insert(next);
        Ok(self.block(next))
    }

    /// Returns a subnet to the free pool.
    ///
    /// Releasing a subnet that is not allocated has no effect.
    pub fn release(&mut self, subnet: Ipv4Net) -> Result<(), SubnetError> {
        let aligned = subnet.prefix_len() == self.subnet_prefix_len()
            && subnet.addr() == subnet.network()
            && self.network.contains(&subnet.network());
        if !aligned {
            return Err(SubnetError::NotInNetwork {
                subnet,
                network: self.network,
            });
        }

        let idx = self.index_of(subnet.network());
        if !self.allocated.remove(&idx) {
            debug!(%subnet, "Subnet was not allocated");
        }
        Ok(())
    }

    fn index_of(&self, addr: Ipv4Addr) -> u64 {
        let offset = u32::from(addr) - u32::from(self.network.network());
        u64::from(offset) >> self.host_bits
    }

    fn block(&self, idx: u64) -> Ipv4Net {
        let base = u64::from(u32::from(self.network.network()));
        let addr = (base + (idx << self.host_bits)) as u32;
        Ipv4Net::new(Ipv4Addr::from(addr), self.subnet_prefix_len())
            .expect("subnet prefix length must be valid")
    }
}
