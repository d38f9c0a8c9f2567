use crate::{
    controller::{reconcile, MasterConfig, Reconcile},
    metrics::Metrics,
};
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use anyhow::{bail, Context, Result};
use ovs_subnet_controller_core::{
    netid::{ADMIN_VNID, MAX_VNID, MIN_VNID},
    Ipv4Net, Namespace, NetIdAllocator, NetNamespace, Node, Subnet, SubnetAllocator,
};
use ovs_subnet_controller_ovs::Plugin;
use ovs_subnet_controller_registry::{list_and_watch, Kind, Registry};
use std::net::Ipv4Addr;
use tracing::{debug, info, info_span, instrument, warn, Instrument};

/// Assigns subnets to nodes. Owns the subnet allocator.
pub(crate) struct Subnets {
    registry: Registry,
    alloc: SubnetAllocator,
    metrics: Metrics,
}

/// Assigns network identifiers to namespaces. Owns the identifier allocator
/// and the master's view of each namespace's identifier.
pub(crate) struct Tenants {
    registry: Registry,
    alloc: NetIdAllocator,
    net_ids: HashMap<String, u32>,
    admin_namespaces: HashSet<String>,
    metrics: Metrics,
}

pub(crate) async fn start(
    registry: &Registry,
    plugin: Plugin,
    metrics: &Metrics,
    config: MasterConfig,
    shutdown: drain::Watch,
) -> Result<()> {
    registry
        .check_alive(config.alive_timeout)
        .await
        .context("registry is not reachable")?;

    if config.init_nodes {
        registry.init_dir(Kind::Node).await?;
    }
    registry.init_dir(Kind::Subnet).await?;

    let (subnets, _) = registry
        .list::<Subnet>()
        .await
        .context("failed to list subnets")?;
    registry
        .write_network_config(&config.network)
        .await
        .context("failed to store the network configuration")?;

    let alloc = SubnetAllocator::new(
        config.network.cluster_network,
        config.network.host_subnet_length,
        subnets.iter().map(|s| s.subnet_cidr),
    )?;
    metrics.set_subnets(alloc.allocated());
    let mut assigner = Subnets {
        registry: registry.clone(),
        alloc,
        metrics: metrics.clone(),
    };
    info!(
        network = %config.network.cluster_network,
        subnets = subnets.len(),
        "Seeded subnet allocator"
    );

    let (nodes, node_events) = list_and_watch::<Node>(registry, shutdown.clone()).await?;
    assigner.reclaim_orphans(&subnets, &nodes).await?;
    for node in &nodes {
        if !valid_node_ip(node.ip) {
            warn!(node = %node.name, ip = %node.ip, "Ignoring node with an invalid IP");
            continue;
        }
        assigner
            .apply(node)
            .await
            .with_context(|| format!("failed to assign a subnet to node {}", node.name))?;
    }

    if plugin.is_multitenant() {
        let (net_namespaces, _) = registry
            .list::<NetNamespace>()
            .await
            .context("failed to list NetNamespaces")?;
        let alloc = NetIdAllocator::new(
            MIN_VNID,
            MAX_VNID,
            net_namespaces.iter().map(|n| n.net_id),
        )?;
        let mut tenants = Tenants {
            registry: registry.clone(),
            alloc,
            net_ids: net_namespaces
                .into_iter()
                .map(|n| (n.name, n.net_id))
                .collect(),
            admin_namespaces: config.admin_namespaces,
            metrics: metrics.clone(),
        };
        tenants.metrics.set_net_ids(tenants.alloc.allocated());

        let (namespaces, ns_events) =
            list_and_watch::<Namespace>(registry, shutdown.clone()).await?;
        for ns in &namespaces {
            tenants.apply(ns).await.with_context(|| {
                format!("failed to assign a NetID to namespace {}", ns.name)
            })?;
        }
        tokio::spawn(
            reconcile(tenants, ns_events, metrics.clone(), shutdown.clone())
                .instrument(info_span!("namespaces")),
        );
    }

    tokio::spawn(
        reconcile(assigner, node_events, metrics.clone(), shutdown)
            .instrument(info_span!("nodes")),
    );
    Ok(())
}

fn valid_node_ip(ip: Ipv4Addr) -> bool {
    !ip.is_loopback() && !ip.is_unspecified()
}

// === impl Subnets ===

impl Subnets {
    /// Releases the subnets of nodes that were removed while no master was
    /// running.
    async fn reclaim_orphans(&mut self, subnets: &[Subnet], nodes: &[Node]) -> Result<()> {
        let names = nodes.iter().map(|n| n.name.as_str()).collect::<HashSet<_>>();
        for subnet in subnets {
            if !names.contains(subnet.node_name.as_str()) {
                info!(node = %subnet.node_name, subnet = %subnet.subnet_cidr, "Reclaiming subnet of removed node");
                self.remove(subnet).await?;
            }
        }
        Ok(())
    }

    async fn remove(&mut self, subnet: &Subnet) -> Result<()> {
        match self.registry.delete::<Subnet>(&subnet.node_name).await {
            Ok(()) => {}
            Err(error) if error.is_not_found() => {
                debug!(node = %subnet.node_name, "Subnet already deleted");
            }
            Err(error) => return Err(error.into()),
        }
        self.release(subnet.subnet_cidr)
    }

    fn release(&mut self, cidr: Ipv4Net) -> Result<()> {
        self.alloc.release(cidr)?;
        self.metrics.set_subnets(self.alloc.allocated());
        Ok(())
    }
}

#[async_trait::async_trait]
impl Reconcile<Node> for Subnets {
    const KIND: Kind = Kind::Node;

    /// Assigns a subnet to a node that lacks one, or updates the node's
    /// address on its existing subnet.
    #[instrument(skip(self, node), fields(node = %node.name, ip = %node.ip))]
    async fn apply(&mut self, node: &Node) -> Result<()> {
        if !valid_node_ip(node.ip) {
            bail!("invalid node IP {}", node.ip);
        }

        match self.registry.get::<Subnet>(&node.name).await {
            Ok(subnet) if subnet.node_ip == node.ip => {
                debug!(subnet = %subnet.subnet_cidr, "Node already has a subnet");
                Ok(())
            }

            // The subnet keeps its block; only the address is replaced.
            Ok(subnet) => {
                info!(subnet = %subnet.subnet_cidr, old_ip = %subnet.node_ip, "Node IP changed");
                match self.registry.delete::<Subnet>(&node.name).await {
                    Ok(()) => {}
                    Err(error) if error.is_not_found() => {}
                    Err(error) => return Err(error.into()),
                }
                let updated = Subnet {
                    node_ip: node.ip,
                    ..subnet
                };
                match self.registry.create(&updated).await {
                    Ok(()) => Ok(()),
                    Err(error) if error.is_already_exists() => {
                        let existing = self.registry.get::<Subnet>(&node.name).await?;
                        debug!(subnet = %existing.subnet_cidr, "Subnet was created concurrently");
                        if existing.subnet_cidr != updated.subnet_cidr {
                            self.release(updated.subnet_cidr)?;
                        }
                        Ok(())
                    }
                    // Nothing references the block once its record is gone.
                    Err(error) => {
                        self.release(updated.subnet_cidr)?;
                        Err(error.into())
                    }
                }
            }

            Err(error) if error.is_not_found() => {
                let cidr = self.alloc.allocate()?;
                let subnet = Subnet {
                    node_name: node.name.clone(),
                    node_ip: node.ip,
                    subnet_cidr: cidr,
                };
                match self.registry.create(&subnet).await {
                    Ok(()) => {
                        info!(subnet = %cidr, "Assigned subnet");
                    }
                    // Another master assigned a subnet first.
                    Err(error) if error.is_already_exists() => {
                        debug!("Subnet was created concurrently");
                        self.alloc.release(cidr)?;
                    }
                    Err(error) => {
                        self.alloc.release(cidr)?;
                        return Err(error.into());
                    }
                }
                self.metrics.set_subnets(self.alloc.allocated());
                Ok(())
            }

            Err(error) => Err(error.into()),
        }
    }

    #[instrument(skip(self, node), fields(node = %node.name))]
    async fn delete(&mut self, node: &Node) -> Result<()> {
        let subnet = match self.registry.get::<Subnet>(&node.name).await {
            Ok(subnet) => subnet,
            Err(error) if error.is_not_found() => {
                debug!("Node has no subnet");
                return Ok(());
            }
            Err(error) => return Err(error.into()),
        };
        self.remove(&subnet).await?;
        info!(subnet = %subnet.subnet_cidr, "Released subnet");
        Ok(())
    }
}

// === impl Tenants ===

impl Tenants {
    /// Adopts an identifier that was written by another process.
    fn adopt(&mut self, netns: NetNamespace) {
        if netns.net_id != ADMIN_VNID {
            if let Err(error) = self.alloc.claim(netns.net_id) {
                warn!(namespace = %netns.name, %error, "Adopted NetID is not available");
            }
        }
        self.net_ids.insert(netns.name, netns.net_id);
        self.metrics.set_net_ids(self.alloc.allocated());
    }

    /// Admin namespaces never hold an allocated identifier.
    async fn pin_admin(&mut self, name: &str) -> Result<()> {
        let prior = self.net_ids.get(name).copied();
        if prior == Some(ADMIN_VNID) {
            return Ok(());
        }

        self.registry
            .put(&NetNamespace {
                name: name.to_string(),
                net_id: ADMIN_VNID,
            })
            .await?;
        self.net_ids.insert(name.to_string(), ADMIN_VNID);
        if let Some(net_id) = prior {
            if let Err(error) = self.alloc.release(net_id) {
                warn!(namespace = %name, %error, "Failed to release NetID");
            }
            self.metrics.set_net_ids(self.alloc.allocated());
        }
        info!(namespace = %name, ?prior, "Pinned admin namespace to the global NetID");
        Ok(())
    }
}

#[async_trait::async_trait]
impl Reconcile<Namespace> for Tenants {
    const KIND: Kind = Kind::Namespace;

    #[instrument(skip(self, ns), fields(namespace = %ns.name))]
    async fn apply(&mut self, ns: &Namespace) -> Result<()> {
        if self.admin_namespaces.contains(&ns.name) {
            return self.pin_admin(&ns.name).await;
        }
        if self.net_ids.contains_key(&ns.name) {
            return Ok(());
        }

        match self.registry.get::<NetNamespace>(&ns.name).await {
            Ok(netns) => {
                debug!(net_id = netns.net_id, "NetNamespace already exists");
                self.adopt(netns);
                return Ok(());
            }
            Err(error) if error.is_not_found() => {}
            Err(error) => return Err(error.into()),
        }

        let net_id = self.alloc.allocate()?;
        let netns = NetNamespace {
            name: ns.name.clone(),
            net_id,
        };
        match self.registry.create(&netns).await {
            Ok(()) => {
                info!(net_id, "Assigned NetID");
                self.net_ids.insert(netns.name, net_id);
                self.metrics.set_net_ids(self.alloc.allocated());
                Ok(())
            }
            Err(error) if error.is_already_exists() => {
                self.alloc.release(net_id)?;
                let existing = self.registry.get::<NetNamespace>(&ns.name).await?;
                debug!(net_id = existing.net_id, "NetNamespace was created concurrently");
                self.adopt(existing);
                Ok(())
            }
            Err(error) => {
                self.alloc.release(net_id)?;
                Err(error.into())
            }
        }
    }

    #[instrument(skip(self, ns), fields(namespace = %ns.name))]
    async fn delete(&mut self, ns: &Namespace) -> Result<()> {
        match self.registry.delete::<NetNamespace>(&ns.name).await {
            Ok(()) => {}
            Err(error) if error.is_not_found() => debug!("NetNamespace already deleted"),
            Err(error) => return Err(error.into()),
        }

        match self.net_ids.remove(&ns.name) {
            Some(ADMIN_VNID) => {}
            Some(net_id) => {
                self.alloc.release(net_id)?;
                self.metrics.set_net_ids(self.alloc.allocated());
                info!(net_id, "Released NetID");
            }
            None => bail!("no NetID recorded for namespace {}", ns.name),
        }
        Ok(())
    }
}
