use crate::{
    controller::{apply_event, reconcile, NodeConfig, Reconcile},
    metrics::Metrics,
    vnids::VnidMap,
};
use ahash::AHashMap as HashMap;
use anyhow::{bail, Context, Result};
use ovs_subnet_controller_core::{Event, NetNamespace, Node, Service, Subnet};
use ovs_subnet_controller_ovs::{FlowController, Plugin};
use ovs_subnet_controller_registry::{list_and_watch, Kind, Registry, Resource};
use std::{net::Ipv4Addr, sync::Arc};
use tokio::{sync::mpsc, time};
use tracing::{debug, info, info_span, instrument, warn, Instrument};

const SUBNET_POLL_INTERVAL: time::Duration = time::Duration::from_secs(2);
const REKEY_BUFFER: usize = 128;

/// Programs tunnel rules for every node's subnet.
pub(crate) struct Routes {
    flows: Arc<dyn FlowController>,
    local_ip: Ipv4Addr,
}

/// Mirrors each namespace's network identifier into the shared map and
/// notifies the service loop of every namespace whose identifier changed.
pub(crate) struct NetIds {
    net_ids: VnidMap,
    rekeys: mpsc::Sender<String>,
}

/// Programs per-service rules scoped to the owning namespace's identifier.
///
/// A service is only installed once its namespace's identifier is known, and
/// is reinstalled whenever that identifier changes.
pub(crate) struct ServiceRules {
    flows: Arc<dyn FlowController>,
    net_ids: VnidMap,
    /// Every known service, by key.
    services: HashMap<String, Service>,
    /// Services whose rules are installed, by key.
    installed: HashMap<String, (u32, Service)>,
}

pub(crate) async fn start(
    registry: &Registry,
    plugin: Plugin,
    flows: Arc<dyn FlowController>,
    metrics: &Metrics,
    config: NodeConfig,
    shutdown: drain::Watch,
) -> Result<()> {
    if config.register {
        let node = Node {
            name: config.hostname.clone(),
            ip: config.local_ip,
        };
        registry
            .put(&node)
            .await
            .context("failed to register node")?;
        info!(node = %node.name, ip = %node.ip, "Registered node");
    }

    let subnet = wait_for_subnet(registry, &config.hostname, shutdown.clone()).await?;
    info!(subnet = %subnet.subnet_cidr, "Found local subnet");

    let network = registry
        .network_config()
        .await
        .context("failed to read the network configuration")?;
    if config.skip_setup {
        info!("Skipping node setup");
    } else {
        flows
            .setup(
                subnet.subnet_cidr,
                network.cluster_network,
                network.service_network,
                config.mtu,
            )
            .await
            .context("failed to set up node networking")?;
    }

    let mut routes = Routes {
        flows: flows.clone(),
        local_ip: config.local_ip,
    };
    let (subnets, subnet_events) = list_and_watch::<Subnet>(registry, shutdown.clone()).await?;
    for subnet in &subnets {
        if let Err(error) = routes.apply(subnet).await {
            warn!(node = %subnet.node_name, %error, "Failed to add subnet rules");
        }
    }
    tokio::spawn(
        reconcile(routes, subnet_events, metrics.clone(), shutdown.clone())
            .instrument(info_span!("subnets")),
    );

    if plugin.is_multitenant() {
        let net_ids = VnidMap::default();
        let (rekeys_tx, rekeys_rx) = mpsc::channel(REKEY_BUFFER);
        let (net_namespaces, netns_events) =
            list_and_watch::<NetNamespace>(registry, shutdown.clone()).await?;
        for netns in net_namespaces {
            net_ids.insert(netns.name, netns.net_id);
        }
        tokio::spawn(
            reconcile(
                NetIds {
                    net_ids: net_ids.clone(),
                    rekeys: rekeys_tx,
                },
                netns_events,
                metrics.clone(),
                shutdown.clone(),
            )
            .instrument(info_span!("netnamespaces")),
        );

        let mut services = ServiceRules::new(flows, net_ids);
        let (svcs, svc_events) = list_and_watch::<Service>(registry, shutdown.clone()).await?;
        for svc in &svcs {
            if let Err(error) = services.apply(svc).await {
                warn!(service = %svc.key(), %error, "Failed to add service rules");
            }
        }
        tokio::spawn(
            services
                .run(svc_events, rekeys_rx, metrics.clone(), shutdown)
                .instrument(info_span!("services")),
        );
    }

    Ok(())
}

/// Polls until the master has assigned this node a subnet.
async fn wait_for_subnet(
    registry: &Registry,
    hostname: &str,
    shutdown: drain::Watch,
) -> Result<Subnet> {
    let shutdown = shutdown.signaled();
    tokio::pin!(shutdown);

    loop {
        match registry.get::<Subnet>(hostname).await {
            Ok(subnet) => return Ok(subnet),
            Err(error) if error.is_not_found() => {
                debug!(node = %hostname, "Waiting for a subnet");
            }
            Err(error) => {
                warn!(node = %hostname, %error, "Failed to read subnet");
            }
        }

        tokio::select! {
            _ = &mut shutdown => bail!("shut down before a subnet was assigned"),
            _ = time::sleep(SUBNET_POLL_INTERVAL) => {}
        }
    }
}

// === impl Routes ===

#[async_trait::async_trait]
impl Reconcile<Subnet> for Routes {
    const KIND: Kind = Kind::Subnet;

    #[instrument(skip(self, subnet), fields(node = %subnet.node_name))]
    async fn apply(&mut self, subnet: &Subnet) -> Result<()> {
        self.flows
            .add_ofrules(subnet.node_ip, subnet.subnet_cidr, self.local_ip)
            .await?;
        debug!(ip = %subnet.node_ip, subnet = %subnet.subnet_cidr, "Added subnet rules");
        Ok(())
    }

    #[instrument(skip(self, subnet), fields(node = %subnet.node_name))]
    async fn delete(&mut self, subnet: &Subnet) -> Result<()> {
        self.flows
            .del_ofrules(subnet.node_ip, self.local_ip)
            .await?;
        debug!(ip = %subnet.node_ip, "Removed subnet rules");
        Ok(())
    }
}

// === impl NetIds ===

impl NetIds {
    async fn rekey(&self, namespace: &str) -> Result<()> {
        self.rekeys
            .send(namespace.to_string())
            .await
            .context("service loop stopped")
    }
}

#[async_trait::async_trait]
impl Reconcile<NetNamespace> for NetIds {
    const KIND: Kind = Kind::NetNamespace;

    async fn apply(&mut self, netns: &NetNamespace) -> Result<()> {
        if self.net_ids.get(&netns.name) == Some(netns.net_id) {
            return Ok(());
        }
        self.net_ids.insert(netns.name.clone(), netns.net_id);
        self.rekey(&netns.name).await
    }

    async fn delete(&mut self, netns: &NetNamespace) -> Result<()> {
        self.net_ids.remove(&netns.name);
        self.rekey(&netns.name).await
    }
}

// === impl ServiceRules ===

impl ServiceRules {
    fn new(flows: Arc<dyn FlowController>, net_ids: VnidMap) -> Self {
        Self {
            flows,
            net_ids,
            services: HashMap::new(),
            installed: HashMap::new(),
        }
    }

    /// Applies service events and identifier changes until shutdown.
    async fn run(
        mut self,
        mut events: mpsc::Receiver<Event<Service>>,
        mut rekeys: mpsc::Receiver<String>,
        metrics: Metrics,
        shutdown: drain::Watch,
    ) {
        let shutdown = shutdown.signaled();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    debug!("Shutdown");
                    return;
                }
                ev = events.recv() => match ev {
                    Some(ev) => apply_event(&mut self, ev, &metrics).await,
                    None => {
                        debug!("Watch ended");
                        return;
                    }
                },
                ns = rekeys.recv() => match ns {
                    Some(ns) => self.rekey(&ns).await,
                    None => {
                        debug!("NetNamespace loop ended");
                        return;
                    }
                },
            }
        }
    }

    /// Reprograms every service in a namespace whose identifier changed.
    async fn rekey(&mut self, namespace: &str) {
        let svcs = self
            .services
            .values()
            .filter(|svc| svc.namespace == namespace)
            .cloned()
            .collect::<Vec<_>>();
        for svc in &svcs {
            if let Err(error) = self.program(svc).await {
                warn!(service = %svc.key(), %error, "Failed to update service rules");
            }
        }
    }

    /// Installs the rule for a service under its namespace's current
    /// identifier, replacing any rule installed under a different one.
    async fn program(&mut self, svc: &Service) -> Result<()> {
        let key = svc.key();
        let net_id = self.net_ids.get(&svc.namespace);
        if let Some((prior_id, prior)) = self.installed.get(&key) {
            if Some(*prior_id) == net_id && prior == svc {
                return Ok(());
            }
            self.flows
                .del_service_ofrules(*prior_id, prior.ip, prior.protocol, prior.port)
                .await?;
            self.installed.remove(&key);
        }

        let Some(net_id) = net_id else {
            debug!(service = %key, namespace = %svc.namespace, "Waiting for the namespace's NetID");
            return Ok(());
        };
        self.flows
            .add_service_ofrules(net_id, svc.ip, svc.protocol, svc.port)
            .await?;
        debug!(service = %key, net_id, ip = %svc.ip, port = svc.port, "Added service rules");
        self.installed.insert(key, (net_id, svc.clone()));
        Ok(())
    }
}

#[async_trait::async_trait]
impl Reconcile<Service> for ServiceRules {
    const KIND: Kind = Kind::Service;

    #[instrument(skip(self, svc), fields(service = %svc.key()))]
    async fn apply(&mut self, svc: &Service) -> Result<()> {
        self.services.insert(svc.key(), svc.clone());
        self.program(svc).await
    }

    #[instrument(skip(self, svc), fields(service = %svc.key()))]
    async fn delete(&mut self, svc: &Service) -> Result<()> {
        let key = svc.key();
        self.services.remove(&key);
        if let Some((net_id, installed)) = self.installed.get(&key) {
            self.flows
                .del_service_ofrules(*net_id, installed.ip, installed.protocol, installed.port)
                .await?;
            debug!(ip = %installed.ip, port = installed.port, "Removed service rules");
            self.installed.remove(&key);
        }
        Ok(())
    }
}
