use crate::{
    controller::{Controller, MasterConfig, NodeConfig},
    metrics::Metrics,
};
use anyhow::{bail, Context, Result};
use clap::Parser;
use ovs_subnet_controller_core::{Ipv4Net, NetworkConfig};
use ovs_subnet_controller_ovs::{Ofctl, Plugin, ProcessExec};
use ovs_subnet_controller_registry::{EtcdStore, KeyPaths, Registry, DEFAULT_BASE_PATH};
use prometheus_client::registry::Registry as Prometheus;
use std::{
    net::{IpAddr, Ipv4Addr},
    sync::Arc,
    time::Duration,
};
use tokio::sync::watch;
use tracing::info;
use url::Url;

#[derive(Debug, Parser)]
#[clap(name = "ovs-subnet", about = "Assigns node subnets and programs the overlay network")]
pub struct Args {
    #[clap(long, default_value = "ovs_subnet=info,warn", env = "OVS_SUBNET_LOG")]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// Whether this process runs the cluster master or a node.
    #[clap(long)]
    role: Role,

    #[clap(long, default_value = "multitenant")]
    plugin: Plugin,

    #[clap(long, default_value = "http://127.0.0.1:2379", env = "ETCD_ENDPOINT")]
    etcd_endpoint: Url,

    /// Registry directory holding the network's records.
    #[clap(long, default_value = DEFAULT_BASE_PATH)]
    etcd_path: String,

    /// Registry directory holding node records, if not under the etcd path.
    #[clap(long)]
    node_path: Option<String>,

    #[clap(long, default_value = "10.1.0.0/16")]
    cluster_network: Ipv4Net,

    /// The number of host bits in each node's subnet.
    #[clap(long, default_value = "8")]
    host_subnet_length: u8,

    #[clap(long, default_value = "172.30.0.0/16")]
    service_network: Ipv4Net,

    /// Namespaces pinned to the global network identifier.
    #[clap(long, default_value = "default", value_delimiter = ',')]
    admin_namespaces: Vec<String>,

    /// Seconds to wait for the registry at master startup.
    #[clap(long, default_value = "60")]
    registry_timeout_secs: u64,

    #[clap(long, env = "HOSTNAME")]
    hostname: Option<String>,

    /// The address peers use to reach this node. Resolved from the hostname
    /// when unset.
    #[clap(long)]
    public_ip: Option<Ipv4Addr>,

    #[clap(long, default_value = "1450")]
    mtu: u32,

    /// Assume the local bridge has already been configured.
    #[clap(long)]
    skip_setup: bool,

    /// Whether the master creates the node directory and nodes register
    /// themselves.
    #[clap(long)]
    sync: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Role {
    Master,
    Node,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            log_level,
            log_format,
            admin,
            role,
            plugin,
            etcd_endpoint,
            etcd_path,
            node_path,
            cluster_network,
            host_subnet_length,
            service_network,
            admin_namespaces,
            registry_timeout_secs,
            hostname,
            public_ip,
            mtu,
            skip_setup,
            sync,
        } = self;

        if let Err(error) = log_format.try_init(log_level) {
            bail!("failed to initialize logging: {error}");
        }

        let mut prom = <Prometheus>::default();
        let metrics = Metrics::register(prom.sub_registry_with_prefix("ovs_subnet"));
        let admin = admin.into_builder().with_prometheus(prom).bind()?;
        let readiness = admin.readiness();
        let _admin = admin.spawn();

        // Signals are observed on a background task; `handle` is released once
        // the controller has stopped.
        let (shutdown, handle) = kubert::shutdown::sigint_or_sigterm()?;
        let mut shutdown = tokio::spawn(shutdown.signaled());

        let mut paths = KeyPaths::new(etcd_path);
        if let Some(node_path) = node_path {
            paths = paths.with_node_path(node_path);
        }
        let store = EtcdStore::new(etcd_endpoint).context("invalid etcd endpoint")?;
        let registry = Registry::new(Arc::new(store), paths);

        let ofctl = Ofctl::new(Arc::new(ProcessExec::default()));
        let controller = Controller::new(registry, plugin, ofctl, metrics);
        tokio::spawn(report_readiness(controller.ready(), readiness));

        let start = async {
            match role {
                Role::Master => {
                    let config = MasterConfig {
                        network: NetworkConfig {
                            cluster_network,
                            host_subnet_length,
                            service_network,
                        },
                        init_nodes: sync,
                        admin_namespaces: admin_namespaces.into_iter().collect(),
                        alive_timeout: Duration::from_secs(registry_timeout_secs),
                    };
                    controller.start_master(config).await?;
                }
                Role::Node => {
                    let hostname = match hostname {
                        Some(hostname) => hostname,
                        None => bail!("--hostname must be set for nodes"),
                    };
                    let local_ip = match public_ip {
                        Some(ip) => ip,
                        None => resolve(&hostname).await?,
                    };
                    let config = NodeConfig {
                        hostname,
                        local_ip,
                        mtu,
                        skip_setup,
                        register: sync,
                    };
                    controller.start_node(config).await?;
                }
            }
            Ok::<_, anyhow::Error>(())
        };

        tokio::select! {
            res = start => res?,
            _ = handle.clone().signaled() => {
                info!("Shutdown signaled before startup completed");
            }
        }

        let release = handle.signaled().await;
        info!("Shutting down");
        tokio::select! {
            () = controller.stop() => drop(release),
            _ = &mut shutdown => bail!("Aborted"),
        }
        if shutdown.await?.is_err() {
            bail!("Aborted");
        }
        Ok(())
    }
}

/// Publishes the controller's readiness on the admin server.
pub(crate) async fn report_readiness(
    mut ready: watch::Receiver<bool>,
    readiness: kubert::admin::Readiness,
) {
    loop {
        readiness.set(*ready.borrow_and_update());
        if ready.changed().await.is_err() {
            return;
        }
    }
}

/// Looks up the node's address once; it is not re-resolved afterwards.
async fn resolve(hostname: &str) -> Result<Ipv4Addr> {
    let addrs = tokio::net::lookup_host((hostname, 0))
        .await
        .with_context(|| format!("failed to resolve {hostname}"))?;
    addrs
        .filter_map(|addr| match addr.ip() {
            IpAddr::V4(ip) if !ip.is_loopback() => Some(ip),
            _ => None,
        })
        .next()
        .with_context(|| format!("{hostname} has no usable IPv4 address; set --public-ip"))
}

// === impl Role ===

impl std::str::FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "master" => Ok(Self::Master),
            "node" => Ok(Self::Node),
            _ => bail!("invalid role {s:?}; expected master or node"),
        }
    }
}
