use crate::{master, metrics::Metrics, node};
use ahash::AHashSet as HashSet;
use anyhow::Result;
use ovs_subnet_controller_core::{Event, EventType, NetworkConfig};
use ovs_subnet_controller_ovs::{FlowController, Ofctl, Plugin};
use ovs_subnet_controller_registry::{Kind, Registry};
use std::{net::Ipv4Addr, sync::Arc, time::Duration};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Runs the master or node side of the network.
///
/// Every loop started by the controller stops when the controller is
/// stopped. `stop` consumes the controller, so it can only happen once.
pub struct Controller {
    registry: Registry,
    plugin: Plugin,
    flows: Arc<dyn FlowController>,
    metrics: Metrics,
    ready: watch::Sender<bool>,
    signal: drain::Signal,
    shutdown: drain::Watch,
}

#[derive(Clone, Debug)]
pub struct MasterConfig {
    pub network: NetworkConfig,
    /// Whether the master creates the node directory.
    pub init_nodes: bool,
    /// Namespaces that always use the global network identifier.
    pub admin_namespaces: HashSet<String>,
    pub alive_timeout: Duration,
}

#[derive(Clone, Debug)]
pub struct NodeConfig {
    pub hostname: String,
    pub local_ip: Ipv4Addr,
    pub mtu: u32,
    pub skip_setup: bool,
    /// Whether the node writes its own record to the registry.
    pub register: bool,
}

/// Applies one kind of registry event.
#[async_trait::async_trait]
pub(crate) trait Reconcile<T>: Send + 'static {
    const KIND: Kind;

    async fn apply(&mut self, resource: &T) -> Result<()>;

    async fn delete(&mut self, resource: &T) -> Result<()>;
}

// === impl Controller ===

impl Controller {
    pub fn new(registry: Registry, plugin: Plugin, ofctl: Ofctl, metrics: Metrics) -> Self {
        let (signal, shutdown) = drain::channel();
        let (ready, _) = watch::channel(false);
        Self {
            flows: plugin.flow_controller(ofctl),
            registry,
            plugin,
            metrics,
            ready,
            signal,
            shutdown,
        }
    }

    /// Indicates whether startup has completed.
    pub fn ready(&self) -> watch::Receiver<bool> {
        self.ready.subscribe()
    }

    /// A handle that is signaled when the controller stops.
    pub fn shutdown_handle(&self) -> drain::Watch {
        self.shutdown.clone()
    }

    /// Seeds the allocators from the registry, assigns subnets (and, with
    /// isolation, network identifiers) to everything that lacks one, and then
    /// watches for changes.
    pub async fn start_master(&self, config: MasterConfig) -> Result<()> {
        master::start(
            &self.registry,
            self.plugin,
            &self.metrics,
            config,
            self.shutdown.clone(),
        )
        .await?;
        info!(plugin = %self.plugin, "Master started");
        self.ready.send_replace(true);
        Ok(())
    }

    /// Waits for this node's subnet, configures the local bridge, programs
    /// flows for every peer, and then watches for changes.
    pub async fn start_node(&self, config: NodeConfig) -> Result<()> {
        node::start(
            &self.registry,
            self.plugin,
            self.flows.clone(),
            &self.metrics,
            config,
            self.shutdown.clone(),
        )
        .await?;
        info!(plugin = %self.plugin, "Node started");
        self.ready.send_replace(true);
        Ok(())
    }

    /// Stops every loop and waits for them to finish.
    pub async fn stop(self) {
        let Self {
            signal,
            shutdown,
            ready,
            ..
        } = self;
        ready.send_replace(false);
        drop(shutdown);
        signal.drain().await;
        debug!("Stopped");
    }
}

/// Applies events until the stream ends or shutdown is signaled.
pub(crate) async fn reconcile<T, R>(
    mut reconciler: R,
    mut events: mpsc::Receiver<Event<T>>,
    metrics: Metrics,
    shutdown: drain::Watch,
) where
    T: std::fmt::Debug + Send + Sync + 'static,
    R: Reconcile<T>,
{
    let shutdown = shutdown.signaled();
    tokio::pin!(shutdown);

    loop {
        let ev = tokio::select! {
            _ = &mut shutdown => {
                debug!("Shutdown");
                return;
            }
            ev = events.recv() => match ev {
                Some(ev) => ev,
                None => {
                    debug!("Watch ended");
                    return;
                }
            },
        };

        apply_event(&mut reconciler, ev, &metrics).await;
    }
}

/// Applies one event, recording the outcome. Failures are logged and the
/// event is dropped.
pub(crate) async fn apply_event<T, R>(reconciler: &mut R, ev: Event<T>, metrics: &Metrics)
where
    T: std::fmt::Debug + Send + Sync + 'static,
    R: Reconcile<T>,
{
    let res = match ev.kind {
        EventType::Added => reconciler.apply(&ev.resource).await,
        EventType::Deleted => reconciler.delete(&ev.resource).await,
    };
    metrics.observe(R::KIND, ev.kind, res.is_ok());
    if let Err(error) = res {
        warn!(
            event = %ev.kind,
            resource = ?ev.resource,
            error = %format!("{error:#}"),
            "Failed to apply event"
        );
    }
}
