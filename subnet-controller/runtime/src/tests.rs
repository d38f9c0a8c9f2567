use crate::{args::report_readiness, Controller, MasterConfig, Metrics, NodeConfig};
use ahash::AHashSet as HashSet;
use ipnet::Ipv4Net;
use ovs_subnet_controller_core::{
    Namespace, NetNamespace, NetworkConfig, Node, Protocol, Revision, Service, Subnet,
};
use ovs_subnet_controller_ovs::{Exec, Ofctl, Output, Plugin, Retry};
use ovs_subnet_controller_registry::{
    Entry, Error, KeyPaths, KvStream, MemoryStore, Registry, Result, Store,
};
use parking_lot::Mutex;
use std::{
    future::Future,
    net::Ipv4Addr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{sync::watch, time};

const TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct Recorder(Mutex<Vec<String>>);

#[async_trait::async_trait]
impl Exec for Recorder {
    async fn exec(&self, program: &str, args: &[String]) -> std::io::Result<Output> {
        self.0.lock().push(format!("{program} {}", args.join(" ")));
        Ok(Output {
            status: Some(0),
            ..Output::default()
        })
    }
}

impl Recorder {
    fn commands(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    fn ran(&self, needle: &str) -> bool {
        self.0.lock().iter().any(|c| c.contains(needle))
    }
}

struct Harness {
    registry: Registry,
    exec: Arc<Recorder>,
    controller: Controller,
}

/// Fails the next subnet record creation once armed.
#[derive(Default)]
struct FlakyStore {
    inner: MemoryStore,
    fail_subnet_create: AtomicBool,
}

#[async_trait::async_trait]
impl Store for FlakyStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.inner.get(key).await
    }

    async fn create(&self, key: &str, value: &str) -> Result<Revision> {
        if key.contains("/subnets/") && self.fail_subnet_create.swap(false, Ordering::SeqCst) {
            return Err(Error::Unavailable("connection reset".to_string()));
        }
        self.inner.create(key, value).await
    }

    async fn put(&self, key: &str, value: &str) -> Result<Revision> {
        self.inner.put(key, value).await
    }

    async fn delete(&self, key: &str) -> Result<Revision> {
        self.inner.delete(key).await
    }

    async fn create_dir(&self, dir: &str) -> Result<()> {
        self.inner.create_dir(dir).await
    }

    async fn list(&self, dir: &str) -> Result<(Vec<Entry>, Revision)> {
        self.inner.list(dir).await
    }

    async fn next_revision(&self) -> Result<Revision> {
        self.inner.next_revision().await
    }

    fn watch(&self, dir: &str, from: Revision) -> KvStream {
        self.inner.watch(dir, from)
    }

    async fn ping(&self) -> Result<()> {
        self.inner.ping().await
    }
}

fn harness(plugin: Plugin) -> Harness {
    harness_with(Arc::new(MemoryStore::default()), plugin, Metrics::default())
}

fn harness_with(store: Arc<dyn Store>, plugin: Plugin, metrics: Metrics) -> Harness {
    let _tracing = tracing_subscriber::fmt().with_test_writer().try_init();
    let registry = Registry::new(store, KeyPaths::default());
    let exec = Arc::new(Recorder::default());
    let ofctl = Ofctl::new(exec.clone()).with_retry(Retry {
        attempts: 3,
        backoff: Duration::from_millis(1),
    });
    let controller = Controller::new(registry.clone(), plugin, ofctl, metrics);
    Harness {
        registry,
        exec,
        controller,
    }
}

fn network() -> NetworkConfig {
    NetworkConfig {
        cluster_network: "10.1.0.0/16".parse().unwrap(),
        host_subnet_length: 8,
        service_network: "172.30.0.0/16".parse().unwrap(),
    }
}

fn master_config() -> MasterConfig {
    MasterConfig {
        network: network(),
        init_nodes: true,
        admin_namespaces: ["default".to_string()].into_iter().collect::<HashSet<_>>(),
        alive_timeout: Duration::ZERO,
    }
}

fn node_config(hostname: &str, ip: &str) -> NodeConfig {
    NodeConfig {
        hostname: hostname.to_string(),
        local_ip: ip.parse().unwrap(),
        mtu: 1450,
        skip_setup: false,
        register: false,
    }
}

fn node(name: &str, ip: &str) -> Node {
    Node {
        name: name.to_string(),
        ip: ip.parse().unwrap(),
    }
}

fn subnet(node: &str, ip: &str, cidr: &str) -> Subnet {
    Subnet {
        node_name: node.to_string(),
        node_ip: ip.parse().unwrap(),
        subnet_cidr: cidr.parse().unwrap(),
    }
}

fn namespace(name: &str) -> Namespace {
    Namespace {
        name: name.to_string(),
    }
}

fn netns(name: &str, net_id: u32) -> NetNamespace {
    NetNamespace {
        name: name.to_string(),
        net_id,
    }
}

fn service(ns: &str, name: &str, ip: &str, port: u16) -> Service {
    Service {
        namespace: ns.to_string(),
        name: name.to_string(),
        ip: ip.parse().unwrap(),
        protocol: Protocol::Tcp,
        port,
    }
}

/// Polls until `check` returns a value.
async fn eventually<T, F, Fut>(mut check: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    time::timeout(TIMEOUT, async {
        loop {
            if let Some(v) = check().await {
                return v;
            }
            time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition must be met before the timeout")
}

async fn subnet_of(registry: &Registry, node: &str) -> Subnet {
    eventually(|| async move { registry.get::<Subnet>(node).await.ok() }).await
}

async fn net_id_of(registry: &Registry, ns: &str) -> u32 {
    eventually(|| async move {
        registry
            .get::<NetNamespace>(ns)
            .await
            .ok()
            .map(|n| n.net_id)
    })
    .await
}

async fn wait_for_command(exec: &Recorder, needle: &str) {
    eventually(|| async move { exec.ran(needle).then_some(()) }).await
}

#[tokio::test]
async fn master_assigns_subnets_to_nodes() {
    let Harness {
        registry,
        controller,
        ..
    } = harness(Plugin::Flat);
    registry.create(&node("node-a", "192.168.1.10")).await.unwrap();
    registry.create(&node("node-b", "192.168.1.11")).await.unwrap();

    let ready = controller.ready();
    assert!(!*ready.borrow());
    controller.start_master(master_config()).await.unwrap();
    assert!(*ready.borrow());

    assert_eq!(
        registry.get::<Subnet>("node-a").await.unwrap(),
        subnet("node-a", "192.168.1.10", "10.1.0.0/24")
    );
    assert_eq!(
        registry.get::<Subnet>("node-b").await.unwrap(),
        subnet("node-b", "192.168.1.11", "10.1.1.0/24")
    );
    assert_eq!(registry.network_config().await.unwrap(), network());

    registry.create(&node("node-c", "192.168.1.12")).await.unwrap();
    assert_eq!(
        subnet_of(&registry, "node-c").await,
        subnet("node-c", "192.168.1.12", "10.1.2.0/24")
    );

    controller.stop().await;
    assert!(!*ready.borrow());
}

#[tokio::test]
async fn master_seeds_allocator_from_existing_subnets() {
    let Harness {
        registry,
        controller,
        ..
    } = harness(Plugin::Flat);
    registry.create(&node("node-a", "192.168.1.10")).await.unwrap();
    registry
        .create(&subnet("node-a", "192.168.1.10", "10.1.0.0/24"))
        .await
        .unwrap();

    controller.start_master(master_config()).await.unwrap();
    registry.create(&node("node-b", "192.168.1.11")).await.unwrap();
    assert_eq!(
        subnet_of(&registry, "node-b").await.subnet_cidr,
        "10.1.1.0/24".parse::<Ipv4Net>().unwrap()
    );
    controller.stop().await;
}

#[tokio::test]
async fn master_reclaims_subnets_of_removed_nodes() {
    let Harness {
        registry,
        controller,
        ..
    } = harness(Plugin::Flat);
    registry
        .create(&subnet("node-gone", "192.168.1.9", "10.1.0.0/24"))
        .await
        .unwrap();
    registry.create(&node("node-a", "192.168.1.10")).await.unwrap();

    controller.start_master(master_config()).await.unwrap();
    assert!(registry
        .get::<Subnet>("node-gone")
        .await
        .unwrap_err()
        .is_not_found());
    assert_eq!(
        registry.get::<Subnet>("node-a").await.unwrap().subnet_cidr,
        "10.1.0.0/24".parse::<Ipv4Net>().unwrap()
    );
    controller.stop().await;
}

#[tokio::test]
async fn master_skips_nodes_with_invalid_addresses() {
    let Harness {
        registry,
        controller,
        ..
    } = harness(Plugin::Flat);
    registry.create(&node("node-a", "127.0.0.1")).await.unwrap();
    registry.create(&node("node-b", "192.168.1.11")).await.unwrap();

    controller.start_master(master_config()).await.unwrap();
    assert!(registry
        .get::<Subnet>("node-a")
        .await
        .unwrap_err()
        .is_not_found());
    assert_eq!(
        registry.get::<Subnet>("node-b").await.unwrap().subnet_cidr,
        "10.1.0.0/24".parse::<Ipv4Net>().unwrap()
    );
    controller.stop().await;
}

#[tokio::test]
async fn master_rejects_a_changed_network() {
    let Harness {
        registry,
        controller,
        ..
    } = harness(Plugin::Flat);
    registry.write_network_config(&network()).await.unwrap();

    let mut config = master_config();
    config.network.host_subnet_length = 9;
    assert!(controller.start_master(config).await.is_err());
    assert!(!*controller.ready().borrow());
}

#[tokio::test]
async fn node_address_change_keeps_its_subnet() {
    let Harness {
        registry,
        controller,
        ..
    } = harness(Plugin::Flat);
    registry.create(&node("node-a", "192.168.1.10")).await.unwrap();
    controller.start_master(master_config()).await.unwrap();

    let new_ip: Ipv4Addr = "192.168.1.20".parse().unwrap();
    registry.put(&node("node-a", "192.168.1.20")).await.unwrap();
    let updated = eventually(|| {
        let registry = &registry;
        async move {
            registry
                .get::<Subnet>("node-a")
                .await
                .ok()
                .filter(|s| s.node_ip == new_ip)
        }
    })
    .await;
    assert_eq!(updated.subnet_cidr, "10.1.0.0/24".parse().unwrap());

    // The block stays assigned to node-a.
    registry.create(&node("node-b", "192.168.1.11")).await.unwrap();
    assert_eq!(
        subnet_of(&registry, "node-b").await.subnet_cidr,
        "10.1.1.0/24".parse::<Ipv4Net>().unwrap()
    );
    controller.stop().await;
}

#[tokio::test]
async fn node_removal_releases_its_subnet() {
    let Harness {
        registry,
        controller,
        ..
    } = harness(Plugin::Flat);
    registry.create(&node("node-a", "192.168.1.10")).await.unwrap();
    controller.start_master(master_config()).await.unwrap();

    registry.delete::<Node>("node-a").await.unwrap();
    // Events are applied in order, so the block is free again when node-b
    // arrives.
    registry.create(&node("node-b", "192.168.1.11")).await.unwrap();
    assert_eq!(
        subnet_of(&registry, "node-b").await.subnet_cidr,
        "10.1.0.0/24".parse::<Ipv4Net>().unwrap()
    );
    assert!(registry
        .get::<Subnet>("node-a")
        .await
        .unwrap_err()
        .is_not_found());
    controller.stop().await;
}

#[tokio::test]
async fn master_assigns_net_ids_to_namespaces() {
    let Harness {
        registry,
        controller,
        ..
    } = harness(Plugin::MultiTenant);
    registry.create(&namespace("default")).await.unwrap();
    registry.create(&namespace("ns-a")).await.unwrap();

    controller.start_master(master_config()).await.unwrap();
    assert_eq!(registry.get::<NetNamespace>("default").await.unwrap().net_id, 0);
    assert_eq!(registry.get::<NetNamespace>("ns-a").await.unwrap().net_id, 10);

    registry.create(&namespace("ns-b")).await.unwrap();
    assert_eq!(net_id_of(&registry, "ns-b").await, 11);

    registry.delete::<Namespace>("ns-a").await.unwrap();
    registry.create(&namespace("ns-c")).await.unwrap();
    assert_eq!(net_id_of(&registry, "ns-c").await, 10);
    assert!(registry
        .get::<NetNamespace>("ns-a")
        .await
        .unwrap_err()
        .is_not_found());

    controller.stop().await;
}

#[tokio::test]
async fn master_pins_admin_namespaces_to_the_global_net_id() {
    let Harness {
        registry,
        controller,
        ..
    } = harness(Plugin::MultiTenant);
    registry.create(&namespace("default")).await.unwrap();
    registry.create(&netns("default", 15)).await.unwrap();

    controller.start_master(master_config()).await.unwrap();
    assert_eq!(registry.get::<NetNamespace>("default").await.unwrap().net_id, 0);

    // 15 was released, so it is handed out after 10 through 14.
    for i in 0..6 {
        registry
            .create(&namespace(&format!("ns-{i}")))
            .await
            .unwrap();
    }
    assert_eq!(net_id_of(&registry, "ns-5").await, 15);
    controller.stop().await;
}

#[tokio::test]
async fn master_adopts_existing_net_ids() {
    let Harness {
        registry,
        controller,
        ..
    } = harness(Plugin::MultiTenant);
    registry.create(&namespace("ns-a")).await.unwrap();
    registry.create(&netns("ns-a", 10)).await.unwrap();

    controller.start_master(master_config()).await.unwrap();
    assert_eq!(registry.get::<NetNamespace>("ns-a").await.unwrap().net_id, 10);

    registry.create(&namespace("ns-b")).await.unwrap();
    assert_eq!(net_id_of(&registry, "ns-b").await, 11);
    controller.stop().await;
}

#[tokio::test]
async fn flat_node_programs_tunnels_for_peers() {
    let Harness {
        registry,
        exec,
        controller,
    } = harness(Plugin::Flat);
    registry.write_network_config(&network()).await.unwrap();
    registry
        .create(&subnet("node-a", "10.0.0.9", "10.1.0.0/24"))
        .await
        .unwrap();
    registry
        .create(&subnet("node-b", "10.0.0.5", "10.1.2.0/24"))
        .await
        .unwrap();

    controller
        .start_node(node_config("node-a", "10.0.0.9"))
        .await
        .unwrap();
    assert!(*controller.ready().borrow());

    let commands = exec.commands();
    assert_eq!(
        commands[0],
        "sdn-flat-setup-node.sh 10.1.0.1 10.1.0.0/24 10.1.0.0/16 16 1450"
    );
    assert!(exec.ran(
        "add-flow br0 table=0,cookie=0x0a000009,priority=200,ip,in_port=10,nw_dst=10.1.0.0/24,actions=output:9"
    ));
    assert!(exec.ran(
        "add-flow br0 table=0,cookie=0x0a000005,priority=200,ip,in_port=9,nw_dst=10.1.2.0/24,actions=set_field:10.0.0.5->tun_dst,output:10"
    ));

    registry
        .create(&subnet("node-c", "10.0.0.6", "10.1.3.0/24"))
        .await
        .unwrap();
    wait_for_command(&exec, "table=0,cookie=0x0a000006,priority=200,arp,in_port=9").await;

    registry.delete::<Subnet>("node-b").await.unwrap();
    wait_for_command(&exec, "del-flows br0 table=0,cookie=0x0a000005/0xffffffff,arp,in_port=9")
        .await;

    controller.stop().await;
}

#[tokio::test]
async fn multitenant_node_scopes_services_to_namespaces() {
    let Harness {
        registry,
        exec,
        controller,
    } = harness(Plugin::MultiTenant);
    registry.write_network_config(&network()).await.unwrap();
    registry
        .create(&subnet("node-a", "10.0.0.9", "10.1.0.0/24"))
        .await
        .unwrap();
    registry
        .create(&subnet("node-b", "10.0.0.5", "10.1.2.0/24"))
        .await
        .unwrap();
    registry.create(&netns("ns-a", 12)).await.unwrap();
    registry.create(&netns("default", 0)).await.unwrap();
    registry
        .create(&service("ns-a", "web", "172.30.0.10", 8080))
        .await
        .unwrap();
    registry
        .create(&service("default", "dns", "172.30.0.2", 53))
        .await
        .unwrap();

    controller
        .start_node(node_config("node-a", "10.0.0.9"))
        .await
        .unwrap();

    assert_eq!(
        exec.commands()[0],
        "sdn-multitenant-setup-node.sh 10.1.0.1 10.1.0.0/24 24 10.1.0.0/16 172.30.0.0/16 1450"
    );
    // The local subnet is covered by the static tables.
    assert!(!exec.ran("cookie=0x0a000009"));
    assert!(exec.ran(
        "add-flow br0 table=7,cookie=0x0a000005,priority=100,ip,nw_dst=10.1.2.0/24,actions=move:NXM_NX_REG0[]->NXM_NX_TUN_ID[0..31],set_field:10.0.0.5->tun_dst,output:1"
    ));
    assert!(exec.ran(
        "add-flow br0 table=4,tcp,nw_dst=172.30.0.10,tp_dst=8080,priority=200,reg0=12,actions=output:2"
    ));
    assert!(exec.ran(
        "add-flow br0 table=4,tcp,nw_dst=172.30.0.2,tp_dst=53,priority=200,actions=output:2"
    ));

    // A changed port replaces the installed rule.
    registry
        .put(&service("ns-a", "web", "172.30.0.10", 8443))
        .await
        .unwrap();
    wait_for_command(
        &exec,
        "add-flow br0 table=4,tcp,nw_dst=172.30.0.10,tp_dst=8443,priority=200,reg0=12,actions=output:2",
    )
    .await;
    assert!(exec.ran("del-flows br0 table=4,tcp,nw_dst=172.30.0.10,tp_dst=8080"));

    registry.delete::<Service>("ns-a/web").await.unwrap();
    wait_for_command(&exec, "del-flows br0 table=4,tcp,nw_dst=172.30.0.10,tp_dst=8443").await;

    controller.stop().await;
}

#[tokio::test]
async fn node_waits_for_its_subnet() {
    let Harness {
        registry,
        exec,
        controller,
    } = harness(Plugin::Flat);
    registry.write_network_config(&network()).await.unwrap();

    let mut config = node_config("node-a", "10.0.0.9");
    config.skip_setup = true;
    config.register = true;
    let mut start = Box::pin(controller.start_node(config));

    // The node registers itself and polls until a subnet is assigned.
    let registered = eventually(|| {
        let registry = &registry;
        async move { registry.get::<Node>("node-a").await.ok() }
    });
    let registered = tokio::select! {
        res = &mut start => panic!("node started without a subnet: {res:?}"),
        n = registered => n,
    };
    assert_eq!(registered, node("node-a", "10.0.0.9"));

    registry
        .create(&subnet("node-a", "10.0.0.9", "10.1.0.0/24"))
        .await
        .unwrap();
    time::timeout(TIMEOUT, &mut start)
        .await
        .expect("node must start once its subnet exists")
        .unwrap();
    drop(start);
    assert!(!exec.ran("setup-node.sh"));

    controller.stop().await;
}

#[tokio::test]
async fn multitenant_node_rekeys_services_when_net_ids_change() {
    let Harness {
        registry,
        exec,
        controller,
    } = harness(Plugin::MultiTenant);
    registry.write_network_config(&network()).await.unwrap();
    registry
        .create(&subnet("node-a", "10.0.0.9", "10.1.0.0/24"))
        .await
        .unwrap();
    registry.create(&netns("ns-a", 12)).await.unwrap();

    controller
        .start_node(node_config("node-a", "10.0.0.9"))
        .await
        .unwrap();

    // A service whose namespace has no NetID yet is held back. Events are
    // applied in order, so once the later ns-a rule exists the tenant service
    // has been seen.
    registry
        .create(&service("tenant", "api", "172.30.0.20", 443))
        .await
        .unwrap();
    registry
        .create(&service("ns-a", "web", "172.30.0.10", 8080))
        .await
        .unwrap();
    wait_for_command(&exec, "nw_dst=172.30.0.10,tp_dst=8080,priority=200,reg0=12").await;
    assert!(!exec.ran("nw_dst=172.30.0.20"));

    registry.create(&netns("tenant", 20)).await.unwrap();
    wait_for_command(
        &exec,
        "add-flow br0 table=4,tcp,nw_dst=172.30.0.20,tp_dst=443,priority=200,reg0=20,actions=output:2",
    )
    .await;
    assert!(!exec.ran("nw_dst=172.30.0.20,tp_dst=443,priority=200,actions"));

    // Moving the namespace to the global identifier replaces the rule.
    registry.put(&netns("tenant", 0)).await.unwrap();
    wait_for_command(
        &exec,
        "add-flow br0 table=4,tcp,nw_dst=172.30.0.20,tp_dst=443,priority=200,actions=output:2",
    )
    .await;
    let removals = |exec: &Recorder| {
        exec.commands()
            .iter()
            .filter(|c| c.contains("del-flows br0 table=4,tcp,nw_dst=172.30.0.20,tp_dst=443"))
            .count()
    };
    assert_eq!(removals(&exec), 1);

    // Without an identifier the rule is withdrawn until one appears.
    registry.delete::<NetNamespace>("tenant").await.unwrap();
    eventually(|| {
        let exec = &exec;
        async move { (removals(exec) == 2).then_some(()) }
    })
    .await;

    controller.stop().await;
}

#[tokio::test]
async fn master_releases_the_block_when_readdressing_fails() {
    let store = Arc::new(FlakyStore::default());
    let Harness {
        registry,
        controller,
        ..
    } = harness_with(store.clone(), Plugin::Flat, Metrics::default());
    registry.create(&node("node-a", "192.168.1.10")).await.unwrap();
    controller.start_master(master_config()).await.unwrap();
    assert_eq!(
        registry.get::<Subnet>("node-a").await.unwrap().subnet_cidr,
        "10.1.0.0/24".parse::<Ipv4Net>().unwrap()
    );

    // The old record is deleted but its replacement cannot be written.
    store.fail_subnet_create.store(true, Ordering::SeqCst);
    registry.put(&node("node-a", "192.168.1.20")).await.unwrap();

    // Events are applied in order, so the failed update has been handled by
    // the time node-b is seen, and its block is free again.
    registry.create(&node("node-b", "192.168.1.11")).await.unwrap();
    assert_eq!(
        subnet_of(&registry, "node-b").await.subnet_cidr,
        "10.1.0.0/24".parse::<Ipv4Net>().unwrap()
    );
    assert!(!store.fail_subnet_create.load(Ordering::SeqCst));
    assert!(registry
        .get::<Subnet>("node-a")
        .await
        .unwrap_err()
        .is_not_found());

    // The next update for node-a assigns it a fresh block.
    registry.put(&node("node-a", "192.168.1.21")).await.unwrap();
    assert_eq!(
        subnet_of(&registry, "node-a").await,
        subnet("node-a", "192.168.1.21", "10.1.1.0/24")
    );
    controller.stop().await;
}

#[tokio::test]
async fn master_reports_seeded_subnets() {
    let mut prom = prometheus_client::registry::Registry::default();
    let metrics = Metrics::register(prom.sub_registry_with_prefix("ovs_subnet"));
    let Harness {
        registry,
        controller,
        ..
    } = harness_with(Arc::new(MemoryStore::default()), Plugin::Flat, metrics);
    registry.create(&node("node-a", "192.168.1.10")).await.unwrap();
    registry
        .create(&subnet("node-a", "192.168.1.10", "10.1.0.0/24"))
        .await
        .unwrap();

    controller.start_master(master_config()).await.unwrap();
    let mut text = String::new();
    prometheus_client::encoding::text::encode(&mut text, &prom).unwrap();
    assert!(text.contains("ovs_subnet_subnets_allocated 1\n"), "{text}");
    controller.stop().await;
}

#[tokio::test]
async fn readiness_follows_the_controller() {
    let readiness = kubert::admin::Builder::default().readiness();
    let (tx, rx) = watch::channel(false);
    let task = tokio::spawn(report_readiness(rx, readiness.clone()));

    time::sleep(Duration::from_millis(10)).await;
    assert!(!readiness.get());

    tx.send_replace(true);
    eventually(|| {
        let readiness = &readiness;
        async move { readiness.get().then_some(()) }
    })
    .await;

    tx.send_replace(false);
    eventually(|| {
        let readiness = &readiness;
        async move { (!readiness.get()).then_some(()) }
    })
    .await;

    drop(tx);
    time::timeout(TIMEOUT, task)
        .await
        .expect("reporting must stop with the controller")
        .unwrap();
}
