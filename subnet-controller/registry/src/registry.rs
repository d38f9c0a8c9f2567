use crate::{
    resource::{Kind, Resource},
    store::{KvEvent, Store},
    watch::Watch,
    Error, Result,
};
use ovs_subnet_controller_core::{Event, EventType, Ipv4Net, NetworkConfig, Revision};
use std::{sync::Arc, time::Duration};
use tokio::time;
use tracing::{info, instrument, warn};


pub const DEFAULT_BASE_PATH: &str = "/registry/sdn";

const ALIVE_POLL_INTERVAL: Duration = Duration::from_secs(5);

const CONTAINER_NETWORK: &str = "ContainerNetwork";
const SUBNET_LENGTH: &str = "SubnetLength";
const SERVICE_NETWORK: &str = "ServiceNetwork";

/// Where each kind of record lives in the store.
#[derive(Clone, Debug)]
pub struct KeyPaths {
    base: String,
    nodes: Option<String>,
}

/// Typed access to the records shared between the master and the nodes.
#[derive(Clone)]
pub struct Registry {
    store: Arc<dyn Store>,
    paths: Arc<KeyPaths>,
}

// === impl KeyPaths ===

impl Default for KeyPaths {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_PATH)
    }
}

impl KeyPaths {
    pub fn new(base: impl Into<String>) -> Self {
        let base = base.into().trim_end_matches('/').to_string();
        Self { base, nodes: None }
    }

    /// Reads nodes from a directory outside of the base path.
    pub fn with_node_path(mut self, path: impl Into<String>) -> Self {
        self.nodes = Some(path.into().trim_end_matches('/').to_string());
        self
    }

    pub fn dir(&self, kind: Kind) -> String {
        match (kind, &self.nodes) {
            (Kind::Node, Some(nodes)) => nodes.clone(),
            _ => format!("{}/{}", self.base, kind),
        }
    }

    fn config(&self, name: &str) -> String {
        format!("{}/config/{}", self.base, name)
    }
}

// === impl Registry ===

impl Registry {
    pub fn new(store: Arc<dyn Store>, paths: KeyPaths) -> Self {
        Self {
            store,
            paths: Arc::new(paths),
        }
    }

    pub fn paths(&self) -> &KeyPaths {
        &self.paths
    }

    pub async fn get<R: Resource>(&self, key: &str) -> Result<R> {
        let path = self.path::<R>(key);
        let value = self
            .store
            .get(&path)
            .await?
            .ok_or_else(|| Error::NotFound(path.clone()))?;
        R::decode(key, &value).map_err(|source| Error::Decode { key: path, source })
    }

    pub async fn create<R: Resource>(&self, resource: &R) -> Result<()> {
        let (path, value) = self.encode(resource)?;
        self.store.create(&path, &value).await?;
        Ok(())
    }

    /// Writes a record, replacing any existing value.
    pub async fn put<R: Resource>(&self, resource: &R) -> Result<()> {
        let (path, value) = self.encode(resource)?;
        self.store.put(&path, &value).await?;
        Ok(())
    }

    pub async fn delete<R: Resource>(&self, key: &str) -> Result<()> {
        self.store.delete(&self.path::<R>(key)).await?;
        Ok(())
    }

    /// Lists every record of a kind along with the revision at which a watch
    /// must start to observe every subsequent change.
    ///
    /// Records that cannot be decoded are logged and skipped.
    pub async fn list<R: Resource>(&self) -> Result<(Vec<R>, Revision)> {
        let dir = self.paths.dir(R::KIND);
        let (entries, revision) = self.store.list(&dir).await?;
        let items = entries
            .into_iter()
            .filter_map(|entry| {
                let key = relative_key(&dir, &entry.key)?;
                match R::decode(key, &entry.value) {
                    Ok(item) => Some(item),
                    Err(error) => {
                        warn!(key = %entry.key, %error, "Skipping invalid record");
                        None
                    }
                }
            })
            .collect();
        Ok((items, revision))
    }

    /// Watches a kind for changes at or after `from`.
    pub fn watch<R: Resource>(&self, from: Revision) -> Watch<R> {
        Watch::new(self.store.clone(), self.paths.dir(R::KIND), from)
    }

    pub async fn next_revision(&self) -> Result<Revision> {
        self.store.next_revision().await
    }

    /// Ensures a kind's directory exists.
    pub async fn init_dir(&self, kind: Kind) -> Result<()> {
        let dir = self.paths.dir(kind);
        match self.store.create_dir(&dir).await {
            Ok(()) => {
                info!(%dir, "Created directory");
                Ok(())
            }
            Err(Error::AlreadyExists(_)) => Ok(()),
            Err(error) => Err(error),
        }
    }

    /// Polls the store until it responds, giving up after `timeout`.
    #[instrument(skip(self))]
    pub async fn check_alive(&self, timeout: Duration) -> Result<()> {
        let deadline = time::Instant::now() + timeout;
        loop {
            match self.store.ping().await {
                Ok(()) => return Ok(()),
                Err(error) => {
                    if time::Instant::now() + ALIVE_POLL_INTERVAL > deadline {
                        warn!(%error, "Registry is not reachable");
                        return Err(Error::NotAlive(timeout));
                    }
                    info!(%error, "Waiting for the registry");
                    time::sleep(ALIVE_POLL_INTERVAL).await;
                }
            }
        }
    }

    /// Persists the cluster network parameters.
    ///
    /// Parameters that are already stored must match; the cluster network
    /// cannot be changed once nodes have been assigned subnets.
    pub async fn write_network_config(&self, config: &NetworkConfig) -> Result<()> {
        self.ensure_config(CONTAINER_NETWORK, config.cluster_network.to_string())
            .await?;
        self.ensure_config(SUBNET_LENGTH, config.host_subnet_length.to_string())
            .await?;
        self.ensure_config(SERVICE_NETWORK, config.service_network.to_string())
            .await?;
        Ok(())
    }

    pub async fn network_config(&self) -> Result<NetworkConfig> {
        Ok(NetworkConfig {
            cluster_network: self.read_config::<Ipv4Net>(CONTAINER_NETWORK).await?,
            host_subnet_length: self.read_config::<u8>(SUBNET_LENGTH).await?,
            service_network: self.read_config::<Ipv4Net>(SERVICE_NETWORK).await?,
        })
    }

    async fn ensure_config(&self, name: &str, value: String) -> Result<()> {
        let key = self.paths.config(name);
        match self.store.create(&key, &value).await {
            Ok(_) => {
                info!(%key, %value, "Stored network configuration");
                Ok(())
            }
            Err(Error::AlreadyExists(_)) => {
                let existing = self.store.get(&key).await?.unwrap_or_default();
                if existing != value {
                    return Err(Error::ConfigMismatch {
                        key,
                        existing,
                        requested: value,
                    });
                }
                Ok(())
            }
            Err(error) => Err(error),
        }
    }

    async fn read_config<T: std::str::FromStr>(&self, name: &str) -> Result<T> {
        let key = self.paths.config(name);
        let value = self
            .store
            .get(&key)
            .await?
            .ok_or_else(|| Error::NotFound(key.clone()))?;
        value
            .trim()
            .parse()
            .map_err(|_| Error::InvalidValue { key, value })
    }

    fn path<R: Resource>(&self, key: &str) -> String {
        format!("{}/{}", self.paths.dir(R::KIND), key)
    }

    fn encode<R: Resource>(&self, resource: &R) -> Result<(String, String)> {
        let path = self.path::<R>(&resource.key());
        let value = resource.encode().map_err(|source| Error::Encode {
            key: path.clone(),
            source,
        })?;
        Ok((path, value))
    }
}

fn relative_key<'k>(dir: &str, key: &'k str) -> Option<&'k str> {
    key.strip_prefix(dir)?.strip_prefix('/')
}

/// Converts a store change into a typed event, logging changes that cannot be
/// decoded.
pub(crate) fn decode_event<R: Resource>(dir: &str, ev: KvEvent) -> Option<Event<R>> {
    let key = relative_key(dir, &ev.key)?;
    let Some(value) = ev.value.as_deref() else {
        warn!(key = %ev.key, kind = %ev.kind, "Skipping event without a value");
        return None;
    };
    match R::decode(key, value) {
        Ok(resource) => Some(match ev.kind {
            EventType::Added => Event::added(resource, ev.revision),
            EventType::Deleted => Event::deleted(resource, ev.revision),
        }),
        Err(error) => {
            warn!(key = %ev.key, %error, "Skipping invalid record");
            None
        }
    }
}
