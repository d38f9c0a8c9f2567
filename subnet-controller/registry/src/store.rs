use crate::Result;
use futures::Stream;
use ovs_subnet_controller_core::{EventType, Revision};
use std::pin::Pin;

/// A stored key and its value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    pub key: String,
    pub value: String,
    pub revision: Revision,
}

/// A single change observed on a key.
///
/// Deletions carry the value stored immediately before the key was removed,
/// when the store provides it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KvEvent {
    pub kind: EventType,
    pub key: String,
    pub value: Option<String>,
    pub revision: Revision,
}

/// A stream of changes. It ends after yielding its first error.
pub type KvStream = Pin<Box<dyn Stream<Item = Result<KvEvent>> + Send + 'static>>;

/// A versioned key/value store.
///
/// Every mutation is assigned a revision strictly greater than the previous
/// one. Directory-like prefixes are addressed without a trailing slash; a
/// key belongs to `dir` when it starts with `dir/`.
#[async_trait::async_trait]
pub trait Store: Send + Sync + 'static {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Writes `value` only if `key` does not exist.
    async fn create(&self, key: &str, value: &str) -> Result<Revision>;

    /// Writes `value` whether or not `key` exists.
    async fn put(&self, key: &str, value: &str) -> Result<Revision>;

    async fn delete(&self, key: &str) -> Result<Revision>;

    async fn create_dir(&self, dir: &str) -> Result<()>;

    /// Lists every key under `dir`, along with the first revision that is not
    /// reflected in the listing.
    async fn list(&self, dir: &str) -> Result<(Vec<Entry>, Revision)>;

    /// The revision the next mutation will be assigned.
    async fn next_revision(&self) -> Result<Revision>;

    /// Streams changes under `dir` with a revision of at least `from`.
    fn watch(&self, dir: &str, from: Revision) -> KvStream;

    async fn ping(&self) -> Result<()>;
}

pub(crate) fn in_dir(dir: &str, key: &str) -> bool {
    key.strip_prefix(dir)
        .map(|rest| rest.starts_with('/'))
        .unwrap_or(false)
}
