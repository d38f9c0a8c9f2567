//! An in-process store with the same versioning semantics as the etcd store.

use crate::{
    store::{in_dir, Entry, KvEvent, KvStream, Store},
    Error, Result,
};
use ovs_subnet_controller_core::{EventType, Revision};
use parking_lot::Mutex;
use std::{
    collections::{BTreeMap, HashSet, VecDeque},
    sync::Arc,
};
use tokio::sync::broadcast;


const DEFAULT_HISTORY: usize = 1000;

#[derive(Clone)]
pub struct MemoryStore(Arc<Mutex<State>>);

struct State {
    /// The revision of the most recent mutation.
    revision: Revision,
    entries: BTreeMap<String, Entry>,
    dirs: HashSet<String>,
    history: VecDeque<KvEvent>,
    history_limit: usize,
    available: bool,
    tx: broadcast::Sender<Message>,
}

#[derive(Clone, Debug)]
enum Message {
    Event(KvEvent),
    Disconnect,
}

// === impl MemoryStore ===

impl Default for MemoryStore {
    fn default() -> Self {
        Self::with_history(DEFAULT_HISTORY)
    }
}

impl MemoryStore {
    /// Builds a store that retains the last `limit` events for watches that
    /// start in the past.
    pub fn with_history(limit: usize) -> Self {
        let (tx, _) = broadcast::channel(limit.max(1));
        Self(Arc::new(Mutex::new(State {
            revision: 0,
            entries: BTreeMap::new(),
            dirs: HashSet::new(),
            history: VecDeque::new(),
            history_limit: limit,
            available: true,
            tx,
        })))
    }

    /// Makes every subsequent operation fail (or succeed again) as if the
    /// store were unreachable.
    pub fn set_available(&self, available: bool) {
        self.0.lock().available = available;
    }

    /// Terminates all open watches with a transient error.
    pub fn disconnect_watches(&self) {
        let _ = self.0.lock().tx.send(Message::Disconnect);
    }

    fn write(&self, key: &str, value: Option<&str>, must_create: bool) -> Result<Revision> {
        let mut state = self.0.lock();
        state.check_available()?;

        let event = match value {
            Some(value) => {
                if must_create && state.entries.contains_key(key) {
                    return Err(Error::AlreadyExists(key.to_string()));
                }
                state.revision += 1;
                let entry = Entry {
                    key: key.to_string(),
                    value: value.to_string(),
                    revision: state.revision,
                };
                state.entries.insert(key.to_string(), entry);
                KvEvent {
                    kind: EventType::Added,
                    key: key.to_string(),
                    value: Some(value.to_string()),
                    revision: state.revision,
                }
            }
            None => {
                let prior = state
                    .entries
                    .remove(key)
                    .ok_or_else(|| Error::NotFound(key.to_string()))?;
                state.revision += 1;
                KvEvent {
                    kind: EventType::Deleted,
                    key: key.to_string(),
                    value: Some(prior.value),
                    revision: state.revision,
                }
            }
        };

        let revision = event.revision;
        state.history.push_back(event.clone());
        while state.history.len() > state.history_limit {
            state.history.pop_front();
        }
        let _ = state.tx.send(Message::Event(event));
        Ok(revision)
    }
}

#[async_trait::async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let state = self.0.lock();
        state.check_available()?;
        Ok(state.entries.get(key).map(|e| e.value.clone()))
    }

    async fn create(&self, key: &str, value: &str) -> Result<Revision> {
        self.write(key, Some(value), true)
    }

    async fn put(&self, key: &str, value: &str) -> Result<Revision> {
        self.write(key, Some(value), false)
    }

    async fn delete(&self, key: &str) -> Result<Revision> {
        self.write(key, None, false)
    }

    async fn create_dir(&self, dir: &str) -> Result<()> {
        let mut state = self.0.lock();
        state.check_available()?;
        if !state.dirs.insert(dir.to_string()) {
            return Err(Error::AlreadyExists(dir.to_string()));
        }
        Ok(())
    }

    async fn list(&self, dir: &str) -> Result<(Vec<Entry>, Revision)> {
        let state = self.0.lock();
        state.check_available()?;
        let entries = state
            .entries
            .values()
            .filter(|e| in_dir(dir, &e.key))
            .cloned()
            .collect();
        Ok((entries, state.revision + 1))
    }

    async fn next_revision(&self) -> Result<Revision> {
        let state = self.0.lock();
        state.check_available()?;
        Ok(state.revision + 1)
    }

    fn watch(&self, dir: &str, from: Revision) -> KvStream {
        let dir = dir.to_string();
        let opened = {
            let state = self.0.lock();
            state.check_available().and_then(|()| {
                // History holds consecutive revisions ending at the current one.
                let first_retained = state.revision + 1 - state.history.len() as Revision;
                if from < first_retained {
                    return Err(Error::Compacted(from));
                }
                let backlog = state
                    .history
                    .iter()
                    .filter(|ev| ev.revision >= from && in_dir(&dir, &ev.key))
                    .cloned()
                    .collect::<Vec<_>>();
                Ok((backlog, state.tx.subscribe()))
            })
        };

        Box::pin(async_stream::stream! {
            let (backlog, mut rx) = match opened {
                Ok(opened) => opened,
                Err(error) => {
                    yield Err(error);
                    return;
                }
            };

            let mut next = from;
            for ev in backlog {
                next = ev.revision + 1;
                yield Ok(ev);
            }

            loop {
                match rx.recv().await {
                    Ok(Message::Event(ev)) => {
                        if ev.revision >= from && in_dir(&dir, &ev.key) {
                            next = ev.revision + 1;
                            yield Ok(ev);
                        }
                    }
                    Ok(Message::Disconnect) => {
                        yield Err(Error::Unavailable("watch disconnected".to_string()));
                        return;
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        yield Err(Error::Compacted(next));
                        return;
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        })
    }

    async fn ping(&self) -> Result<()> {
        self.0.lock().check_available()
    }
}

// === impl State ===

impl State {
    fn check_available(&self) -> Result<()> {
        if !self.available {
            return Err(Error::Unavailable("store is unavailable".to_string()));
        }
        Ok(())
    }
}
