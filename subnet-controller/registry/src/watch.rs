use crate::{
    registry::decode_event,
    resource::Resource,
    store::{KvStream, Store},
    Error,
};
use futures::prelude::*;
use ovs_subnet_controller_core::{Event, Revision};
use std::{marker::PhantomData, sync::Arc};
use tokio::time;
use tracing::{info, warn, Instrument};

const RESTART_BACKOFF: time::Duration = time::Duration::from_secs(1);

/// Watches a kind of record, reconnecting when the store fails.
///
/// A failed watch is reopened at the revision after the last event it
/// delivered, so each change is observed exactly once.
pub struct Watch<R> {
    store: Arc<dyn Store>,
    dir: String,
    next: Revision,
    span: tracing::Span,
    rx: Option<KvStream>,
    _marker: PhantomData<fn() -> R>,
}

// === impl Watch ===

impl<R: Resource> Watch<R> {
    pub(crate) fn new(store: Arc<dyn Store>, dir: String, from: Revision) -> Self {
        Self {
            store,
            dir,
            next: from,
            span: tracing::Span::current(),
            rx: None,
            _marker: PhantomData,
        }
    }

    pub fn instrument(mut self, span: tracing::Span) -> Self {
        self.span = span;
        self
    }

    /// The revision of the next event this watch will deliver.
    pub fn next_revision(&self) -> Revision {
        self.next
    }

    /// Receive the next event.
    ///
    /// If the stream fails, log the error and sleep for 1s before resuming from
    /// the last revision seen. If the store no longer retains that revision,
    /// resume from the store's current revision.
    pub async fn recv(&mut self) -> Event<R> {
        loop {
            let rx = self
                .rx
                .get_or_insert_with(|| self.store.watch(&self.dir, self.next));

            match rx.next().instrument(self.span.clone()).await {
                Some(Ok(ev)) => {
                    self.next = ev.revision + 1;
                    if let Some(ev) = decode_event(&self.dir, ev) {
                        return ev;
                    }
                }

                Some(Err(Error::Compacted(revision))) => {
                    self.rx = None;
                    match self.store.next_revision().await {
                        Ok(next) => {
                            warn!(
                                parent: &self.span,
                                requested = revision,
                                resumed = next,
                                "History compacted; changes may have been missed"
                            );
                            self.next = next;
                        }
                        Err(error) => {
                            info!(parent: &self.span, %error, "Failed");
                            time::sleep(RESTART_BACKOFF).await;
                        }
                    }
                }

                Some(Err(error)) => {
                    self.rx = None;
                    info!(parent: &self.span, %error, "Failed");
                    time::sleep(RESTART_BACKOFF).await;
                    info!(parent: &self.span, "Restarting");
                }

                None => {
                    self.rx = None;
                    info!(parent: &self.span, "Stream ended");
                    time::sleep(RESTART_BACKOFF).await;
                    info!(parent: &self.span, "Restarting");
                }
            }
        }
    }
}
