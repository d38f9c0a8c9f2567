//! Race-free hand-off from a snapshot to a live event stream.
//!
//! A watch task is started before the snapshot is listed. Once the task is
//! receiving events it reports ready; the caller then lists the kind and sends
//! the listing's cursor to the task, which drops every buffered event the
//! snapshot already reflects and forwards the rest in order.

use crate::{Error, Registry, Resource, Result};
use ovs_subnet_controller_core::{Event, Revision};
use std::collections::VecDeque;
use tokio::{
    sync::{mpsc, oneshot},
    time,
};
use tracing::{debug, info_span, trace, warn, Instrument};


pub const WATCH_READY_TIMEOUT: time::Duration = time::Duration::from_secs(60);

const EVENT_BUFFER: usize = 128;
const RETRY_BACKOFF: time::Duration = time::Duration::from_secs(1);

/// Lists every record of a kind and returns the events that follow the
/// listing.
///
/// The event stream ends when `shutdown` is signaled.
pub async fn list_and_watch<R: Resource>(
    registry: &Registry,
    shutdown: drain::Watch,
) -> Result<(Vec<R>, mpsc::Receiver<Event<R>>)> {
    let (ready_tx, ready_rx) = oneshot::channel();
    let (cursor_tx, cursor_rx) = oneshot::channel();
    let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);

    let span = info_span!("watch", kind = %R::KIND);
    tokio::spawn(
        watch::<R>(registry.clone(), ready_tx, cursor_rx, events_tx, shutdown)
            .instrument(span),
    );

    match time::timeout(WATCH_READY_TIMEOUT, ready_rx).await {
        Ok(Ok(())) => {}
        Ok(Err(_)) => return Err(Error::WatchStopped),
        Err(_) => return Err(Error::WatchNotReady(WATCH_READY_TIMEOUT)),
    }

    // If listing fails, the cursor sender is dropped and the watch stops.
    let (items, cursor) = registry.list::<R>().await?;
    debug!(kind = %R::KIND, items = items.len(), cursor, "Listed");
    let _ = cursor_tx.send(cursor);
    Ok((items, events_rx))
}

async fn watch<R: Resource>(
    registry: Registry,
    ready: oneshot::Sender<()>,
    mut cursor: oneshot::Receiver<Revision>,
    events: mpsc::Sender<Event<R>>,
    shutdown: drain::Watch,
) {
    let shutdown = shutdown.signaled();
    tokio::pin!(shutdown);

    let from = loop {
        tokio::select! {
            _ = &mut shutdown => return,
            res = registry.next_revision() => match res {
                Ok(from) => break from,
                Err(error) => {
                    warn!(%error, "Failed to read the current revision");
                    time::sleep(RETRY_BACKOFF).await;
                }
            },
        }
    };
    let mut watch = registry
        .watch::<R>(from)
        .instrument(tracing::Span::current());
    if ready.send(()).is_err() {
        return;
    }

    let mut buffered = VecDeque::new();
    let cursor = loop {
        tokio::select! {
            _ = &mut shutdown => return,
            res = &mut cursor => match res {
                Ok(cursor) => break cursor,
                Err(_) => {
                    debug!("Listing failed");
                    return;
                }
            },
            ev = watch.recv() => buffered.push_back(ev),
        }
    };

    let stale = buffered.iter().filter(|ev| ev.revision < cursor).count();
    trace!(cursor, buffered = buffered.len(), stale, "Starting delivery");
    for ev in buffered.into_iter().filter(|ev| ev.revision >= cursor) {
        tokio::select! {
            _ = &mut shutdown => return,
            res = events.send(ev) => {
                if res.is_err() {
                    return;
                }
            }
        }
    }

    loop {
        let ev = tokio::select! {
            _ = &mut shutdown => return,
            ev = watch.recv() => ev,
        };
        if ev.revision < cursor {
            trace!(revision = ev.revision, cursor, "Skipping event reflected in the listing");
            continue;
        }
        tokio::select! {
            _ = &mut shutdown => return,
            res = events.send(ev) => {
                if res.is_err() {
                    return;
                }
            }
        }
    }
}
