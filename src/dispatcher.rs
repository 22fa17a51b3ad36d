//! Event dispatcher
//!
//! Subscribes to the UDisks2 object-manager signals and routes every decoded event
//! onto one of three rendezvous channels: jobs, additions and removals. A send only
//! completes once a consumer takes the event, so a slow consumer holds back its own
//! class of events and nothing else.

use flume::{Receiver, Sender};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backend::{BusSignal, SignalStream, StorageBus};
use crate::cancellable::Cancellable;
use crate::error::{WatchError, WatchResult};
use crate::event::{Event, ObjectKind};

/// Outbound channel an event is forwarded to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    Jobs,
    Additions,
    Removals,
}

/// Classifies an event by the namespace of its object path.
///
/// Jobs keep both directions on one channel so the job manager can correlate them.
/// Paths outside the job, drive and block namespaces have no route.
pub fn route(event: &Event) -> Option<Route> {
    match event.path.kind() {
        ObjectKind::Job => Some(Route::Jobs),
        ObjectKind::Drive | ObjectKind::Block => {
            if event.is_removal_event() {
                Some(Route::Removals)
            } else {
                Some(Route::Additions)
            }
        }
        ObjectKind::Unhandled => None,
    }
}

#[derive(Clone)]
struct Outlets {
    jobs: Sender<Event>,
    additions: Sender<Event>,
    removals: Sender<Event>,
}

impl Outlets {
    fn sender(&self, route: Route) -> &Sender<Event> {
        match route {
            Route::Jobs => &self.jobs,
            Route::Additions => &self.additions,
            Route::Removals => &self.removals,
        }
    }
}

/// Owns both signal subscriptions and the tasks forwarding them.
pub struct Dispatcher {
    jobs: Receiver<Event>,
    additions: Receiver<Event>,
    removals: Receiver<Event>,
    cancellable: Cancellable,
    workers: Vec<JoinHandle<()>>,
}

impl Dispatcher {
    /// Subscribes to `InterfacesAdded` and then `InterfacesRemoved`.
    ///
    /// Fails with [`WatchError::Subscription`] if either subscription cannot be set
    /// up. Nothing is spawned in that case.
    pub async fn connect(bus: &dyn StorageBus) -> WatchResult<Self> {
        let added = subscribe(bus, BusSignal::InterfacesAdded).await?;
        let removed = subscribe(bus, BusSignal::InterfacesRemoved).await?;

        let (jobs_tx, jobs) = flume::bounded(0);
        let (additions_tx, additions) = flume::bounded(0);
        let (removals_tx, removals) = flume::bounded(0);
        let outlets = Outlets {
            jobs: jobs_tx,
            additions: additions_tx,
            removals: removals_tx,
        };

        let cancellable = Cancellable::new();
        let workers = vec![
            tokio::spawn(forward(
                BusSignal::InterfacesAdded,
                added,
                outlets.clone(),
                cancellable.clone(),
            )),
            tokio::spawn(forward(
                BusSignal::InterfacesRemoved,
                removed,
                outlets,
                cancellable.clone(),
            )),
        ];

        info!("Listening for UDisks2 interface signals");
        Ok(Self {
            jobs,
            additions,
            removals,
            cancellable,
            workers,
        })
    }

    pub fn jobs(&self) -> Receiver<Event> {
        self.jobs.clone()
    }

    pub fn additions(&self) -> Receiver<Event> {
        self.additions.clone()
    }

    pub fn removals(&self) -> Receiver<Event> {
        self.removals.clone()
    }

    /// Cancels both subscriptions and waits for the forwarding tasks.
    ///
    /// The senders live in the tasks, so all three channels are closed once this
    /// returns. Calling it twice is harmless.
    pub async fn close(&mut self) {
        self.cancellable.cancel();
        for worker in self.workers.drain(..) {
            if let Err(e) = worker.await {
                warn!("Dispatcher worker ended abnormally: {}", e);
            }
        }
        debug!("Dispatcher closed");
    }
}

async fn subscribe(bus: &dyn StorageBus, signal: BusSignal) -> WatchResult<SignalStream> {
    bus.subscribe(signal).await.map_err(|e| match e {
        WatchError::Subscription { .. } => e,
        other => WatchError::subscription(signal.member(), other),
    })
}

async fn forward(
    signal: BusSignal,
    mut stream: SignalStream,
    outlets: Outlets,
    cancellable: Cancellable,
) {
    loop {
        let item = tokio::select! {
            _ = cancellable.cancelled() => break,
            item = stream.next() => item,
        };

        let mut event = match item {
            Some(Ok(event)) => event,
            Some(Err(e)) => {
                warn!(signal = signal.member(), "Dropping signal: {}", e);
                continue;
            }
            None => {
                debug!(signal = signal.member(), "Signal stream ended");
                break;
            }
        };

        if signal == BusSignal::InterfacesRemoved {
            if event.interfaces.is_empty() {
                warn!(path = %event.path, "Removal without interfaces");
                continue;
            }
            event.sort_interfaces();
        }

        let Some(target) = route(&event) else {
            debug!(path = %event.path, "Unhandled object path");
            continue;
        };

        debug!(path = %event.path, ?target, "Dispatching");
        let sender = outlets.sender(target);
        tokio::select! {
            _ = cancellable.cancelled() => break,
            sent = sender.send_async(event) => {
                if sent.is_err() {
                    debug!(?target, "No receivers left");
                    break;
                }
            }
        }
    }
}
