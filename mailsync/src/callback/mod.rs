//! # Callback
//!
//! Module dedicated to status observers. The [`CallbackHub`] keeps
//! the set of registered [`Observer`]s and broadcasts every
//! [`StatusEvent`] to them. Observers may go away at any time without
//! unregistering: they are pruned lazily, the first time a delivery
//! to them fails because they are gone.
//!
//! Components never talk to observers directly, they send events
//! through a [`CallbackProxy`].

mod event;
mod observer;

use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, RwLock, RwLockReadGuard, RwLockWriteGuard,
    },
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace};

#[doc(inline)]
pub use self::{
    event::{StatusEvent, SyncStatus},
    observer::{ChannelObserver, HandlerFuture, HandlerObserver, ObserverHandler},
};

/// The observer identity.
///
/// Registering an observer with an identity already present replaces
/// the previous registration.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObserverId(pub u64);

impl ObserverId {
    /// Generate a process-unique identity.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Errors related to the delivery of an event to one observer.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
pub enum DeliveryError {
    /// The observer is no longer reachable and must be pruned.
    #[error("observer is gone")]
    Gone,

    /// The observer cannot take the event right now. The event is
    /// skipped for this observer only.
    #[error("observer is busy")]
    Busy,
}

/// The observer trait.
///
/// [`Observer::notify`] must not wait for the consumer: it either
/// hands the event over (queue, spawned task) or fails immediately.
pub trait Observer: Send + Sync {
    fn id(&self) -> ObserverId;

    fn notify(&self, event: &StatusEvent) -> Result<(), DeliveryError>;
}

/// The outcome of one broadcast.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub skipped: usize,
    pub pruned: usize,
}

/// The callback hub.
#[derive(Default)]
pub struct CallbackHub {
    observers: RwLock<HashMap<ObserverId, Arc<dyn Observer>>>,
}

impl CallbackHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<ObserverId, Arc<dyn Observer>>> {
        self.observers.read().unwrap_or_else(|err| err.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<ObserverId, Arc<dyn Observer>>> {
        self.observers.write().unwrap_or_else(|err| err.into_inner())
    }

    /// Register the given observer, replacing any observer with the
    /// same identity.
    pub fn register(&self, observer: impl Observer + 'static) -> ObserverId {
        self.register_arc(Arc::new(observer))
    }

    pub fn register_arc(&self, observer: Arc<dyn Observer>) -> ObserverId {
        let id = observer.id();
        if self.write().insert(id, observer).is_some() {
            debug!(observer = %id, "replaced observer");
        } else {
            debug!(observer = %id, "registered observer");
        }
        id
    }

    pub fn unregister(&self, id: ObserverId) -> bool {
        self.write().remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn contains(&self, id: ObserverId) -> bool {
        self.read().contains_key(&id)
    }

    /// Deliver the given event to every live observer.
    ///
    /// Observers found gone are removed from the hub. Delivery order
    /// is unspecified.
    pub fn broadcast(&self, event: &StatusEvent) -> BroadcastReport {
        // deliver outside of the lock so observers may re-register
        let observers: Vec<_> = self.read().values().cloned().collect();

        let mut report = BroadcastReport::default();
        let mut gone = Vec::new();

        for observer in observers {
            match observer.notify(event) {
                Ok(()) => report.delivered += 1,
                Err(DeliveryError::Busy) => {
                    debug!(observer = %observer.id(), "observer busy, skipping event");
                    report.skipped += 1;
                }
                Err(DeliveryError::Gone) => gone.push(observer),
            }
        }

        if !gone.is_empty() {
            let mut observers = self.write();
            for observer in gone {
                let id = observer.id();
                // only prune the exact registration that failed
                if let Some(current) = observers.get(&id) {
                    if Arc::ptr_eq(current, &observer) {
                        observers.remove(&id);
                        debug!(observer = %id, "pruned dead observer");
                        report.pruned += 1;
                    }
                }
            }
        }

        trace!(?report, "broadcasted {event}");
        report
    }

    /// Return the proxy other components use to emit events.
    pub fn proxy(self: &Arc<Self>) -> CallbackProxy {
        CallbackProxy(self.clone())
    }
}

impl fmt::Debug for CallbackHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackHub")
            .field("observers", &self.len())
            .finish()
    }
}

/// The broadcast proxy.
///
/// A stable handle standing for "every current observer".
#[derive(Clone, Debug)]
pub struct CallbackProxy(Arc<CallbackHub>);

impl CallbackProxy {
    pub fn send(&self, event: StatusEvent) -> BroadcastReport {
        self.0.broadcast(&event)
    }

    pub fn mailbox_status(&self, mailbox_id: crate::mailbox::MailboxId, status: SyncStatus) {
        self.send(StatusEvent::mailbox(mailbox_id, status));
    }

    pub fn hub(&self) -> &Arc<CallbackHub> {
        &self.0
    }
}
