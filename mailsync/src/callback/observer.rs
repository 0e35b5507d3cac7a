use std::{future::Future, io, pin::Pin, sync::Arc};

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;

use super::{DeliveryError, Observer, ObserverId, StatusEvent};

/// An observer backed by a bounded channel.
///
/// Delivery never waits: a full channel skips the event for this
/// observer only, a closed channel (dropped receiver) marks the
/// observer as dead.
#[derive(Clone, Debug)]
pub struct ChannelObserver {
    id: ObserverId,
    sender: mpsc::Sender<StatusEvent>,
}

impl ChannelObserver {
    /// Create a new observer with a fresh identity, together with the
    /// receiver events are delivered to.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<StatusEvent>) {
        Self::with_id(ObserverId::next(), capacity)
    }

    pub fn with_id(id: ObserverId, capacity: usize) -> (Self, mpsc::Receiver<StatusEvent>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { id, sender }, receiver)
    }
}

impl Observer for ChannelObserver {
    fn id(&self) -> ObserverId {
        self.id
    }

    fn notify(&self, event: &StatusEvent) -> Result<(), DeliveryError> {
        match self.sender.try_send(event.clone()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(DeliveryError::Busy),
            Err(TrySendError::Closed(_)) => Err(DeliveryError::Gone),
        }
    }
}

pub type HandlerFuture = Pin<Box<dyn Future<Output = io::Result<()>> + Send>>;

/// The async observer handler alias.
pub type ObserverHandler = dyn Fn(StatusEvent) -> HandlerFuture + Send + Sync;

/// An observer backed by an async function.
///
/// Each delivery is spawned on its own task, so a slow handler never
/// holds the broadcast. Handler errors are logged and do not unregister
/// the observer.
#[derive(Clone)]
pub struct HandlerObserver {
    id: ObserverId,
    handler: Arc<ObserverHandler>,
}

impl HandlerObserver {
    pub fn new<F>(handler: impl Fn(StatusEvent) -> F + Send + Sync + 'static) -> Self
    where
        F: Future<Output = io::Result<()>> + Send + 'static,
    {
        let handler: Arc<ObserverHandler> = Arc::new(move |evt| -> HandlerFuture {
            Box::pin(handler(evt))
        });

        Self {
            id: ObserverId::next(),
            handler,
        }
    }
}

impl Observer for HandlerObserver {
    fn id(&self) -> ObserverId {
        self.id
    }

    fn notify(&self, event: &StatusEvent) -> Result<(), DeliveryError> {
        // outside of a runtime the event is skipped, the handler is
        // still alive
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| DeliveryError::Busy)?;
        let id = self.id;
        let task = (self.handler)(event.clone());

        runtime.spawn(async move {
            if let Err(err) = task.await {
                debug!(observer = %id, "error while handling status event: {err}");
            }
        });

        Ok(())
    }
}
