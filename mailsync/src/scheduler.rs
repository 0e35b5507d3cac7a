//! # Scheduler
//!
//! Module dedicated to the rescan loop. A [`Kicker`] asks the loop to
//! re-evaluate which mailboxes need a worker; without kicks, the loop
//! still rescans periodically.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Weak,
    },
    time::Duration,
};

use tokio::{
    sync::{watch, Notify},
    task::JoinHandle,
    time,
};
use tracing::{debug, trace, warn};

use crate::orchestrator::SyncOrchestrator;

/// The scheduler kicker.
///
/// Kicks are never lost: a kick sent while the loop is busy is
/// consumed by its next wait. Consecutive kicks collapse into one
/// rescan.
#[derive(Clone, Debug, Default)]
pub struct Kicker {
    notify: Arc<Notify>,
    pending: Arc<AtomicBool>,
}

impl Kicker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kick(&self) {
        trace!("kicking scheduler");
        self.pending.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    /// Return `true` if a kick has not been consumed yet.
    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    /// Wait for the next kick and consume it.
    pub async fn kicked(&self) {
        self.notify.notified().await;
        self.pending.store(false, Ordering::Release);
    }
}

/// Spawn the rescan loop of the given orchestrator.
///
/// The loop ends when the shutdown flag flips, or when the
/// orchestrator is dropped.
pub(crate) fn spawn(
    orchestrator: Weak<SyncOrchestrator>,
    kicker: Kicker,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        debug!(?interval, "scheduler started");

        loop {
            let kicked = tokio::select! {
                res = shutdown.changed() => {
                    if res.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                _ = kicker.kicked() => true,
                _ = time::sleep(interval) => false,
            };

            let Some(orchestrator) = orchestrator.upgrade() else {
                break;
            };

            if orchestrator.log_settings().sync_enabled() {
                if kicked {
                    trace!("scheduler kicked");
                } else {
                    trace!("scheduler interval elapsed");
                }
            }

            if let Err(err) = orchestrator.rescan().await {
                warn!("cannot rescan mailboxes: {err}");
                debug!("{err:?}");
            }
        }

        debug!("scheduler stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn kick_before_wait_is_not_lost() {
        let kicker = Kicker::new();
        kicker.kick();
        kicker.kick();
        assert!(kicker.is_pending());

        time::timeout(Duration::from_secs(1), kicker.kicked())
            .await
            .unwrap();
        assert!(!kicker.is_pending());

        // both kicks collapsed into one
        let res = time::timeout(Duration::from_millis(20), kicker.kicked()).await;
        assert!(res.is_err());
    }
}
