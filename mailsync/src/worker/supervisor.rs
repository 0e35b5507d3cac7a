//! # Worker supervisor
//!
//! Module dedicated to the lifecycle of sync workers. The supervisor
//! owns the table of running workers, keyed by mailbox, and is the
//! only place where workers are spawned and released.

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard,
    },
};

use futures::future;
use serde::{Deserialize, Serialize};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time,
};
use tracing::{debug, info, trace, warn};

use super::{
    Error, StopMode, StopSignal, SyncReason, SyncWorker, WorkerContext, WorkerFactory,
};
use crate::{
    account::{Account, AccountId},
    callback::{CallbackProxy, StatusEvent, SyncStatus},
    config::BackoffPolicy,
    error_tracker::ErrorTracker,
    logging::LogSettings,
    mailbox::{Mailbox, MailboxId, PartRequest, SyncInterval},
    scheduler::Kicker,
    store::AccountStore,
    Result,
};

/// The outcome of a start request.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StartOutcome {
    /// A new worker has been spawned.
    Spawned,
    /// A worker was already running and has been woken up.
    Woken,
    /// A worker is running but is being stopped, the request has
    /// been dropped.
    Stopping,
    /// The mailbox is held by a previous failure.
    Rejected,
    /// The worker could not be started, the failure has been
    /// recorded.
    Failed,
}

impl StartOutcome {
    /// Return `true` if a worker is now handling the request.
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Spawned | Self::Woken)
    }
}

#[derive(Debug)]
enum Job {
    Sync(SyncReason),
    Part(PartRequest),
}

impl Job {
    fn reason(&self) -> SyncReason {
        match self {
            Self::Sync(reason) => *reason,
            Self::Part(_) => SyncReason::PartRequest,
        }
    }
}

#[derive(Debug)]
struct WorkerHandle {
    serial: u64,
    account_id: AccountId,
    jobs: mpsc::UnboundedSender<Job>,
    stop: watch::Sender<Option<StopMode>>,
    stopping: bool,
    /// Kick the scheduler once the worker released its handle.
    rescan: bool,
    task: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    fn stop(&mut self, mode: StopMode) {
        // an immediate stop wins over a graceful one
        self.stop.send_modify(|current| {
            if *current != Some(StopMode::Immediate) {
                *current = Some(mode);
            }
        });
        self.stopping = true;
    }
}

type Workers = Arc<Mutex<HashMap<MailboxId, WorkerHandle>>>;

fn lock(workers: &Workers) -> MutexGuard<'_, HashMap<MailboxId, WorkerHandle>> {
    workers.lock().unwrap_or_else(|err| err.into_inner())
}

/// The worker supervisor.
pub struct WorkerSupervisor {
    workers: Workers,
    serial: AtomicU64,
    store: Arc<dyn AccountStore>,
    factory: Arc<dyn WorkerFactory>,
    errors: Arc<ErrorTracker>,
    callback: CallbackProxy,
    backoff: BackoffPolicy,
    log: LogSettings,
    kicker: Option<Kicker>,
}

impl WorkerSupervisor {
    pub fn new(
        store: Arc<dyn AccountStore>,
        factory: Arc<dyn WorkerFactory>,
        errors: Arc<ErrorTracker>,
        callback: CallbackProxy,
        backoff: BackoffPolicy,
        log: LogSettings,
    ) -> Self {
        Self {
            workers: Default::default(),
            serial: AtomicU64::new(1),
            store,
            factory,
            errors,
            callback,
            backoff,
            log,
            kicker: None,
        }
    }

    pub fn set_kicker(&mut self, kicker: Kicker) {
        self.kicker = Some(kicker);
    }

    /// Give the supervisor the scheduler kicker, used to rescan once
    /// workers stopped by [`WorkerSupervisor::stop_all`] exit.
    pub fn with_kicker(mut self, kicker: Kicker) -> Self {
        self.set_kicker(kicker);
        self
    }

    /// Start a sync of the given mailbox.
    ///
    /// Wakes the running worker up if there is one, otherwise builds
    /// and spawns a new one. Only account store failures are
    /// returned; every other failure is recorded against the mailbox.
    pub async fn start_sync(&self, id: MailboxId, reason: SyncReason) -> Result<StartOutcome> {
        self.dispatch(id, Job::Sync(reason)).await
    }

    /// Queue an attachment fetch to the worker of the mailbox owning
    /// it, spawning one if needed.
    pub async fn request_part(&self, req: PartRequest) -> Result<StartOutcome> {
        let id = req.attachment.mailbox_id;
        self.dispatch(id, Job::Part(req)).await
    }

    async fn dispatch(&self, id: MailboxId, job: Job) -> Result<StartOutcome> {
        let job = match self.wake(id, job) {
            Ok(outcome) => return Ok(outcome),
            Err(job) => job,
        };

        let mailbox = match self.store.get_mailbox(id).await {
            Ok(Some(mailbox)) => mailbox,
            Ok(None) => {
                self.fail(id, &Error::MailboxNotFoundError(id));
                return Ok(StartOutcome::Failed);
            }
            Err(err) => return Err(Error::GetMailboxError(err, id).into()),
        };

        let account_id = mailbox.account_id;
        let account = match self.store.get_account(account_id).await {
            Ok(Some(account)) => account,
            Ok(None) => {
                self.fail(id, &Error::AccountNotFoundError(account_id, id));
                return Ok(StartOutcome::Failed);
            }
            Err(err) => return Err(Error::GetAccountError(err, account_id, id).into()),
        };

        Ok(self.spawn(account, mailbox, job))
    }

    /// Hand the job over to the running worker of the mailbox, if
    /// any. Give the job back otherwise.
    fn wake(&self, id: MailboxId, job: Job) -> std::result::Result<StartOutcome, Job> {
        let mut workers = lock(&self.workers);

        let Some(handle) = workers.get(&id) else {
            return Err(job);
        };

        if handle.stopping {
            debug!(mailbox = %id, "worker is stopping, dropping {:?} request", job.reason());
            return Ok(StartOutcome::Stopping);
        }

        match handle.jobs.send(job) {
            Ok(()) => {
                if self.log.sync_enabled() {
                    trace!(mailbox = %id, "woke worker up");
                }
                Ok(StartOutcome::Woken)
            }
            Err(mpsc::error::SendError(job)) => {
                // the task died without releasing its handle
                warn!(mailbox = %id, "removing orphan worker handle");
                workers.remove(&id);
                Err(job)
            }
        }
    }

    fn spawn(&self, account: Account, mailbox: Mailbox, job: Job) -> StartOutcome {
        let id = mailbox.id;

        // build outside of the lock, a failing build leaves no handle
        let worker = match self.factory.build(&account, &mailbox) {
            Ok(worker) => worker,
            Err(err) => {
                self.fail(id, &Error::BuildWorkerError(err, id));
                return StartOutcome::Failed;
            }
        };

        let mut job = job;
        loop {
            let mut workers = lock(&self.workers);

            if !workers.contains_key(&id) {
                return self.insert(&mut workers, account, mailbox, worker, job);
            }

            // a concurrent request spawned a worker meanwhile
            drop(workers);
            match self.wake(id, job) {
                Ok(outcome) => return outcome,
                Err(unsent) => job = unsent,
            }
        }
    }

    fn insert(
        &self,
        workers: &mut HashMap<MailboxId, WorkerHandle>,
        account: Account,
        mailbox: Mailbox,
        worker: Box<dyn SyncWorker>,
        job: Job,
    ) -> StartOutcome {
        let id = mailbox.id;
        let account_id = account.id;
        let serial = self.serial.fetch_add(1, Ordering::Relaxed);
        let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop) = StopSignal::channel();

        let reason = job.reason();
        let ctx = WorkerContext {
            account,
            mailbox,
            reason,
            stop: stop.clone(),
            callback: self.callback.clone(),
            log: self.log.clone(),
        };

        let task = WorkerTask {
            serial,
            worker,
            ctx,
            jobs: jobs_rx,
            stop,
            first: Some(job),
            pending: VecDeque::new(),
            workers: self.workers.clone(),
            errors: self.errors.clone(),
            callback: self.callback.clone(),
            backoff: self.backoff,
            kicker: self.kicker.clone(),
        };

        // the task cannot release its handle before we insert it,
        // since we hold the lock
        let task = tokio::spawn(task.run());

        workers.insert(
            id,
            WorkerHandle {
                serial,
                account_id,
                jobs: jobs_tx,
                stop: stop_tx,
                stopping: false,
                rescan: false,
                task: Some(task),
            },
        );

        info!(mailbox = %id, account = %account_id, ?reason, "spawned sync worker");
        StartOutcome::Spawned
    }

    /// Record a failure of the given mailbox and tell observers.
    fn fail(&self, id: MailboxId, err: &Error) {
        record_failure(&self.errors, &self.callback, &self.backoff, id, err);
    }

    /// Ask the worker of the given mailbox to stop as soon as
    /// possible. Return `false` if no worker was running.
    pub fn stop_sync(&self, id: MailboxId) -> bool {
        match lock(&self.workers).get_mut(&id) {
            Some(handle) => {
                handle.stop(StopMode::Immediate);
                if self.log.sync_enabled() {
                    debug!(mailbox = %id, "requested worker stop");
                }
                true
            }
            None => false,
        }
    }

    /// Stop every worker of the given account. Return the number of
    /// workers signalled.
    ///
    /// Each stopped worker kicks the scheduler once it has released
    /// its handle, so the mailbox can be picked up again.
    pub fn stop_all(&self, account_id: AccountId, immediate: bool) -> usize {
        let mode = if immediate {
            StopMode::Immediate
        } else {
            StopMode::Graceful
        };

        let mut count = 0;
        for (id, handle) in lock(&self.workers).iter_mut() {
            if handle.account_id == account_id {
                handle.stop(mode);
                handle.rescan = true;
                if self.log.sync_enabled() {
                    trace!(mailbox = %id, ?mode, "requested worker stop");
                }
                count += 1;
            }
        }

        debug!(account = %account_id, ?mode, "requested {count} worker stop(s)");
        count
    }

    /// Stop every worker and wait for them to exit.
    pub async fn shutdown(&self) {
        let tasks: Vec<_> = lock(&self.workers)
            .drain()
            .filter_map(|(_, mut handle)| {
                handle.stop(StopMode::Immediate);
                handle.task.take()
            })
            .collect();

        debug!("waiting for {} worker(s) to exit", tasks.len());

        for res in future::join_all(tasks).await {
            if let Err(err) = res {
                warn!("sync worker did not exit cleanly: {err}");
            }
        }
    }

    pub fn is_running(&self, id: MailboxId) -> bool {
        lock(&self.workers).contains_key(&id)
    }

    /// The mailboxes currently owning a worker.
    pub fn running(&self) -> Vec<MailboxId> {
        lock(&self.workers).keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.workers).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.workers).is_empty()
    }
}

fn record_failure(
    errors: &ErrorTracker,
    callback: &CallbackProxy,
    backoff: &BackoffPolicy,
    id: MailboxId,
    err: &Error,
) {
    let attempt = errors.failures(id).saturating_add(1);
    let error = errors.record_failure(id, err.is_fatal(), backoff.delay(attempt));

    warn!(mailbox = %id, fatal = error.fatal, "{err}");
    debug!("{err:?}");

    callback.mailbox_status(
        id,
        SyncStatus::Failed {
            fatal: error.fatal,
            hold_until: error.hold_until,
        },
    );
}

struct WorkerTask {
    serial: u64,
    worker: Box<dyn SyncWorker>,
    ctx: WorkerContext,
    jobs: mpsc::UnboundedReceiver<Job>,
    stop: StopSignal,
    /// The job the worker was spawned for. Kept apart from pending
    /// jobs so that requests queued before the first pass still get
    /// their own pass.
    first: Option<Job>,
    pending: VecDeque<Job>,
    workers: Workers,
    errors: Arc<ErrorTracker>,
    callback: CallbackProxy,
    backoff: BackoffPolicy,
    kicker: Option<Kicker>,
}

impl WorkerTask {
    fn id(&self) -> MailboxId {
        self.ctx.mailbox.id
    }

    fn sync_log(&self) -> bool {
        self.ctx.log.sync_enabled()
    }

    async fn run(mut self) {
        let id = self.id();
        self.callback.mailbox_status(id, SyncStatus::Started);

        loop {
            let job = match self.first.take() {
                Some(job) => job,
                None => match self.next_job().await {
                    Some(job) => job,
                    None => break,
                },
            };

            if self.stop.is_requested() {
                break;
            }

            match job {
                Job::Sync(reason) => {
                    self.ctx.reason = reason;
                    if !self.sync().await {
                        break;
                    }
                }
                Job::Part(req) => {
                    self.ctx.reason = SyncReason::PartRequest;
                    self.fetch_part(req).await;
                }
            }

            if self.stop.is_requested() {
                break;
            }
        }

        let rescan = self.release();
        self.callback.mailbox_status(id, SyncStatus::Stopped);
        if self.sync_log() {
            debug!(mailbox = %id, "sync worker exited");
        }

        if rescan {
            if let Some(kicker) = &self.kicker {
                kicker.kick();
            }
        }
    }

    /// Run one sync pass. Return `false` if the worker must exit.
    async fn sync(&mut self) -> bool {
        let id = self.id();
        if self.sync_log() {
            trace!(mailbox = %id, reason = ?self.ctx.reason, "starting sync pass");
        }

        match self.worker.sync(&self.ctx).await {
            Ok(()) => {
                self.errors.clear(id);
                self.callback.mailbox_status(id, SyncStatus::Succeeded);
                true
            }
            Err(_) if self.stop.is_immediate() => {
                debug!(mailbox = %id, "sync pass aborted by stop request");
                false
            }
            Err(err) => {
                record_failure(&self.errors, &self.callback, &self.backoff, id, &err);
                false
            }
        }
    }

    async fn fetch_part(&mut self, req: PartRequest) {
        let attachment_id = req.attachment.id;
        let message_id = req.attachment.message_id;

        let status = match self.worker.fetch_part(&self.ctx, &req).await {
            Ok(()) => SyncStatus::Succeeded,
            Err(err) => {
                warn!(attachment = %attachment_id, background = req.background, "{err}");
                debug!("{err:?}");
                SyncStatus::Failed {
                    fatal: err.is_fatal(),
                    hold_until: None,
                }
            }
        };

        self.callback.send(StatusEvent::Attachment {
            attachment_id,
            message_id,
            status,
        });
    }

    fn enqueue(&mut self, job: Job) {
        // pending sync requests coalesce into one pass
        if matches!(job, Job::Sync(_)) && self.pending.iter().any(|j| matches!(j, Job::Sync(_))) {
            if self.sync_log() {
                trace!(mailbox = %self.id(), "coalesced sync request");
            }
            return;
        }
        self.pending.push_back(job);
    }

    fn drain(&mut self) {
        while let Ok(job) = self.jobs.try_recv() {
            self.enqueue(job);
        }
    }

    async fn next_job(&mut self) -> Option<Job> {
        loop {
            self.drain();

            if let Some(job) = self.pending.pop_front() {
                return Some(job);
            }

            match self.ctx.mailbox.sync_interval {
                SyncInterval::Never => {
                    if self.try_release() {
                        return None;
                    }
                }
                interval => {
                    let period = interval.period();
                    let mut stop = self.stop.clone();

                    tokio::select! {
                        _ = stop.requested() => return None,
                        job = self.jobs.recv() => match job {
                            Some(job) => self.enqueue(job),
                            None => return None,
                        },
                        _ = time::sleep(period.unwrap_or_default()), if period.is_some() => {
                            return Some(Job::Sync(SyncReason::Scheduled));
                        }
                    }
                }
            }
        }
    }

    /// Release the handle if no job arrived meanwhile. Jobs are
    /// checked under the table lock so a concurrent start either sees
    /// the handle and queues, or sees no handle and spawns.
    fn try_release(&mut self) -> bool {
        let table = self.workers.clone();
        let mut workers = lock(&table);

        while let Ok(job) = self.jobs.try_recv() {
            self.enqueue(job);
        }

        if !self.pending.is_empty() {
            return false;
        }

        remove_own(&mut workers, self.id(), self.serial);
        true
    }

    /// Release the handle. Return `true` if the scheduler should
    /// rescan.
    fn release(&self) -> bool {
        let mut workers = lock(&self.workers);
        remove_own(&mut workers, self.id(), self.serial).is_some_and(|handle| handle.rescan)
    }
}

fn remove_own(
    workers: &mut HashMap<MailboxId, WorkerHandle>,
    id: MailboxId,
    serial: u64,
) -> Option<WorkerHandle> {
    if workers.get(&id).is_some_and(|handle| handle.serial == serial) {
        trace!(mailbox = %id, serial, "released worker handle");
        return workers.remove(&id);
    }
    None
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use async_trait::async_trait;
    use tokio::sync::Semaphore;

    use super::*;
    use crate::{
        account::HostAuth,
        callback::{CallbackHub, ChannelObserver},
        logging::LogFlags,
        store::MemoryStore,
        worker::{self, ValidationResult},
        AnyResult,
    };

    #[derive(Default)]
    struct Counters {
        builds: AtomicUsize,
        syncs: AtomicUsize,
        sync_logs: AtomicUsize,
    }

    struct GatedWorker {
        counters: Arc<Counters>,
        gate: Arc<Semaphore>,
        fail: Option<bool>,
    }

    #[async_trait]
    impl SyncWorker for GatedWorker {
        async fn sync(&mut self, ctx: &WorkerContext) -> worker::Result<()> {
            self.gate.acquire().await.unwrap().forget();
            self.counters.syncs.fetch_add(1, Ordering::SeqCst);
            if ctx.log.sync_enabled() {
                self.counters.sync_logs.fetch_add(1, Ordering::SeqCst);
            }
            match self.fail {
                Some(true) => Err(Error::fatal("auth rejected")),
                Some(false) => Err(Error::transient("timeout")),
                None => Ok(()),
            }
        }
    }

    struct Factory {
        counters: Arc<Counters>,
        gate: Arc<Semaphore>,
        fail: Option<bool>,
        broken: bool,
    }

    #[async_trait]
    impl WorkerFactory for Factory {
        fn build(&self, _: &Account, _: &Mailbox) -> AnyResult<Box<dyn SyncWorker>> {
            if self.broken {
                return Err("no protocol handler".into());
            }
            self.counters.builds.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(GatedWorker {
                counters: self.counters.clone(),
                gate: self.gate.clone(),
                fail: self.fail,
            }))
        }

        async fn validate(&self, _: &HostAuth) -> ValidationResult {
            ValidationResult::success()
        }

        async fn load_folder_list(&self, _: &Account) -> AnyResult<()> {
            Ok(())
        }
    }

    struct Fixture {
        supervisor: WorkerSupervisor,
        kicker: Kicker,
        log: LogSettings,
        errors: Arc<ErrorTracker>,
        counters: Arc<Counters>,
        gate: Arc<Semaphore>,
        events: mpsc::Receiver<StatusEvent>,
    }

    fn fixture(fail: Option<bool>, broken: bool) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        store.insert_account(Account {
            id: AccountId(1),
            ..Default::default()
        });
        store.insert_mailbox(Mailbox {
            id: MailboxId(10),
            account_id: AccountId(1),
            ..Default::default()
        });
        store.insert_mailbox(Mailbox {
            id: MailboxId(11),
            account_id: AccountId(1),
            ..Default::default()
        });

        let hub = CallbackHub::new();
        let (observer, events) = ChannelObserver::new(256);
        hub.register(observer);

        let counters = Arc::new(Counters::default());
        let gate = Arc::new(Semaphore::new(0));
        let errors = Arc::new(ErrorTracker::new());
        let factory = Factory {
            counters: counters.clone(),
            gate: gate.clone(),
            fail,
            broken,
        };

        let kicker = Kicker::new();
        let log = LogSettings::new();
        let supervisor = WorkerSupervisor::new(
            store,
            Arc::new(factory),
            errors.clone(),
            hub.proxy(),
            BackoffPolicy::default(),
            log.clone(),
        )
        .with_kicker(kicker.clone());

        Fixture {
            supervisor,
            kicker,
            log,
            errors,
            counters,
            gate,
            events,
        }
    }

    async fn wait_idle(supervisor: &WorkerSupervisor) {
        for _ in 0..200 {
            if supervisor.is_empty() {
                return;
            }
            time::sleep(Duration::from_millis(5)).await;
        }
        panic!("workers did not exit");
    }

    #[test_log::test(tokio::test)]
    async fn second_start_wakes_running_worker() {
        let f = fixture(None, false);

        let first = f.supervisor.start_sync(MailboxId(10), SyncReason::UserRequest).await;
        let second = f.supervisor.start_sync(MailboxId(10), SyncReason::UserRequest).await;

        assert_eq!(first.unwrap(), StartOutcome::Spawned);
        assert_eq!(second.unwrap(), StartOutcome::Woken);
        assert_eq!(f.counters.builds.load(Ordering::SeqCst), 1);
        assert_eq!(f.supervisor.len(), 1);

        f.gate.add_permits(2);
        wait_idle(&f.supervisor).await;
        assert_eq!(f.counters.syncs.load(Ordering::SeqCst), 2);
    }

    #[test_log::test(tokio::test)]
    async fn pending_pings_coalesce() {
        let f = fixture(None, false);

        f.supervisor.start_sync(MailboxId(10), SyncReason::UserRequest).await.unwrap();
        for _ in 0..5 {
            f.supervisor.start_sync(MailboxId(10), SyncReason::Scheduled).await.unwrap();
        }

        f.gate.add_permits(10);
        wait_idle(&f.supervisor).await;

        // the first pass plus one coalesced pass
        assert_eq!(f.counters.syncs.load(Ordering::SeqCst), 2);
    }

    #[test_log::test(tokio::test)]
    async fn transient_failure_is_recorded_and_releases() {
        let mut f = fixture(Some(false), false);

        f.supervisor.start_sync(MailboxId(10), SyncReason::UserRequest).await.unwrap();
        f.gate.add_permits(1);
        wait_idle(&f.supervisor).await;

        let error = f.errors.get(MailboxId(10)).unwrap();
        assert!(!error.fatal);
        assert_eq!(error.failures, 1);
        assert!(error.hold_until.is_some());

        let mut statuses = Vec::new();
        while let Ok(evt) = f.events.try_recv() {
            statuses.push(evt.status().clone());
        }
        assert_eq!(statuses.first(), Some(&SyncStatus::Started));
        assert_eq!(statuses.last(), Some(&SyncStatus::Stopped));
        assert!(statuses
            .iter()
            .any(|s| matches!(s, SyncStatus::Failed { fatal: false, .. })));
    }

    #[test_log::test(tokio::test)]
    async fn fatal_failure_is_sticky() {
        let f = fixture(Some(true), false);

        f.supervisor.start_sync(MailboxId(10), SyncReason::UserRequest).await.unwrap();
        f.gate.add_permits(1);
        wait_idle(&f.supervisor).await;

        assert!(f.errors.get(MailboxId(10)).unwrap().fatal);
    }

    #[test_log::test(tokio::test)]
    async fn build_failure_leaves_no_handle() {
        let f = fixture(None, true);

        let outcome = f.supervisor.start_sync(MailboxId(10), SyncReason::UserRequest).await;

        assert_eq!(outcome.unwrap(), StartOutcome::Failed);
        assert!(f.supervisor.is_empty());
        assert_eq!(f.errors.failures(MailboxId(10)), 1);
    }

    #[test_log::test(tokio::test)]
    async fn missing_mailbox_is_recorded() {
        let f = fixture(None, false);

        let outcome = f.supervisor.start_sync(MailboxId(99), SyncReason::UserRequest).await;

        assert_eq!(outcome.unwrap(), StartOutcome::Failed);
        assert_eq!(f.errors.failures(MailboxId(99)), 1);
    }

    #[test_log::test(tokio::test)]
    async fn stopping_worker_drops_start() {
        let f = fixture(None, false);

        f.supervisor.start_sync(MailboxId(10), SyncReason::UserRequest).await.unwrap();
        assert!(f.supervisor.stop_sync(MailboxId(10)));

        let outcome = f.supervisor.start_sync(MailboxId(10), SyncReason::UserRequest).await;
        assert_eq!(outcome.unwrap(), StartOutcome::Stopping);

        f.gate.add_permits(1);
        wait_idle(&f.supervisor).await;
        assert!(!f.supervisor.stop_sync(MailboxId(10)));
    }

    #[test_log::test(tokio::test)]
    async fn stop_all_only_touches_account() {
        let f = fixture(None, false);

        f.supervisor.start_sync(MailboxId(10), SyncReason::UserRequest).await.unwrap();
        f.supervisor.start_sync(MailboxId(11), SyncReason::UserRequest).await.unwrap();

        assert_eq!(f.supervisor.stop_all(AccountId(2), true), 0);
        assert_eq!(f.supervisor.stop_all(AccountId(1), false), 2);

        f.gate.add_permits(2);
        wait_idle(&f.supervisor).await;
    }

    #[test_log::test(tokio::test)]
    async fn pings_sent_before_first_poll_get_their_own_pass() {
        let f = fixture(None, false);
        f.gate.add_permits(10);

        // nothing yields between the calls, the task has not run yet
        f.supervisor.start_sync(MailboxId(10), SyncReason::UserRequest).await.unwrap();
        let outcome = f.supervisor.start_sync(MailboxId(10), SyncReason::UserRequest).await;
        assert_eq!(outcome.unwrap(), StartOutcome::Woken);

        wait_idle(&f.supervisor).await;
        assert_eq!(f.counters.syncs.load(Ordering::SeqCst), 2);
    }

    #[test_log::test(tokio::test)]
    async fn stopped_account_workers_kick_once_released() {
        let f = fixture(None, false);

        f.supervisor.start_sync(MailboxId(10), SyncReason::UserRequest).await.unwrap();
        f.supervisor.stop_all(AccountId(1), true);
        assert!(!f.kicker.is_pending());

        wait_idle(&f.supervisor).await;
        assert!(f.kicker.is_pending());
    }

    #[test_log::test(tokio::test)]
    async fn stopped_worker_does_not_kick() {
        let f = fixture(None, false);

        f.supervisor.start_sync(MailboxId(10), SyncReason::UserRequest).await.unwrap();
        f.supervisor.stop_sync(MailboxId(10));

        wait_idle(&f.supervisor).await;
        assert!(!f.kicker.is_pending());
    }

    #[test_log::test(tokio::test)]
    async fn workers_see_logging_changes() {
        let f = fixture(None, false);

        f.supervisor.start_sync(MailboxId(10), SyncReason::UserRequest).await.unwrap();
        f.log.set(LogFlags::SYNC);

        f.gate.add_permits(1);
        wait_idle(&f.supervisor).await;
        assert_eq!(f.counters.syncs.load(Ordering::SeqCst), 1);
        assert_eq!(f.counters.sync_logs.load(Ordering::SeqCst), 1);
    }

    #[test_log::test(tokio::test)]
    async fn shutdown_waits_for_workers() {
        let f = fixture(None, false);

        f.supervisor.start_sync(MailboxId(10), SyncReason::UserRequest).await.unwrap();
        f.gate.add_permits(1);
        f.supervisor.shutdown().await;

        assert!(f.supervisor.is_empty());
    }
}
