//! # Orchestrator
//!
//! Module dedicated to the [`SyncOrchestrator`], the façade receiving
//! external commands. It owns the account registry, the error tracker,
//! the callback hub and the worker supervisor, and coordinates them.
//!
//! An orchestrator is explicitly built, started and shut down by the
//! embedding process, which then hands it to whatever transport
//! receives commands (see [`crate::server`]).

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use chrono::Utc;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tracing::{debug, info, trace, warn};

use crate::{
    account::{self, registry, AccountId, AccountRegistry, HostAuth},
    callback::{
        CallbackHub, CallbackProxy, ChannelObserver, Observer, ObserverId, StatusEvent, SyncStatus,
    },
    config::OrchestratorConfig,
    error_tracker::ErrorTracker,
    logging::{LogFlags, LogSettings},
    mailbox::{AttachmentId, Mailbox, MailboxId, MessageId, PartRequest},
    scheduler::{self, Kicker},
    service::{Capabilities, SyncService},
    store::{AccountReconciler, AccountStore},
    worker::{self, StartOutcome, SyncReason, ValidationResult, WorkerFactory, WorkerSupervisor},
    Result,
};

/// The sync orchestrator builder.
pub struct SyncOrchestratorBuilder {
    store: Arc<dyn AccountStore>,
    reconciler: Arc<dyn AccountReconciler>,
    factory: Arc<dyn WorkerFactory>,
    config: OrchestratorConfig,
    hub: Option<Arc<CallbackHub>>,
}

impl SyncOrchestratorBuilder {
    pub fn new(
        store: Arc<dyn AccountStore>,
        reconciler: Arc<dyn AccountReconciler>,
        factory: Arc<dyn WorkerFactory>,
    ) -> Self {
        Self {
            store,
            reconciler,
            factory,
            config: Default::default(),
            hub: None,
        }
    }

    pub fn set_config(&mut self, config: OrchestratorConfig) {
        self.config = config;
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.set_config(config);
        self
    }

    /// Share an existing callback hub instead of creating one.
    pub fn set_callback_hub(&mut self, hub: Arc<CallbackHub>) {
        self.hub = Some(hub);
    }

    pub fn with_callback_hub(mut self, hub: Arc<CallbackHub>) -> Self {
        self.set_callback_hub(hub);
        self
    }

    pub fn build(self) -> Arc<SyncOrchestrator> {
        let config = self.config;
        let hub = self.hub.unwrap_or_else(CallbackHub::new);
        let callback = hub.proxy();
        let errors = Arc::new(ErrorTracker::new());
        let log = LogSettings::new();

        let registry = AccountRegistry::new(
            self.store.clone(),
            self.reconciler,
            config.get_protocol(),
            config.get_account_manager_type(),
        );

        let kicker = Kicker::new();

        let supervisor = WorkerSupervisor::new(
            self.store.clone(),
            self.factory.clone(),
            errors.clone(),
            callback.clone(),
            config.get_backoff_policy(),
            log.clone(),
        )
        .with_kicker(kicker.clone());

        Arc::new(SyncOrchestrator {
            config,
            store: self.store,
            factory: self.factory,
            registry,
            errors,
            hub,
            callback,
            supervisor,
            log,
            kicker,
            scheduler: Mutex::new(None),
        })
    }
}

struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// The sync orchestrator.
pub struct SyncOrchestrator {
    config: OrchestratorConfig,
    store: Arc<dyn AccountStore>,
    factory: Arc<dyn WorkerFactory>,
    registry: AccountRegistry,
    errors: Arc<ErrorTracker>,
    hub: Arc<CallbackHub>,
    callback: CallbackProxy,
    supervisor: WorkerSupervisor,
    log: LogSettings,
    kicker: Kicker,
    scheduler: Mutex<Option<SchedulerHandle>>,
}

impl SyncOrchestrator {
    pub fn builder(
        store: Arc<dyn AccountStore>,
        reconciler: Arc<dyn AccountReconciler>,
        factory: Arc<dyn WorkerFactory>,
    ) -> SyncOrchestratorBuilder {
        SyncOrchestratorBuilder::new(store, reconciler, factory)
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn registry(&self) -> &AccountRegistry {
        &self.registry
    }

    pub fn errors(&self) -> &ErrorTracker {
        &self.errors
    }

    pub fn supervisor(&self) -> &WorkerSupervisor {
        &self.supervisor
    }

    pub fn callback_hub(&self) -> &Arc<CallbackHub> {
        &self.hub
    }

    pub fn log_settings(&self) -> &LogSettings {
        &self.log
    }

    pub fn kicker(&self) -> &Kicker {
        &self.kicker
    }

    /// Start the orchestrator.
    ///
    /// Reconciles the accounts of the protocol with the
    /// account-management authority, collects the governed accounts,
    /// then spawns the scheduler and runs a first scan.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let protocol = self.config.get_protocol();
        info!(protocol, "starting sync orchestrator");

        self.registry.reconcile_accounts(protocol).await?;
        self.registry.refresh().await?;

        {
            let mut scheduler = self.scheduler.lock().unwrap_or_else(|err| err.into_inner());
            if scheduler.is_none() {
                let (shutdown, rx) = watch::channel(false);
                let task = scheduler::spawn(
                    Arc::downgrade(self),
                    self.kicker.clone(),
                    self.config.get_rescan_interval(),
                    rx,
                );
                *scheduler = Some(SchedulerHandle { shutdown, task });
            }
        }

        let started = self.scan(SyncReason::ServiceStart).await?;
        info!(accounts = self.registry.len(), "sync orchestrator started {started} worker(s)");
        Ok(())
    }

    /// Stop the scheduler and every worker, then wait for them.
    pub async fn shutdown(&self) {
        info!("shutting down sync orchestrator");

        let scheduler = self
            .scheduler
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .take();

        if let Some(SchedulerHandle { shutdown, task }) = scheduler {
            let _ = shutdown.send(true);
            if let Err(err) = task.await {
                warn!("scheduler did not exit cleanly: {err}");
            }
        }

        self.supervisor.shutdown().await;
    }

    /// Request a sync of the given mailbox.
    ///
    /// Automatic requests on a mailbox held by a previous failure are
    /// silently rejected. User requests override the hold.
    pub async fn start_sync(&self, id: MailboxId, user_requested: bool) -> Result<StartOutcome> {
        if !user_requested && !self.errors.is_eligible(id, Utc::now()) {
            debug!(mailbox = %id, "mailbox held by previous failure, rejecting sync");
            return Ok(StartOutcome::Rejected);
        }

        let reason = if user_requested {
            SyncReason::UserRequest
        } else {
            SyncReason::ServiceStart
        };

        self.supervisor.start_sync(id, reason).await
    }

    /// Request the worker of the given mailbox to stop. Return `false`
    /// if none was running.
    pub fn stop_sync(&self, id: MailboxId) -> bool {
        self.supervisor.stop_sync(id)
    }

    /// Handle a change of the host or credentials of the given
    /// account.
    ///
    /// Forgets the errors of mailboxes that vanished, clears the holds
    /// of the account mailboxes, stops the account workers, then kicks
    /// the scheduler.
    pub async fn host_changed(&self, account_id: AccountId) -> Result<()> {
        let owners = self.error_owners().await?;

        let pruned = self
            .errors
            .prune_missing(|id| matches!(owners.get(&id), Some(None)));
        let cleared = self
            .errors
            .clear_for_account(account_id, |id| owners.get(&id).copied().flatten());
        let stopped = self.supervisor.stop_all(account_id, true);

        info!(account = %account_id, pruned, cleared, stopped, "host changed");
        self.kicker.kick();
        Ok(())
    }

    /// Resolve the owning account of every tracked error. Mailboxes
    /// gone from the store resolve to `None`.
    async fn error_owners(&self) -> Result<HashMap<MailboxId, Option<AccountId>>> {
        let mut owners = HashMap::new();

        for id in self.errors.mailbox_ids() {
            let mailbox = self
                .store
                .get_mailbox(id)
                .await
                .map_err(|err| worker::Error::GetMailboxError(err, id))?;
            owners.insert(id, mailbox.map(|mbox| mbox.account_id));
        }

        Ok(owners)
    }

    /// Queue the fetch of the given attachment to the worker of its
    /// mailbox.
    pub async fn load_attachment(&self, id: AttachmentId, background: bool) -> Result<()> {
        let attachment = self
            .store
            .get_attachment(id)
            .await
            .map_err(|err| worker::Error::GetAttachmentError(err, id))?;

        let Some(attachment) = attachment else {
            debug!(attachment = %id, "cannot find attachment");
            self.callback.send(StatusEvent::Attachment {
                attachment_id: id,
                message_id: MessageId::default(),
                status: SyncStatus::NotFound,
            });
            return Ok(());
        };

        debug!(attachment = %id, file = %attachment.file_name, background, "loading attachment");

        let req = PartRequest {
            attachment,
            background,
        };

        self.supervisor.request_part(req).await?;
        Ok(())
    }

    /// Ask the worker factory to refresh the folder list of the given
    /// account, in the background.
    pub async fn update_folder_list(&self, account_id: AccountId) -> Result<()> {
        let account = match self.registry.get(account_id) {
            Some(account) => Some(account),
            None => self
                .store
                .get_account(account_id)
                .await
                .map_err(|err| account::Error::GetAccountError(err, account_id))?,
        };

        let Some(account) = account else {
            debug!(account = %account_id, "cannot find account, skipping folder list update");
            self.callback
                .send(StatusEvent::folder_list(account_id, SyncStatus::NotFound));
            return Ok(());
        };

        let factory = self.factory.clone();
        let callback = self.callback.clone();

        tokio::spawn(async move {
            let status = match factory.update_folder_list(&account).await {
                Ok(()) => SyncStatus::Succeeded,
                Err(err) => {
                    warn!(account = %account.id, "cannot update folder list: {err}");
                    debug!("{err:?}");
                    SyncStatus::Failed {
                        fatal: false,
                        hold_until: None,
                    }
                }
            };
            callback.send(StatusEvent::folder_list(account.id, status));
        });

        Ok(())
    }

    pub fn set_logging(&self, flags: LogFlags) {
        self.log.set(flags);
    }

    /// Register a channel observer sized after the configuration and
    /// return its receiving end.
    pub fn subscribe(&self) -> (ObserverId, mpsc::Receiver<StatusEvent>) {
        let (observer, events) = ChannelObserver::new(self.config.get_observer_queue_size());
        (self.hub.register(observer), events)
    }

    /// Register the given observer. Registering the same observer
    /// identity again replaces the previous registration.
    pub fn set_callback(&self, observer: Arc<dyn Observer>) -> ObserverId {
        self.hub.register_arc(observer)
    }

    pub fn get_capabilities(&self, account_id: AccountId) -> Capabilities {
        trace!(account = %account_id, "returning static capabilities");
        Capabilities::SYNCABLE_FOLDERS | Capabilities::FOLDER_SERVER_SEARCH | Capabilities::UNDO
    }

    /// Validate the given host and credentials with a throwaway
    /// worker.
    pub async fn validate(&self, host_auth: &HostAuth) -> ValidationResult {
        debug!(host = %host_auth.host, port = host_auth.port, "validating credentials");
        let result = self.factory.validate(host_auth).await;
        debug!(status = ?result.status, "validated credentials");
        result
    }

    /// Recollect the governed accounts after the account store
    /// changed, then kick the scheduler.
    pub async fn accounts_changed(&self) -> Result<bool> {
        let changed = self.registry.refresh().await?;
        if changed {
            debug!(accounts = self.registry.len(), "account set changed");
        }
        self.kicker.kick();
        Ok(changed)
    }

    /// Set up a freshly created account: create its inbox if needed,
    /// load its folder list and kick the scheduler.
    pub async fn account_added(&self, account_id: AccountId) -> Result<Option<Mailbox>> {
        let inbox = self
            .registry
            .on_new_account(account_id, &*self.factory, &self.callback, &self.kicker)
            .await?;
        Ok(inbox)
    }

    /// Load the folder list of the given account in the foreground.
    pub async fn load_folder_list(&self, account_id: AccountId) -> Result<()> {
        let account = self
            .store
            .get_account(account_id)
            .await
            .map_err(|err| account::Error::GetAccountError(err, account_id))?;

        match account {
            Some(account) => {
                registry::load_folder_list(&account, &*self.factory, &self.callback).await;
            }
            None => {
                self.callback
                    .send(StatusEvent::folder_list(account_id, SyncStatus::NotFound));
            }
        }

        Ok(())
    }

    /// Ask the scheduler to rescan.
    pub fn kick(&self) {
        self.kicker.kick();
    }

    /// Re-evaluate which mailboxes need a worker. Return the number
    /// of workers spawned.
    pub async fn rescan(&self) -> Result<usize> {
        self.scan(SyncReason::Scheduled).await
    }

    async fn scan(&self, reason: SyncReason) -> Result<usize> {
        let selector = self.registry.account_selector();
        let mailboxes = self
            .store
            .list_mailboxes(&selector)
            .await
            .map_err(account::Error::AccountStoreUnreachableError)?;

        let owners = self.error_owners().await?;
        self.errors
            .prune_missing(|id| matches!(owners.get(&id), Some(None)));

        let now = Utc::now();
        let mut started = 0;

        for mailbox in mailboxes {
            let id = mailbox.id;

            if !mailbox.sync_interval.is_automatic() || self.supervisor.is_running(id) {
                continue;
            }

            if !self.errors.is_eligible(id, now) {
                if self.log.sync_enabled() {
                    trace!(mailbox = %id, "mailbox held by previous failure, skipping it");
                }
                continue;
            }

            if self.supervisor.start_sync(id, reason).await? == StartOutcome::Spawned {
                started += 1;
            }
        }

        if self.log.sync_enabled() {
            debug!(%selector, ?reason, "scan started {started} worker(s)");
        }
        Ok(started)
    }
}

#[async_trait]
impl SyncService for SyncOrchestrator {
    fn protocol(&self) -> &str {
        self.config.get_protocol()
    }

    async fn validate(&self, host_auth: &HostAuth) -> Result<ValidationResult> {
        Ok(SyncOrchestrator::validate(self, host_auth).await)
    }

    async fn start_sync(&self, mailbox_id: MailboxId, user_requested: bool) -> Result<StartOutcome> {
        SyncOrchestrator::start_sync(self, mailbox_id, user_requested).await
    }

    async fn stop_sync(&self, mailbox_id: MailboxId) -> Result<()> {
        SyncOrchestrator::stop_sync(self, mailbox_id);
        Ok(())
    }

    async fn load_attachment(&self, attachment_id: AttachmentId, background: bool) -> Result<()> {
        SyncOrchestrator::load_attachment(self, attachment_id, background).await
    }

    async fn update_folder_list(&self, account_id: AccountId) -> Result<()> {
        SyncOrchestrator::update_folder_list(self, account_id).await
    }

    async fn host_changed(&self, account_id: AccountId) -> Result<()> {
        SyncOrchestrator::host_changed(self, account_id).await
    }

    fn set_logging(&self, flags: LogFlags) {
        SyncOrchestrator::set_logging(self, flags)
    }

    fn set_callback(&self, observer: Arc<dyn Observer>) -> ObserverId {
        SyncOrchestrator::set_callback(self, observer)
    }

    fn subscribe(&self) -> (ObserverId, mpsc::Receiver<StatusEvent>) {
        SyncOrchestrator::subscribe(self)
    }

    fn get_capabilities(&self, account_id: AccountId) -> Capabilities {
        SyncOrchestrator::get_capabilities(self, account_id)
    }
}
