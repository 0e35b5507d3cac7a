use std::{
    collections::BTreeMap,
    sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use tracing::{debug, info, warn};

use crate::{
    callback::{CallbackProxy, StatusEvent, SyncStatus},
    mailbox::{Mailbox, MailboxDraft, MailboxKind},
    scheduler::Kicker,
    store::{AccountReconciler, AccountStore},
    worker::WorkerFactory,
};

use super::{Account, AccountId, AccountSelector, Error, Result};

/// The account registry.
///
/// Keeps the accounts governed by the orchestrator, that is the
/// accounts of the store whose receive host speaks the configured
/// protocol, together with the selector derived from them.
pub struct AccountRegistry {
    store: Arc<dyn AccountStore>,
    reconciler: Arc<dyn AccountReconciler>,
    protocol: String,
    account_manager_type: String,
    accounts: RwLock<BTreeMap<AccountId, Account>>,
    selector: RwLock<Option<Arc<AccountSelector>>>,
}

impl AccountRegistry {
    pub fn new(
        store: Arc<dyn AccountStore>,
        reconciler: Arc<dyn AccountReconciler>,
        protocol: impl ToString,
        account_manager_type: impl ToString,
    ) -> Self {
        Self {
            store,
            reconciler,
            protocol: protocol.to_string(),
            account_manager_type: account_manager_type.to_string(),
            accounts: Default::default(),
            selector: Default::default(),
        }
    }

    fn accounts_read(&self) -> RwLockReadGuard<'_, BTreeMap<AccountId, Account>> {
        self.accounts.read().unwrap_or_else(|err| err.into_inner())
    }

    fn accounts_write(&self) -> RwLockWriteGuard<'_, BTreeMap<AccountId, Account>> {
        self.accounts.write().unwrap_or_else(|err| err.into_inner())
    }

    fn selector_write(&self) -> RwLockWriteGuard<'_, Option<Arc<AccountSelector>>> {
        self.selector.write().unwrap_or_else(|err| err.into_inner())
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn account_manager_type(&self) -> &str {
        &self.account_manager_type
    }

    /// Enumerate the accounts of the store using the given protocol.
    ///
    /// An unreachable store is an error, never an empty list.
    pub async fn collect_accounts(&self, protocol: &str) -> Result<Vec<Account>> {
        let accounts = self
            .store
            .list_accounts()
            .await
            .map_err(Error::AccountStoreUnreachableError)?;

        let accounts: Vec<_> = accounts
            .into_iter()
            .filter(|account| account.uses_protocol(protocol))
            .collect();

        debug!(protocol, "collected {} account(s)", accounts.len());
        Ok(accounts)
    }

    /// Replace the governed account set with the one of the store.
    ///
    /// Return `true` if the set changed.
    pub async fn refresh(&self) -> Result<bool> {
        let accounts = self.collect_accounts(&self.protocol).await?;
        let accounts: BTreeMap<_, _> = accounts.into_iter().map(|a| (a.id, a)).collect();

        let mut current = self.accounts_write();
        if *current == accounts {
            return Ok(false);
        }

        *current = accounts;
        drop(current);

        self.invalidate_selector();
        Ok(true)
    }

    pub fn accounts(&self) -> Vec<Account> {
        self.accounts_read().values().cloned().collect()
    }

    pub fn get(&self, id: AccountId) -> Option<Account> {
        self.accounts_read().get(&id).cloned()
    }

    pub fn contains(&self, id: AccountId) -> bool {
        self.accounts_read().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.accounts_read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts_read().is_empty()
    }

    /// Add or replace the given account.
    pub fn add_account(&self, account: Account) {
        let id = account.id;
        let prev = self.accounts_write().insert(id, account);
        // a replaced account keeps the same identifier
        if prev.is_none() {
            self.invalidate_selector();
        }
    }

    pub fn remove_account(&self, id: AccountId) -> Option<Account> {
        let account = self.accounts_write().remove(&id);
        if account.is_some() {
            self.invalidate_selector();
        }
        account
    }

    /// Drop the cached selector. The next read recomputes it.
    pub fn invalidate_selector(&self) {
        if self.selector_write().take().is_some() {
            debug!("invalidated account selector");
        }
    }

    /// Return the selector of the governed accounts, computing it if
    /// the account set changed since the last call.
    pub fn account_selector(&self) -> Arc<AccountSelector> {
        if let Some(selector) = self
            .selector
            .read()
            .unwrap_or_else(|err| err.into_inner())
            .as_ref()
        {
            return selector.clone();
        }

        let mut cache = self.selector_write();

        // another reader may have computed it meanwhile
        if let Some(selector) = cache.as_ref() {
            return selector.clone();
        }

        let selector = Arc::new(AccountSelector::new(self.accounts_read().keys().copied()));
        debug!("computed account selector: {selector}");
        *cache = Some(selector.clone());
        selector
    }

    /// Ask the account-management authority to reconcile the accounts
    /// of the given protocol.
    pub async fn reconcile_accounts(&self, protocol: &str) -> Result<()> {
        let accounts = self.collect_accounts(protocol).await?;

        self.reconciler
            .reconcile_accounts(protocol, &self.account_manager_type, &accounts)
            .await
            .map_err(|err| Error::ReconcileAccountsError(err, protocol.to_owned()))?;

        info!(protocol, "reconciled {} account(s)", accounts.len());
        Ok(())
    }

    /// Set up a freshly created account.
    ///
    /// Creates its inbox if missing, loads its folder list, adds it to
    /// the governed set, then kicks the scheduler. Return the created
    /// inbox, if any.
    pub async fn on_new_account(
        &self,
        id: AccountId,
        factory: &dyn WorkerFactory,
        callback: &CallbackProxy,
        kicker: &Kicker,
    ) -> Result<Option<Mailbox>> {
        let account = self
            .store
            .get_account(id)
            .await
            .map_err(|err| Error::GetAccountError(err, id))?;

        let Some(account) = account else {
            warn!(account = %id, "cannot find new account, skipping it");
            return Ok(None);
        };

        let inbox = self
            .store
            .find_mailbox_of_kind(id, MailboxKind::Inbox)
            .await
            .map_err(|err| Error::FindInboxError(err, id))?;

        let created = match inbox {
            Some(inbox) => {
                debug!(account = %id, mailbox = %inbox, "inbox already exists");
                None
            }
            None => {
                let draft = MailboxDraft::inbox(id, account.sync_interval);
                let inbox = self
                    .store
                    .create_mailbox(draft)
                    .await
                    .map_err(|err| Error::CreateInboxError(err, id))?;
                info!(account = %id, mailbox = %inbox.id, "created inbox");
                Some(inbox)
            }
        };

        load_folder_list(&account, factory, callback).await;

        if account.uses_protocol(&self.protocol) {
            self.add_account(account);
        }

        kicker.kick();
        Ok(created)
    }
}

/// Load the folder list of the given account, reporting the outcome
/// to observers.
pub(crate) async fn load_folder_list(
    account: &Account,
    factory: &dyn WorkerFactory,
    callback: &CallbackProxy,
) {
    let id = account.id;
    callback.send(StatusEvent::folder_list(id, SyncStatus::Started));

    let status = match factory.load_folder_list(account).await {
        Ok(()) => SyncStatus::Succeeded,
        Err(err) => {
            warn!(account = %id, "cannot load folder list: {err}");
            debug!("{err:?}");
            SyncStatus::Failed {
                fatal: false,
                hold_until: None,
            }
        }
    };

    callback.send(StatusEvent::folder_list(id, status));
}
