use std::{
    collections::BTreeMap,
    io,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Mutex, MutexGuard,
    },
};

use async_trait::async_trait;
use tracing::debug;

use crate::{
    account::{Account, AccountId, AccountSelector},
    mailbox::{Attachment, AttachmentId, Mailbox, MailboxDraft, MailboxId, MailboxKind},
    AnyResult,
};

use super::{AccountReconciler, AccountStore};

#[derive(Debug, Default)]
struct State {
    accounts: BTreeMap<AccountId, Account>,
    mailboxes: BTreeMap<MailboxId, Mailbox>,
    attachments: BTreeMap<AttachmentId, Attachment>,
    next_mailbox_id: u64,
}

/// The in-memory account store.
///
/// Keeps everything in memory, which makes it suitable for tests and
/// for embedders that load their accounts from a configuration file.
/// It also acts as a no-op account-management authority that counts
/// reconciliations.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    unreachable: AtomicBool,
    reconciliations: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // a poisoned lock only means a panicking test, the data stays
        // consistent since every write is a single insertion
        self.state.lock().unwrap_or_else(|err| err.into_inner())
    }

    fn check_reachable(&self) -> io::Result<()> {
        if self.unreachable.load(Ordering::Relaxed) {
            Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "memory store marked as unreachable",
            ))
        } else {
            Ok(())
        }
    }

    /// Simulate the store going away (or coming back).
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::Relaxed);
    }

    pub fn insert_account(&self, account: Account) {
        self.state().accounts.insert(account.id, account);
    }

    pub fn remove_account(&self, id: AccountId) {
        let mut state = self.state();
        state.accounts.remove(&id);
        state.mailboxes.retain(|_, mbox| mbox.account_id != id);
    }

    pub fn insert_mailbox(&self, mailbox: Mailbox) {
        let mut state = self.state();
        state.next_mailbox_id = state.next_mailbox_id.max(mailbox.id.0);
        state.mailboxes.insert(mailbox.id, mailbox);
    }

    pub fn remove_mailbox(&self, id: MailboxId) {
        self.state().mailboxes.remove(&id);
    }

    pub fn insert_attachment(&self, attachment: Attachment) {
        self.state().attachments.insert(attachment.id, attachment);
    }

    pub fn mailboxes(&self) -> Vec<Mailbox> {
        self.state().mailboxes.values().cloned().collect()
    }

    /// The number of reconciliations requested so far.
    pub fn reconciliations(&self) -> usize {
        self.reconciliations.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn list_accounts(&self) -> AnyResult<Vec<Account>> {
        self.check_reachable()?;
        Ok(self.state().accounts.values().cloned().collect())
    }

    async fn get_account(&self, id: AccountId) -> AnyResult<Option<Account>> {
        self.check_reachable()?;
        Ok(self.state().accounts.get(&id).cloned())
    }

    async fn get_mailbox(&self, id: MailboxId) -> AnyResult<Option<Mailbox>> {
        self.check_reachable()?;
        Ok(self.state().mailboxes.get(&id).cloned())
    }

    async fn find_mailbox_of_kind(
        &self,
        account_id: AccountId,
        kind: MailboxKind,
    ) -> AnyResult<Option<MailboxId>> {
        self.check_reachable()?;
        let id = self
            .state()
            .mailboxes
            .values()
            .find(|mbox| mbox.account_id == account_id && mbox.kind == kind)
            .map(|mbox| mbox.id);
        Ok(id)
    }

    async fn create_mailbox(&self, draft: MailboxDraft) -> AnyResult<Mailbox> {
        self.check_reachable()?;
        let mut state = self.state();
        state.next_mailbox_id += 1;
        let mailbox = draft.into_mailbox(MailboxId(state.next_mailbox_id));
        debug!(mailbox = %mailbox.id, account = %mailbox.account_id, "created mailbox");
        state.mailboxes.insert(mailbox.id, mailbox.clone());
        Ok(mailbox)
    }

    async fn list_mailboxes(&self, selector: &AccountSelector) -> AnyResult<Vec<Mailbox>> {
        self.check_reachable()?;
        let mailboxes = self
            .state()
            .mailboxes
            .values()
            .filter(|mbox| selector.matches(mbox.account_id))
            .cloned()
            .collect();
        Ok(mailboxes)
    }

    async fn get_attachment(&self, id: AttachmentId) -> AnyResult<Option<Attachment>> {
        self.check_reachable()?;
        Ok(self.state().attachments.get(&id).cloned())
    }
}

#[async_trait]
impl AccountReconciler for MemoryStore {
    async fn reconcile_accounts(
        &self,
        protocol: &str,
        account_manager_type: &str,
        accounts: &[Account],
    ) -> AnyResult<()> {
        self.check_reachable()?;
        debug!(protocol, account_manager_type, count = accounts.len(), "reconciling accounts");
        self.reconciliations.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
