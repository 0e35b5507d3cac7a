//! # Account store
//!
//! The orchestrator does not own any persistent data. Accounts,
//! mailboxes and attachments are read from (and occasionally written
//! to) an external [`AccountStore`]. The account-management authority
//! is reached through an [`AccountReconciler`].

mod memory;

use async_trait::async_trait;

use crate::{
    account::{Account, AccountId, AccountSelector},
    mailbox::{Attachment, AttachmentId, Mailbox, MailboxDraft, MailboxId, MailboxKind},
    AnyResult,
};

#[doc(inline)]
pub use self::memory::MemoryStore;

/// The external account store.
///
/// Writes must be idempotent: the orchestrator may repeat them.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// List every known account, whatever its protocol.
    ///
    /// An error means the store cannot be reached, it is never
    /// interpreted as an empty list.
    async fn list_accounts(&self) -> AnyResult<Vec<Account>>;

    async fn get_account(&self, id: AccountId) -> AnyResult<Option<Account>>;

    async fn get_mailbox(&self, id: MailboxId) -> AnyResult<Option<Mailbox>>;

    /// Find the first mailbox of the given kind owned by the given
    /// account.
    async fn find_mailbox_of_kind(
        &self,
        account_id: AccountId,
        kind: MailboxKind,
    ) -> AnyResult<Option<MailboxId>>;

    /// Persist the given mailbox and return it with its assigned
    /// identifier.
    async fn create_mailbox(&self, draft: MailboxDraft) -> AnyResult<Mailbox>;

    /// List the mailboxes owned by the accounts of the given selector.
    async fn list_mailboxes(&self, selector: &AccountSelector) -> AnyResult<Vec<Mailbox>>;

    async fn get_attachment(&self, id: AttachmentId) -> AnyResult<Option<Attachment>>;
}

/// The account-management authority.
#[async_trait]
pub trait AccountReconciler: Send + Sync {
    /// Reconcile the given desired accounts of the given protocol
    /// against the authoritative record, adding and removing accounts
    /// as needed. Must be idempotent.
    async fn reconcile_accounts(
        &self,
        protocol: &str,
        account_manager_type: &str,
        accounts: &[Account],
    ) -> AnyResult<()>;
}
