//! # Service
//!
//! Module dedicated to the command surface of a protocol family. The
//! [`SyncService`] trait lists every command the surrounding process
//! may send; a [`ServiceDirectory`] routes an account to the service
//! of its protocol.

use std::{collections::HashMap, fmt, ops, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use crate::{
    account::{Account, AccountId, HostAuth},
    callback::{ChannelObserver, Observer, ObserverId, StatusEvent},
    config::DEFAULT_OBSERVER_QUEUE_SIZE,
    logging::LogFlags,
    mailbox::{AttachmentId, MailboxId, MessageId},
    worker::{StartOutcome, ValidationResult},
    Error, Result,
};

/// The protocol family handled by this crate.
pub const PROTOCOL: &str = "imap2";

/// The account type registered with the account-management
/// authority.
pub const ACCOUNT_MANAGER_TYPE: &str = "org.pimalaya.mailsync.imap2";

/// The discovery action routing commands to this service.
pub const SERVICE_ACTION: &str = "org.pimalaya.mailsync.IMAP2_SYNC_SERVICE";

/// The version of the command surface.
pub const API_LEVEL: u32 = 1;

/// The capability bitmask of an account.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Capabilities(u32);

impl Capabilities {
    pub const SYNCABLE_FOLDERS: Self = Self(1 << 0);
    pub const FOLDER_SERVER_SEARCH: Self = Self(1 << 1);
    pub const UNDO: Self = Self(1 << 2);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(&self) -> u32 {
        self.0
    }

    pub const fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl ops::BitOr for Capabilities {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Display for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// The command surface of a protocol family.
///
/// Commands a family does not implement keep their default body,
/// which answers [`Error::NotSupported`].
#[async_trait]
pub trait SyncService: Send + Sync {
    /// The protocol served, used as the routing key.
    fn protocol(&self) -> &str;

    fn api_level(&self) -> u32 {
        API_LEVEL
    }

    async fn validate(&self, host_auth: &HostAuth) -> Result<ValidationResult>;

    async fn start_sync(&self, mailbox_id: MailboxId, user_requested: bool)
        -> Result<StartOutcome>;

    async fn stop_sync(&self, mailbox_id: MailboxId) -> Result<()>;

    async fn load_attachment(&self, attachment_id: AttachmentId, background: bool) -> Result<()>;

    async fn update_folder_list(&self, account_id: AccountId) -> Result<()>;

    async fn host_changed(&self, account_id: AccountId) -> Result<()>;

    fn set_logging(&self, flags: LogFlags);

    fn set_callback(&self, observer: Arc<dyn Observer>) -> ObserverId;

    /// Register a channel observer and return its receiving end.
    ///
    /// The observer is pruned once the receiver is dropped.
    fn subscribe(&self) -> (ObserverId, mpsc::Receiver<StatusEvent>) {
        let (observer, events) = ChannelObserver::new(DEFAULT_OBSERVER_QUEUE_SIZE);
        let id = self.set_callback(Arc::new(observer));
        (id, events)
    }

    fn get_capabilities(&self, account_id: AccountId) -> Capabilities;

    async fn search_messages(
        &self,
        account_id: AccountId,
        query: &str,
        dest_mailbox_id: MailboxId,
    ) -> Result<usize> {
        let _ = (account_id, query, dest_mailbox_id);
        Err(Error::NotSupported("search messages"))
    }

    async fn send_mail(&self, account_id: AccountId) -> Result<()> {
        let _ = account_id;
        Err(Error::NotSupported("send mail"))
    }

    async fn send_meeting_response(&self, message_id: MessageId, response: u32) -> Result<()> {
        let _ = (message_id, response);
        Err(Error::NotSupported("send meeting response"))
    }

    async fn create_folder(&self, account_id: AccountId, name: &str) -> Result<bool> {
        let _ = (account_id, name);
        Err(Error::NotSupported("create folder"))
    }

    async fn delete_folder(&self, account_id: AccountId, name: &str) -> Result<bool> {
        let _ = (account_id, name);
        Err(Error::NotSupported("delete folder"))
    }

    async fn rename_folder(&self, account_id: AccountId, from: &str, to: &str) -> Result<bool> {
        let _ = (account_id, from, to);
        Err(Error::NotSupported("rename folder"))
    }

    async fn delete_account_pim_data(&self, account_id: AccountId) -> Result<()> {
        let _ = account_id;
        Err(Error::NotSupported("delete account PIM data"))
    }

    async fn load_more(&self, message_id: MessageId) -> Result<()> {
        let _ = message_id;
        Err(Error::NotSupported("load more"))
    }

    async fn auto_discover(&self, username: &str, password: &str) -> Result<HostAuth> {
        let _ = (username, password);
        Err(Error::NotSupported("auto discover"))
    }
}

/// The service directory.
///
/// Maps protocol names to the service implementing them.
#[derive(Clone, Default)]
pub struct ServiceDirectory {
    services: HashMap<String, Arc<dyn SyncService>>,
}

impl ServiceDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the given service under its protocol, replacing any
    /// previous one.
    pub fn register(&mut self, service: Arc<dyn SyncService>) {
        let protocol = service.protocol().to_owned();
        debug!(%protocol, "registered sync service");
        self.services.insert(protocol, service);
    }

    pub fn with_service(mut self, service: Arc<dyn SyncService>) -> Self {
        self.register(service);
        self
    }

    pub fn get(&self, protocol: &str) -> Option<Arc<dyn SyncService>> {
        self.services.get(protocol).cloned()
    }

    /// Return the service of the receive protocol of the given
    /// account.
    pub fn for_account(&self, account: &Account) -> Option<Arc<dyn SyncService>> {
        let protocol = &account.host_auth.as_ref()?.protocol;
        self.get(protocol)
    }

    pub fn protocols(&self) -> impl Iterator<Item = &str> {
        self.services.keys().map(String::as_str)
    }
}

impl fmt::Debug for ServiceDirectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceDirectory")
            .field("protocols", &self.services.keys().collect::<Vec<_>>())
            .finish()
    }
}
