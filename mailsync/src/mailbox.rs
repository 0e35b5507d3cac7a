//! # Mailbox
//!
//! Module dedicated to mailboxes, the unit of sync work, and to the
//! attachment part requests routed to their workers.

use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};

use crate::account::AccountId;

/// The default display name of a created inbox.
pub const INBOX_DISPLAY_NAME: &str = "Inbox";

/// The default server identifier of a created inbox.
pub const INBOX_SERVER_ID: &str = "Inbox";

/// The mailbox identifier.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MailboxId(pub u64);

impl fmt::Display for MailboxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for MailboxId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// The message identifier.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub u64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The attachment identifier.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttachmentId(pub u64);

impl fmt::Display for AttachmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The kind of a mailbox.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MailboxKind {
    Inbox,
    Drafts,
    Outbox,
    Sent,
    Trash,
    Junk,
    /// A user folder.
    #[default]
    Mail,
}

/// The synchronization interval of a mailbox.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncInterval {
    /// The mailbox is only synchronized on explicit request.
    #[default]
    Never,

    /// The mailbox keeps a worker alive, waiting for changes to be
    /// pushed.
    Push,

    /// The mailbox is synchronized every given number of seconds.
    Every(u64),
}

impl SyncInterval {
    /// Return `true` if the mailbox should be picked up by automatic
    /// rescans.
    pub fn is_automatic(&self) -> bool {
        !matches!(self, Self::Never)
    }

    /// The delay a live worker waits between two passes, if any.
    ///
    /// Push workers have no delay: they only wake on ping.
    pub fn period(&self) -> Option<Duration> {
        match self {
            Self::Every(secs) => Some(Duration::from_secs((*secs).max(1))),
            Self::Never | Self::Push => None,
        }
    }
}

/// The mailbox.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Mailbox {
    pub id: MailboxId,
    pub account_id: AccountId,
    pub display_name: String,

    /// The identifier of the mailbox on the server.
    pub server_id: String,

    pub kind: MailboxKind,

    #[serde(default)]
    pub sync_interval: SyncInterval,
}

/// A mailbox not persisted yet.
///
/// The identifier is assigned by the account store.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MailboxDraft {
    pub account_id: AccountId,
    pub display_name: String,
    pub server_id: String,
    pub kind: MailboxKind,
    pub sync_interval: SyncInterval,
}

impl MailboxDraft {
    /// Build the default inbox of the given account.
    pub fn inbox(account_id: AccountId, sync_interval: SyncInterval) -> Self {
        Self {
            account_id,
            display_name: INBOX_DISPLAY_NAME.to_owned(),
            server_id: INBOX_SERVER_ID.to_owned(),
            kind: MailboxKind::Inbox,
            sync_interval,
        }
    }

    pub fn into_mailbox(self, id: MailboxId) -> Mailbox {
        Mailbox {
            id,
            account_id: self.account_id,
            display_name: self.display_name,
            server_id: self.server_id,
            kind: self.kind,
            sync_interval: self.sync_interval,
        }
    }
}

/// The attachment, as resolved by the account store.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Attachment {
    pub id: AttachmentId,
    pub message_id: MessageId,

    /// The mailbox owning the message the attachment belongs to.
    pub mailbox_id: MailboxId,

    pub file_name: String,
}

/// A request to fetch the bytes of an attachment.
///
/// Part requests are queued to the worker of the owning mailbox.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PartRequest {
    pub attachment: Attachment,

    /// The fetch was not triggered by the user.
    pub background: bool,
}
