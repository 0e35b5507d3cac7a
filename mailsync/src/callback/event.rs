use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    account::AccountId,
    mailbox::{AttachmentId, MailboxId, MessageId},
};

/// The status carried by a [`StatusEvent`].
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "status")]
pub enum SyncStatus {
    Started,

    /// Progress of the current operation, in percent.
    Progress { percent: u8 },

    Succeeded,

    /// The operation failed. A fatal failure requires a credential
    /// change; a transient one is retried once `hold_until` is
    /// reached.
    Failed {
        fatal: bool,
        hold_until: Option<DateTime<Utc>>,
    },

    Stopped,

    /// The target of the operation does not exist (anymore).
    NotFound,
}

/// The status event.
///
/// Represents everything observers can be told about.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "kind")]
pub enum StatusEvent {
    Mailbox {
        mailbox_id: MailboxId,
        #[serde(flatten)]
        status: SyncStatus,
    },
    FolderList {
        account_id: AccountId,
        #[serde(flatten)]
        status: SyncStatus,
    },
    Attachment {
        attachment_id: AttachmentId,
        message_id: MessageId,
        #[serde(flatten)]
        status: SyncStatus,
    },
}

impl StatusEvent {
    pub fn mailbox(mailbox_id: MailboxId, status: SyncStatus) -> Self {
        Self::Mailbox { mailbox_id, status }
    }

    pub fn folder_list(account_id: AccountId, status: SyncStatus) -> Self {
        Self::FolderList { account_id, status }
    }

    pub fn status(&self) -> &SyncStatus {
        match self {
            Self::Mailbox { status, .. } => status,
            Self::FolderList { status, .. } => status,
            Self::Attachment { status, .. } => status,
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Started => write!(f, "started"),
            Self::Progress { percent } => write!(f, "in progress ({percent}%)"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed { fatal: true, .. } => write!(f, "failed, credentials required"),
            Self::Failed {
                hold_until: Some(until),
                ..
            } => write!(f, "failed, retrying after {until}"),
            Self::Failed { .. } => write!(f, "failed"),
            Self::Stopped => write!(f, "stopped"),
            Self::NotFound => write!(f, "not found"),
        }
    }
}

impl fmt::Display for StatusEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mailbox { mailbox_id, status } => {
                write!(f, "Mailbox {mailbox_id} sync {status}")
            }
            Self::FolderList { account_id, status } => {
                write!(f, "Folder list of account {account_id} {status}")
            }
            Self::Attachment {
                attachment_id,
                message_id,
                status,
            } => {
                write!(f, "Attachment {attachment_id} of message {message_id} {status}")
            }
        }
    }
}
