//! # Request
//!
//! The surrounding process drives the orchestrator by sending
//! requests and receiving back responses. This module contains the
//! request structure as well as the trait to read a request.

use std::io;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    account::{AccountId, HostAuth},
    logging::LogFlags,
    mailbox::{AttachmentId, MailboxId, MessageId},
};

/// The client request.
///
/// One variant per command of [`crate::service::SyncService`].
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "command")]
pub enum Request {
    GetApiLevel,

    /// Validate a host and its credentials with a throwaway worker.
    Validate {
        host_auth: HostAuth,
    },

    StartSync {
        mailbox_id: MailboxId,
        #[serde(default)]
        user_requested: bool,
    },

    StopSync {
        mailbox_id: MailboxId,
    },

    LoadAttachment {
        attachment_id: AttachmentId,
        #[serde(default)]
        background: bool,
    },

    UpdateFolderList {
        account_id: AccountId,
    },

    /// The host or the credentials of the account changed.
    HostChanged {
        account_id: AccountId,
    },

    SetLogging {
        flags: LogFlags,
    },

    /// Register the requester as an observer.
    ///
    /// Once acknowledged, the connection only carries status events.
    SetCallback,

    GetCapabilities {
        account_id: AccountId,
    },

    SearchMessages {
        account_id: AccountId,
        query: String,
        dest_mailbox_id: MailboxId,
    },

    SendMail {
        account_id: AccountId,
    },

    SendMeetingResponse {
        message_id: MessageId,
        response: u32,
    },

    CreateFolder {
        account_id: AccountId,
        name: String,
    },

    DeleteFolder {
        account_id: AccountId,
        name: String,
    },

    RenameFolder {
        account_id: AccountId,
        from: String,
        to: String,
    },

    DeleteAccountPimData {
        account_id: AccountId,
    },

    LoadMore {
        message_id: MessageId,
    },

    AutoDiscover {
        username: String,
        password: String,
    },
}

/// Trait to read a client request.
///
/// Describes how a request should be parsed by a server.
#[async_trait]
pub trait RequestReader: Send {
    /// Read the next client request, or `None` once the client
    /// closed the stream.
    async fn read(&mut self) -> io::Result<Option<Request>>;
}
