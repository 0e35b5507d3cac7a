use thiserror::Error;

use crate::{
    account::AccountId,
    mailbox::{AttachmentId, MailboxId},
    AnyBoxedError,
};

/// The global `Result` alias of the module.
pub type Result<T> = std::result::Result<T, Error>;

/// The global `Error` enum of the module.
#[derive(Debug, Error)]
pub enum Error {
    /// The sync pass failed but may succeed later (network, server
    /// busy, timeout).
    #[error("cannot sync mailbox, will retry later")]
    TransientError(#[source] AnyBoxedError),
    /// The sync pass failed and cannot succeed without external
    /// intervention (credentials rejected).
    #[error("cannot sync mailbox, credentials required")]
    FatalError(#[source] AnyBoxedError),

    #[error("cannot get mailbox {1} from account store")]
    GetMailboxError(#[source] AnyBoxedError, MailboxId),
    #[error("cannot get account {1} of mailbox {2} from account store")]
    GetAccountError(#[source] AnyBoxedError, AccountId, MailboxId),
    #[error("cannot get attachment {1} from account store")]
    GetAttachmentError(#[source] AnyBoxedError, AttachmentId),
    #[error("cannot find mailbox {0}")]
    MailboxNotFoundError(MailboxId),
    #[error("cannot find account {0} of mailbox {1}")]
    AccountNotFoundError(AccountId, MailboxId),
    #[error("cannot build worker for mailbox {1}")]
    BuildWorkerError(#[source] AnyBoxedError, MailboxId),
    #[error("cannot fetch attachment parts: feature not available for this worker")]
    FetchPartNotAvailableError,
}

impl Error {
    pub fn transient(err: impl Into<AnyBoxedError>) -> Self {
        Self::TransientError(err.into())
    }

    pub fn fatal(err: impl Into<AnyBoxedError>) -> Self {
        Self::FatalError(err.into())
    }

    /// Return `true` if the failure must block automatic retries until
    /// explicitly cleared.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::FatalError(_))
    }

    /// Return `true` if the account store could not be reached.
    pub fn is_store_unreachable(&self) -> bool {
        matches!(
            self,
            Self::GetMailboxError(..) | Self::GetAccountError(..) | Self::GetAttachmentError(..)
        )
    }
}
