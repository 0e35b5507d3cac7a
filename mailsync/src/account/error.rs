use thiserror::Error;

use crate::AnyBoxedError;

use super::AccountId;

/// The global `Result` alias of the module.
pub type Result<T> = std::result::Result<T, Error>;

/// The global `Error` enum of the module.
#[derive(Debug, Error)]
pub enum Error {
    /// The account store could not be reached while enumerating
    /// accounts. Never downgraded to an empty account list: callers
    /// may reconcile destructively from the result.
    #[error("cannot collect accounts: account store unreachable")]
    AccountStoreUnreachableError(#[source] AnyBoxedError),
    #[error("cannot get account {1} from account store")]
    GetAccountError(#[source] AnyBoxedError, AccountId),
    #[error("cannot find inbox of account {1}")]
    FindInboxError(#[source] AnyBoxedError, AccountId),
    #[error("cannot create inbox of account {1}")]
    CreateInboxError(#[source] AnyBoxedError, AccountId),
    #[error("cannot reconcile {1} accounts")]
    ReconcileAccountsError(#[source] AnyBoxedError, String),
}
