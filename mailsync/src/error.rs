//! # Error
//!
//! Module dedicated to the global errors of the library. Each module
//! exposes its own [`Error`] enum, and this one gathers them together
//! with the conditions that must reach the caller of a command.

use std::{error, result};

use thiserror::Error;

use crate::{account, worker};

/// The global any boxed `Error` alias of the library.
///
/// External collaborators (account store, reconciler, protocol
/// workers) are not known at compilation time, so their errors are
/// carried as trait objects.
pub type AnyBoxedError = Box<dyn error::Error + Send + Sync + 'static>;

/// The global any `Result` alias of the library.
pub type AnyResult<T> = result::Result<T, AnyBoxedError>;

/// The global `Result` alias of the library.
pub type Result<T> = result::Result<T, Error>;

/// The global `Error` enum of the library.
#[derive(Debug, Error)]
pub enum Error {
    /// The command exists in the service surface but is not
    /// implemented by this protocol family.
    #[error("{0} is not supported by this protocol family")]
    NotSupported(&'static str),

    #[error(transparent)]
    AccountError(#[from] account::Error),
    #[error(transparent)]
    WorkerError(#[from] worker::Error),
}

impl Error {
    /// Return `true` if the error is the distinct "not supported"
    /// answer rather than a failure.
    pub fn is_not_supported(&self) -> bool {
        matches!(self, Self::NotSupported(_))
    }

    /// Return `true` if the account store could not be reached.
    pub fn is_store_unreachable(&self) -> bool {
        match self {
            Self::AccountError(err) => matches!(
                err,
                account::Error::AccountStoreUnreachableError(_)
                    | account::Error::GetAccountError(..)
                    | account::Error::FindInboxError(..)
                    | account::Error::CreateInboxError(..)
            ),
            Self::WorkerError(err) => err.is_store_unreachable(),
            Self::NotSupported(_) => false,
        }
    }
}
