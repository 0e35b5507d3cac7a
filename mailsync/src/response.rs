//! # Response
//!
//! When a server receives a request, it sends back a response. This
//! module contains the response structure as well as the trait to
//! write a response.

use std::io;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    account::HostAuth,
    callback::StatusEvent,
    service::Capabilities,
    worker::{StartOutcome, ValidationResult},
    Error,
};

/// The server response.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "response")]
pub enum Response {
    /// Default response when everything goes as expected.
    Ok,

    ApiLevel {
        level: u32,
    },

    Validation {
        result: ValidationResult,
    },

    SyncStarted {
        outcome: StartOutcome,
    },

    Capabilities {
        capabilities: Capabilities,
    },

    /// The number of matching messages.
    Count {
        count: usize,
    },

    Done {
        done: bool,
    },

    HostAuth {
        host_auth: HostAuth,
    },

    /// The command is not implemented by this protocol family.
    NotSupported {
        command: String,
    },

    Error {
        message: String,

        /// The account store could not be reached.
        #[serde(default)]
        store_unreachable: bool,
    },

    /// A status event, sent to connections registered as observer.
    Event {
        event: StatusEvent,
    },
}

impl From<Error> for Response {
    fn from(err: Error) -> Self {
        match err {
            Error::NotSupported(command) => Self::NotSupported {
                command: command.to_owned(),
            },
            err => Self::Error {
                store_unreachable: err.is_store_unreachable(),
                message: err.to_string(),
            },
        }
    }
}

/// Trait to write a response.
///
/// Describes how a response should be sent by a server.
#[async_trait]
pub trait ResponseWriter: Send {
    /// Write the given response.
    async fn write(&mut self, res: Response) -> io::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_supported_stays_distinct() {
        let res = Response::from(Error::NotSupported("send mail"));
        assert_eq!(
            res,
            Response::NotSupported {
                command: "send mail".into()
            }
        );
    }
}
