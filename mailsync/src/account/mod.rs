//! # Account
//!
//! Module dedicated to accounts: the configured mail identities whose
//! mailboxes get synchronized. The main structure of this module is
//! the [`AccountRegistry`], which keeps the set of governed accounts
//! and the [`AccountSelector`] derived from it.

mod error;
pub mod registry;
pub mod selector;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::mailbox::SyncInterval;

#[doc(inline)]
pub use self::{
    error::{Error, Result},
    registry::AccountRegistry,
    selector::AccountSelector,
};

/// The account identifier.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub u64);

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for AccountId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// The host and authentication descriptor.
///
/// Describes how to reach a mail server and which credential to use.
/// The credential itself is owned by an external secret store, only
/// its reference travels through the orchestrator.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct HostAuth {
    /// The protocol spoken by the host, for example `imap2`.
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub login: String,

    /// The reference of the credential in the external secret store.
    pub credential: Option<String>,

    #[serde(default)]
    pub ssl: bool,
}

/// The account.
///
/// Accounts are created and owned by the external account store. The
/// orchestrator only reads them.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Account {
    pub id: AccountId,
    pub display_name: String,
    pub email: String,

    /// The interval applied to mailboxes created on behalf of this
    /// account.
    #[serde(default)]
    pub sync_interval: SyncInterval,

    /// The receive-side host, if configured.
    pub host_auth: Option<HostAuth>,
}

impl Account {
    /// Return `true` if the account receives mail with the given
    /// protocol.
    pub fn uses_protocol(&self, protocol: &str) -> bool {
        self.host_auth
            .as_ref()
            .map(|host| host.protocol == protocol)
            .unwrap_or_default()
    }
}
