//! # Account selector
//!
//! A selector scopes stored data (mailboxes, errors) to the accounts
//! governed by the orchestrator.

use std::{collections::BTreeSet, fmt};

use super::AccountId;

/// The account selector.
///
/// Conceptually a predicate over account identifiers. It also renders
/// as a query fragment (`account_key in (1,2)`) for stores that speak
/// SQL.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct AccountSelector(BTreeSet<AccountId>);

impl AccountSelector {
    pub fn new(ids: impl IntoIterator<Item = AccountId>) -> Self {
        Self(ids.into_iter().collect())
    }

    pub fn matches(&self, id: AccountId) -> bool {
        self.0.contains(&id)
    }

    pub fn ids(&self) -> impl Iterator<Item = AccountId> + '_ {
        self.0.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for AccountSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "account_key in (")?;
        for (i, id) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{id}")?;
        }
        write!(f, ")")
    }
}
