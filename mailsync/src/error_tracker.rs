//! # Error tracker
//!
//! Module dedicated to per-mailbox failure state. The
//! [`ErrorTracker`] decides whether a mailbox may be synced
//! automatically: a transient failure holds the mailbox until a
//! deadline, a fatal one holds it until explicitly cleared.
//!
//! The tracker is a pure state container. Callers choose the backoff
//! duration (see [`crate::config::BackoffPolicy`]) and resolve
//! mailbox ownership.

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
    time::Duration,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::{account::AccountId, mailbox::MailboxId};

/// The failure state of a mailbox.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SyncError {
    /// The failure cannot be retried automatically (bad credentials
    /// for example).
    pub fatal: bool,

    /// The earliest time an automatic retry may happen.
    ///
    /// `None` once the hold has been cleared.
    pub hold_until: Option<DateTime<Utc>>,

    /// The number of consecutive failures recorded.
    pub failures: u32,
}

impl SyncError {
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        !self.fatal && self.hold_until.map_or(true, |until| now >= until)
    }
}

/// The error tracker.
#[derive(Debug, Default)]
pub struct ErrorTracker {
    errors: Mutex<HashMap<MailboxId, SyncError>>,
}

impl ErrorTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn errors(&self) -> MutexGuard<'_, HashMap<MailboxId, SyncError>> {
        self.errors.lock().unwrap_or_else(|err| err.into_inner())
    }

    /// Record a failure of the given mailbox, now.
    pub fn record_failure(&self, id: MailboxId, fatal: bool, backoff: Duration) -> SyncError {
        self.record_failure_at(id, fatal, backoff, Utc::now())
    }

    /// Record a failure of the given mailbox at the given time.
    ///
    /// The hold never moves backwards: a shorter backoff than the
    /// remaining one keeps the previous deadline.
    pub fn record_failure_at(
        &self,
        id: MailboxId,
        fatal: bool,
        backoff: Duration,
        now: DateTime<Utc>,
    ) -> SyncError {
        let until = chrono::Duration::from_std(backoff)
            .ok()
            .and_then(|backoff| now.checked_add_signed(backoff))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        let mut errors = self.errors();
        let error = errors.entry(id).or_default();

        error.failures = error.failures.saturating_add(1);
        error.fatal |= fatal;
        error.hold_until = Some(match error.hold_until {
            Some(prev) if prev > until => prev,
            _ => until,
        });

        debug!(mailbox = %id, fatal = error.fatal, failures = error.failures, "recorded sync failure");
        trace!("{error:?}");

        error.clone()
    }

    /// The number of consecutive failures of the given mailbox.
    pub fn failures(&self, id: MailboxId) -> u32 {
        self.errors().get(&id).map(|e| e.failures).unwrap_or_default()
    }

    pub fn get(&self, id: MailboxId) -> Option<SyncError> {
        self.errors().get(&id).cloned()
    }

    /// Return `true` if the given mailbox may be synced automatically
    /// at the given time.
    pub fn is_eligible(&self, id: MailboxId, now: DateTime<Utc>) -> bool {
        self.errors()
            .get(&id)
            .map_or(true, |error| error.is_eligible(now))
    }

    /// Forget the failure state of the given mailbox, after a
    /// successful sync.
    pub fn clear(&self, id: MailboxId) -> Option<SyncError> {
        let error = self.errors().remove(&id);
        if error.is_some() {
            debug!(mailbox = %id, "cleared sync error");
        }
        error
    }

    /// Reset the hold of every tracked mailbox owned by the given
    /// account, fatal ones included.
    ///
    /// `owner` resolves the account of a mailbox; mailboxes it cannot
    /// resolve are left untouched. Returns the number of entries
    /// reset.
    pub fn clear_for_account(
        &self,
        account_id: AccountId,
        owner: impl Fn(MailboxId) -> Option<AccountId>,
    ) -> usize {
        let mut count = 0;

        for (id, error) in self.errors().iter_mut() {
            if owner(*id) == Some(account_id) {
                error.fatal = false;
                error.hold_until = None;
                count += 1;
            }
        }

        debug!(account = %account_id, count, "cleared sync errors of account");
        count
    }

    /// Remove the entries of the mailboxes that no longer exist.
    ///
    /// `missing` must only return `true` for mailboxes known to be
    /// gone. Returns the number of entries removed.
    pub fn prune_missing(&self, missing: impl Fn(MailboxId) -> bool) -> usize {
        let mut errors = self.errors();
        let len = errors.len();
        errors.retain(|id, _| !missing(*id));
        let count = len - errors.len();

        if count > 0 {
            debug!(count, "pruned sync errors of missing mailboxes");
        }

        count
    }

    /// The identifiers of all tracked mailboxes.
    pub fn mailbox_ids(&self) -> Vec<MailboxId> {
        self.errors().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.errors().len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors().is_empty()
    }
}
