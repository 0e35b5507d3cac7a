//! # Worker
//!
//! Module dedicated to sync workers. A [`SyncWorker`] executes the
//! protocol work of one mailbox; it is built by the [`WorkerFactory`]
//! of the protocol family and driven by the [`WorkerSupervisor`],
//! which guarantees that at most one worker is alive per mailbox.

mod error;
pub mod supervisor;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::{
    account::{Account, HostAuth},
    callback::{CallbackProxy, StatusEvent, SyncStatus},
    logging::LogSettings,
    mailbox::{Mailbox, PartRequest},
    AnyResult,
};

#[doc(inline)]
pub use self::{
    error::{Error, Result},
    supervisor::{StartOutcome, WorkerSupervisor},
};

/// Why a sync was requested.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncReason {
    /// The user explicitly asked for a sync.
    UserRequest,
    /// A service asked for a sync.
    ServiceStart,
    /// An attachment needs to be fetched.
    PartRequest,
    /// The periodic interval of the mailbox elapsed, or a rescan
    /// found the mailbox without worker.
    Scheduled,
}

impl SyncReason {
    pub fn is_user_request(&self) -> bool {
        matches!(self, Self::UserRequest)
    }
}

/// How a worker should stop.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum StopMode {
    /// Abort the current pass at the next safe point.
    Immediate,
    /// Finish the current pass, then exit.
    Graceful,
}

/// The stop signal observed by a worker.
#[derive(Clone, Debug)]
pub struct StopSignal(watch::Receiver<Option<StopMode>>);

impl StopSignal {
    pub(crate) fn channel() -> (watch::Sender<Option<StopMode>>, Self) {
        let (tx, rx) = watch::channel(None);
        (tx, Self(rx))
    }

    pub fn mode(&self) -> Option<StopMode> {
        *self.0.borrow()
    }

    /// Return `true` if a stop of any kind has been requested.
    pub fn is_requested(&self) -> bool {
        self.mode().is_some()
    }

    /// Return `true` if the current pass should be aborted. Workers
    /// are expected to check this between protocol round trips.
    pub fn is_immediate(&self) -> bool {
        matches!(self.mode(), Some(StopMode::Immediate))
    }

    /// Wait until a stop is requested.
    pub async fn requested(&mut self) {
        while self.0.borrow_and_update().is_none() {
            if self.0.changed().await.is_err() {
                // the supervisor dropped the sender without stopping
                // us, wait for the job queue to close instead
                std::future::pending::<()>().await;
            }
        }
    }
}

/// The context given to a worker for each job.
#[derive(Clone, Debug)]
pub struct WorkerContext {
    pub account: Account,
    pub mailbox: Mailbox,
    pub reason: SyncReason,
    pub stop: StopSignal,
    pub callback: CallbackProxy,
    pub log: LogSettings,
}

impl WorkerContext {
    /// Report the progress of the current pass to observers.
    pub fn progress(&self, percent: u8) {
        self.callback.send(StatusEvent::mailbox(
            self.mailbox.id,
            SyncStatus::Progress {
                percent: percent.min(100),
            },
        ));
    }
}

/// The sync worker.
///
/// Implemented by protocol families. Errors never escape the
/// supervisor: they are recorded as mailbox failures.
#[async_trait]
pub trait SyncWorker: Send {
    /// Execute one sync pass of the mailbox.
    async fn sync(&mut self, ctx: &WorkerContext) -> Result<()>;

    /// Fetch the bytes of the given attachment.
    async fn fetch_part(&mut self, ctx: &WorkerContext, req: &PartRequest) -> Result<()> {
        let _ = (ctx, req);
        Err(Error::FetchPartNotAvailableError)
    }
}

/// The status of a credentials validation.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ValidationStatus {
    Success,
    AuthenticationFailed,
    ConnectionFailed,
    SecurityFailure,
    Unknown,
}

/// The result bundle of a credentials validation.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ValidationResult {
    pub status: ValidationStatus,
    pub message: Option<String>,
}

impl ValidationResult {
    pub fn success() -> Self {
        Self {
            status: ValidationStatus::Success,
            message: None,
        }
    }

    pub fn failure(status: ValidationStatus, message: impl ToString) -> Self {
        Self {
            status,
            message: Some(message.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ValidationStatus::Success
    }
}

/// The worker factory of a protocol family.
#[async_trait]
pub trait WorkerFactory: Send + Sync {
    /// Build a worker bound to the given mailbox.
    fn build(&self, account: &Account, mailbox: &Mailbox) -> AnyResult<Box<dyn SyncWorker>>;

    /// Validate the given host and credentials with a throwaway
    /// worker bound to no mailbox.
    async fn validate(&self, host_auth: &HostAuth) -> ValidationResult;

    /// Load the folder list of the given account from the server.
    async fn load_folder_list(&self, account: &Account) -> AnyResult<()>;

    /// Refresh the folder list on explicit request. Protocol families
    /// that keep folders in sync by themselves leave it as a no-op.
    async fn update_folder_list(&self, account: &Account) -> AnyResult<()> {
        let _ = account;
        Ok(())
    }
}
